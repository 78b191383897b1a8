use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::clock::{Clock, SystemClock};
use crate::outcome::Outcome;
use crate::util::lock_unpoisoned;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CircuitBreakerPolicy {
    failure_threshold: usize,
    break_duration: Duration,
}

impl CircuitBreakerPolicy {
    pub const fn standard() -> Self {
        Self {
            failure_threshold: 5,
            break_duration: Duration::from_secs(15),
        }
    }

    pub const fn failure_threshold(mut self, failure_threshold: usize) -> Self {
        self.failure_threshold = failure_threshold;
        self
    }

    pub const fn break_duration(mut self, break_duration: Duration) -> Self {
        self.break_duration = break_duration;
        self
    }
}

impl Default for CircuitBreakerPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PermitKind {
    Closed,
    Trial,
}

#[derive(Debug)]
enum CircuitState {
    Closed { consecutive_failures: usize },
    Open { opened_at: Instant },
    HalfOpen { trial_in_flight: bool },
}

/// Consecutive-failure circuit breaker for one downstream target.
///
/// Closed counts consecutive failed attempts and opens at the policy
/// threshold. Open rejects every attempt until the break duration elapses,
/// then admits exactly one trial attempt: trial success closes the breaker,
/// trial failure reopens it with a fresh break window.
///
/// All pipelines holding the same `Arc<CircuitBreaker>` feed the same state,
/// so share one instance per downstream target.
pub struct CircuitBreaker {
    policy: CircuitBreakerPolicy,
    clock: Arc<dyn Clock>,
    state: Mutex<CircuitState>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("CircuitBreaker")
            .field("policy", &self.policy)
            .field("state", &self.state)
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(policy: CircuitBreakerPolicy) -> Self {
        Self::with_clock(policy, Arc::new(SystemClock))
    }

    pub fn with_clock(policy: CircuitBreakerPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            clock,
            state: Mutex::new(CircuitState::Closed {
                consecutive_failures: 0,
            }),
        }
    }

    /// Gate for one delivery attempt.
    ///
    /// Grants a [`CircuitPermit`] when the attempt may proceed; the caller
    /// hands the attempt outcome back through [`CircuitPermit::complete`].
    /// Returns a [`CircuitRejection`] carrying the remaining break time while
    /// the circuit is open, or zero while another trial attempt holds the
    /// half-open slot.
    pub fn admit(self: &Arc<Self>) -> Result<CircuitPermit, CircuitRejection> {
        let mut state = lock_unpoisoned(&self.state);
        let now = self.clock.now();
        match &mut *state {
            CircuitState::Closed { .. } => Ok(self.permit(PermitKind::Closed)),
            CircuitState::Open { opened_at } => {
                let elapsed = now.saturating_duration_since(*opened_at);
                if elapsed >= self.policy.break_duration {
                    *state = CircuitState::HalfOpen {
                        trial_in_flight: true,
                    };
                    return Ok(self.permit(PermitKind::Trial));
                }
                Err(CircuitRejection {
                    retry_after: self.policy.break_duration - elapsed,
                })
            }
            CircuitState::HalfOpen { trial_in_flight } => {
                if *trial_in_flight {
                    return Err(CircuitRejection {
                        retry_after: Duration::ZERO,
                    });
                }
                *trial_in_flight = true;
                Ok(self.permit(PermitKind::Trial))
            }
        }
    }

    fn permit(self: &Arc<Self>, kind: PermitKind) -> CircuitPermit {
        CircuitPermit {
            breaker: Arc::clone(self),
            kind,
            resolved: false,
        }
    }

    fn record_outcome(&self, kind: PermitKind, success: bool) {
        let mut state = lock_unpoisoned(&self.state);
        match (&mut *state, kind, success) {
            (
                CircuitState::Closed {
                    consecutive_failures,
                },
                PermitKind::Closed,
                true,
            ) => {
                *consecutive_failures = 0;
            }
            (
                CircuitState::Closed {
                    consecutive_failures,
                },
                PermitKind::Closed,
                false,
            ) => {
                *consecutive_failures = consecutive_failures.saturating_add(1);
                if *consecutive_failures >= self.policy.failure_threshold.max(1) {
                    *state = CircuitState::Open {
                        opened_at: self.clock.now(),
                    };
                }
            }
            (CircuitState::HalfOpen { .. }, PermitKind::Trial, true) => {
                *state = CircuitState::Closed {
                    consecutive_failures: 0,
                };
            }
            (CircuitState::HalfOpen { .. }, PermitKind::Trial, false) => {
                *state = CircuitState::Open {
                    opened_at: self.clock.now(),
                };
            }
            _ => {}
        }
    }

    fn release_unresolved(&self, kind: PermitKind) {
        if kind != PermitKind::Trial {
            return;
        }
        let mut state = lock_unpoisoned(&self.state);
        if let CircuitState::HalfOpen { trial_in_flight } = &mut *state {
            *trial_in_flight = false;
        }
    }
}

/// Permission for one attempt, granted by [`CircuitBreaker::admit`].
///
/// Completing the permit records the attempt outcome exactly once. Dropping a
/// permit without completing it records nothing; an unresolved trial permit
/// releases its half-open slot so the next admitted attempt becomes the trial.
pub struct CircuitPermit {
    breaker: Arc<CircuitBreaker>,
    kind: PermitKind,
    resolved: bool,
}

impl CircuitPermit {
    pub fn complete(mut self, outcome: &Outcome) {
        self.breaker.record_outcome(self.kind, outcome.is_success());
        self.resolved = true;
    }
}

impl Drop for CircuitPermit {
    fn drop(&mut self) {
        if !self.resolved {
            self.breaker.release_unresolved(self.kind);
        }
    }
}

/// Rejection detail for an attempt the circuit refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CircuitRejection {
    /// Remaining break time, or zero when a trial attempt holds the only slot.
    pub retry_after: Duration,
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use http::{HeaderMap, Method, StatusCode};

    use super::{CircuitBreaker, CircuitBreakerPolicy};
    use crate::clock::ManualClock;
    use crate::outcome::Outcome;
    use crate::response::Response;

    fn outcome_for_status(status: StatusCode) -> Outcome {
        Outcome::from_response(
            Response::new(status, HeaderMap::new(), "body"),
            &Method::GET,
            "http://downstream.test/health",
        )
    }

    fn success_outcome() -> Outcome {
        outcome_for_status(StatusCode::OK)
    }

    fn failure_outcome() -> Outcome {
        outcome_for_status(StatusCode::SERVICE_UNAVAILABLE)
    }

    fn timeout_outcome() -> Outcome {
        Outcome::timed_out(
            Duration::from_secs(30),
            &Method::GET,
            "http://downstream.test/health",
        )
    }

    fn breaker_with_clock(
        policy: CircuitBreakerPolicy,
    ) -> (Arc<CircuitBreaker>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let breaker = Arc::new(CircuitBreaker::with_clock(policy, clock.clone()));
        (breaker, clock)
    }

    fn record(breaker: &Arc<CircuitBreaker>, outcome: &Outcome) {
        breaker
            .admit()
            .unwrap_or_else(|rejection| panic!("attempt should be admitted: {rejection:?}"))
            .complete(outcome);
    }

    #[test]
    fn opens_after_consecutive_failures_reach_threshold() {
        let (breaker, _clock) = breaker_with_clock(
            CircuitBreakerPolicy::standard()
                .failure_threshold(3)
                .break_duration(Duration::from_secs(15)),
        );

        record(&breaker, &failure_outcome());
        record(&breaker, &failure_outcome());
        assert!(
            breaker.admit().is_ok(),
            "breaker should stay closed below the threshold"
        );
        record(&breaker, &failure_outcome());

        let rejection = match breaker.admit() {
            Err(rejection) => rejection,
            Ok(_) => panic!("breaker should be open after reaching the threshold"),
        };
        assert_eq!(rejection.retry_after, Duration::from_secs(15));
    }

    #[test]
    fn timed_out_outcomes_count_toward_failure_threshold() {
        let (breaker, _clock) = breaker_with_clock(
            CircuitBreakerPolicy::standard()
                .failure_threshold(2)
                .break_duration(Duration::from_secs(15)),
        );

        record(&breaker, &timeout_outcome());
        record(&breaker, &timeout_outcome());

        let rejection = match breaker.admit() {
            Err(rejection) => rejection,
            Ok(_) => panic!("timed-out attempts should open the breaker like failures"),
        };
        assert_eq!(rejection.retry_after, Duration::from_secs(15));
    }

    #[test]
    fn success_resets_consecutive_failure_count() {
        let (breaker, _clock) = breaker_with_clock(
            CircuitBreakerPolicy::standard()
                .failure_threshold(2)
                .break_duration(Duration::from_secs(15)),
        );

        record(&breaker, &failure_outcome());
        record(&breaker, &success_outcome());
        record(&breaker, &failure_outcome());

        assert!(
            breaker.admit().is_ok(),
            "interleaved success should reset the failure streak"
        );
    }

    #[test]
    fn rejects_with_remaining_break_time_while_open() {
        let (breaker, clock) = breaker_with_clock(
            CircuitBreakerPolicy::standard()
                .failure_threshold(1)
                .break_duration(Duration::from_secs(15)),
        );

        record(&breaker, &failure_outcome());

        clock.advance(Duration::from_secs(5));
        let rejection = match breaker.admit() {
            Err(rejection) => rejection,
            Ok(_) => panic!("breaker should still be open"),
        };
        assert_eq!(rejection.retry_after, Duration::from_secs(10));

        clock.advance(Duration::from_secs(10));
        assert!(
            breaker.admit().is_ok(),
            "breaker should admit a trial once the break elapses"
        );
    }

    #[test]
    fn admits_exactly_one_trial_after_break() {
        let (breaker, clock) = breaker_with_clock(
            CircuitBreakerPolicy::standard()
                .failure_threshold(1)
                .break_duration(Duration::from_secs(1)),
        );

        record(&breaker, &failure_outcome());
        clock.advance(Duration::from_secs(1));

        let trial = breaker
            .admit()
            .unwrap_or_else(|rejection| panic!("trial should be admitted: {rejection:?}"));
        let rejection = match breaker.admit() {
            Err(rejection) => rejection,
            Ok(_) => panic!("second attempt should be rejected while the trial is in flight"),
        };
        assert_eq!(rejection.retry_after, Duration::ZERO);

        trial.complete(&success_outcome());
    }

    #[test]
    fn trial_success_closes_breaker() {
        let (breaker, clock) = breaker_with_clock(
            CircuitBreakerPolicy::standard()
                .failure_threshold(2)
                .break_duration(Duration::from_secs(1)),
        );

        record(&breaker, &failure_outcome());
        record(&breaker, &failure_outcome());
        clock.advance(Duration::from_secs(1));

        let trial = breaker
            .admit()
            .unwrap_or_else(|rejection| panic!("trial should be admitted: {rejection:?}"));
        trial.complete(&success_outcome());

        record(&breaker, &failure_outcome());
        assert!(
            breaker.admit().is_ok(),
            "trial success should reset the failure streak along with the state"
        );
    }

    #[test]
    fn trial_failure_reopens_with_fresh_break_window() {
        let (breaker, clock) = breaker_with_clock(
            CircuitBreakerPolicy::standard()
                .failure_threshold(1)
                .break_duration(Duration::from_secs(10)),
        );

        record(&breaker, &failure_outcome());
        clock.advance(Duration::from_secs(10));

        let trial = breaker
            .admit()
            .unwrap_or_else(|rejection| panic!("trial should be admitted: {rejection:?}"));
        trial.complete(&failure_outcome());

        let rejection = match breaker.admit() {
            Err(rejection) => rejection,
            Ok(_) => panic!("failed trial should reopen the breaker"),
        };
        assert_eq!(rejection.retry_after, Duration::from_secs(10));

        clock.advance(Duration::from_secs(9));
        assert!(breaker.admit().is_err(), "fresh break window should apply");

        clock.advance(Duration::from_secs(1));
        assert!(breaker.admit().is_ok());
    }

    #[test]
    fn dropped_trial_permit_releases_half_open_slot() {
        let (breaker, clock) = breaker_with_clock(
            CircuitBreakerPolicy::standard()
                .failure_threshold(1)
                .break_duration(Duration::from_secs(1)),
        );

        record(&breaker, &failure_outcome());
        clock.advance(Duration::from_secs(1));

        let abandoned = breaker
            .admit()
            .unwrap_or_else(|rejection| panic!("trial should be admitted: {rejection:?}"));
        drop(abandoned);

        let retry_trial = breaker
            .admit()
            .unwrap_or_else(|rejection| panic!("slot should be free again: {rejection:?}"));
        retry_trial.complete(&success_outcome());
        assert!(breaker.admit().is_ok(), "breaker should be closed");
    }

    #[test]
    fn dropped_closed_permit_records_nothing() {
        let (breaker, _clock) = breaker_with_clock(
            CircuitBreakerPolicy::standard()
                .failure_threshold(1)
                .break_duration(Duration::from_secs(15)),
        );

        for _ in 0..3 {
            let permit = breaker
                .admit()
                .unwrap_or_else(|rejection| panic!("attempt should be admitted: {rejection:?}"));
            drop(permit);
        }

        assert!(
            breaker.admit().is_ok(),
            "abandoned attempts must not count toward the failure threshold"
        );
    }
}
