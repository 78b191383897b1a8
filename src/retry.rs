use std::time::Duration;

use rand::Rng;

use crate::outcome::Outcome;

const DEFAULT_MAX_ATTEMPTS: usize = 3;
const DEFAULT_BACKOFF_SCHEDULE: [Duration; 3] = [
    Duration::from_millis(250),
    Duration::from_millis(500),
    Duration::from_secs(1),
];

/// Fixed-delay retry schedule.
///
/// The wait before retry `n` is entry `n - 1` of `backoff_schedule`, and the
/// last entry repeats once the schedule runs out. Delays are fixed by default
/// so traffic against a struggling downstream stays predictable; set
/// `jitter_ratio` to spread waits when many callers share one schedule.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    max_attempts: usize,
    backoff_schedule: Vec<Duration>,
    jitter_ratio: f64,
}

impl RetryPolicy {
    pub fn standard() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_schedule: DEFAULT_BACKOFF_SCHEDULE.to_vec(),
            jitter_ratio: 0.0,
        }
    }

    pub const fn disabled() -> Self {
        Self {
            max_attempts: 1,
            backoff_schedule: Vec::new(),
            jitter_ratio: 0.0,
        }
    }

    pub fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn backoff_schedule(
        mut self,
        backoff_schedule: impl IntoIterator<Item = Duration>,
    ) -> Self {
        self.backoff_schedule = backoff_schedule.into_iter().collect();
        self
    }

    pub fn jitter_ratio(mut self, jitter_ratio: f64) -> Self {
        self.jitter_ratio = jitter_ratio.clamp(0.0, 1.0);
        self
    }

    pub(crate) const fn max_attempts_value(&self) -> usize {
        self.max_attempts
    }

    /// Decides what to do after `attempt` (1-based) produced `outcome`.
    pub fn decide(&self, outcome: &Outcome, attempt: usize) -> RetryDirective {
        if attempt >= self.max_attempts || !outcome.is_retryable() {
            return RetryDirective::Stop;
        }
        RetryDirective::RetryAfter(self.backoff_for_retry(attempt))
    }

    pub(crate) fn backoff_for_retry(&self, attempt: usize) -> Duration {
        if self.backoff_schedule.is_empty() {
            return Duration::ZERO;
        }
        let index = attempt
            .saturating_sub(1)
            .min(self.backoff_schedule.len() - 1);
        self.apply_jitter(self.backoff_schedule[index])
    }

    fn apply_jitter(&self, backoff: Duration) -> Duration {
        if self.jitter_ratio <= f64::EPSILON {
            return backoff;
        }

        let backoff_ms = backoff.as_millis().min(u64::MAX as u128) as u64;
        if backoff_ms <= 1 {
            return backoff;
        }

        let jitter_span = ((backoff_ms as f64) * self.jitter_ratio).round().max(1.0) as u64;
        let low = backoff_ms.saturating_sub(jitter_span);
        let high = backoff_ms.saturating_add(jitter_span).max(low);
        let mut rng = rand::rng();
        Duration::from_millis(rng.random_range(low..=high))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDirective {
    Stop,
    RetryAfter(Duration),
}
