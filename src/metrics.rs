use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::Error;
use crate::response::Response;
use crate::util::lock_unpoisoned;

/// Point-in-time counters for one pipeline. Calls rejected by the circuit
/// breaker are counted separately from failed calls; they never reached the
/// downstream.
#[derive(Clone, Debug)]
pub struct PipelineMetricsSnapshot {
    pub calls_started: u64,
    pub calls_succeeded: u64,
    pub calls_failed: u64,
    pub calls_rejected: u64,
    pub attempts: u64,
    pub retries: u64,
    pub attempt_timeouts: u64,
    pub deadline_exceeded: u64,
    pub transport_errors: u64,
    pub http_status_errors: u64,
    pub in_flight: u64,
    pub latency_samples: u64,
    pub latency_total_ms: u64,
    pub latency_avg_ms: f64,
    pub status_counts: BTreeMap<u16, u64>,
    pub error_counts: BTreeMap<String, u64>,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct PipelineMetrics {
    inner: Arc<PipelineMetricsInner>,
}

#[derive(Debug, Default)]
struct PipelineMetricsInner {
    calls_started: AtomicU64,
    calls_succeeded: AtomicU64,
    calls_failed: AtomicU64,
    calls_rejected: AtomicU64,
    attempts: AtomicU64,
    retries: AtomicU64,
    attempt_timeouts: AtomicU64,
    deadline_exceeded: AtomicU64,
    transport_errors: AtomicU64,
    http_status_errors: AtomicU64,
    in_flight: AtomicU64,
    latency_total_ms: AtomicU64,
    latency_samples: AtomicU64,
    status_counts: Mutex<BTreeMap<u16, u64>>,
    error_counts: Mutex<BTreeMap<String, u64>>,
}

pub(crate) struct InFlightGuard {
    metrics: PipelineMetrics,
}

impl PipelineMetrics {
    pub(crate) fn record_call_started(&self) {
        self.inner.calls_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn enter_in_flight(&self) -> InFlightGuard {
        self.inner.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            metrics: self.clone(),
        }
    }

    pub(crate) fn record_attempt(&self) {
        self.inner.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.inner.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_attempt_timeout(&self) {
        self.inner.attempt_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_call_completed(
        &self,
        result: &crate::Result<Response>,
        latency: Duration,
    ) {
        match result {
            Ok(response) => {
                self.inner.calls_succeeded.fetch_add(1, Ordering::Relaxed);
                self.add_status_count(response.status().as_u16());
            }
            Err(error) => {
                self.record_call_completed_error(error);
            }
        }
        self.record_latency(latency);
    }

    fn record_call_completed_error(&self, error: &Error) {
        if let Error::CircuitOpen { .. } = error {
            self.inner.calls_rejected.fetch_add(1, Ordering::Relaxed);
            self.add_error_count("circuit_open".to_owned());
            return;
        }

        self.inner.calls_failed.fetch_add(1, Ordering::Relaxed);
        match error {
            Error::DeadlineExceeded { .. } => {
                self.inner.deadline_exceeded.fetch_add(1, Ordering::Relaxed);
                self.add_error_count("deadline_exceeded".to_owned());
            }
            Error::Transport { kind, .. } => {
                self.inner.transport_errors.fetch_add(1, Ordering::Relaxed);
                self.add_error_count(format!("transport:{kind}"));
            }
            Error::HttpStatus { status, .. } => {
                self.inner
                    .http_status_errors
                    .fetch_add(1, Ordering::Relaxed);
                self.add_status_count(*status);
                self.add_error_count(format!("http_status:{status}"));
            }
            other => self.add_error_count(other.code().as_str().to_owned()),
        }
    }

    pub(crate) fn snapshot(&self) -> PipelineMetricsSnapshot {
        let calls_started = self.inner.calls_started.load(Ordering::Relaxed);
        let calls_succeeded = self.inner.calls_succeeded.load(Ordering::Relaxed);
        let calls_failed = self.inner.calls_failed.load(Ordering::Relaxed);
        let calls_rejected = self.inner.calls_rejected.load(Ordering::Relaxed);
        let attempts = self.inner.attempts.load(Ordering::Relaxed);
        let retries = self.inner.retries.load(Ordering::Relaxed);
        let attempt_timeouts = self.inner.attempt_timeouts.load(Ordering::Relaxed);
        let deadline_exceeded = self.inner.deadline_exceeded.load(Ordering::Relaxed);
        let transport_errors = self.inner.transport_errors.load(Ordering::Relaxed);
        let http_status_errors = self.inner.http_status_errors.load(Ordering::Relaxed);
        let in_flight = self.inner.in_flight.load(Ordering::Relaxed);
        let latency_samples = self.inner.latency_samples.load(Ordering::Relaxed);
        let latency_total_ms = self.inner.latency_total_ms.load(Ordering::Relaxed);
        let latency_avg_ms = if latency_samples == 0 {
            0.0
        } else {
            latency_total_ms as f64 / latency_samples as f64
        };
        let status_counts = lock_unpoisoned(&self.inner.status_counts).clone();
        let error_counts = lock_unpoisoned(&self.inner.error_counts).clone();

        PipelineMetricsSnapshot {
            calls_started,
            calls_succeeded,
            calls_failed,
            calls_rejected,
            attempts,
            retries,
            attempt_timeouts,
            deadline_exceeded,
            transport_errors,
            http_status_errors,
            in_flight,
            latency_samples,
            latency_total_ms,
            latency_avg_ms,
            status_counts,
            error_counts,
        }
    }

    fn record_latency(&self, latency: Duration) {
        self.inner.latency_samples.fetch_add(1, Ordering::Relaxed);
        self.inner.latency_total_ms.fetch_add(
            latency.as_millis().min(u64::MAX as u128) as u64,
            Ordering::Relaxed,
        );
    }

    fn add_status_count(&self, status: u16) {
        let mut status_counts = lock_unpoisoned(&self.inner.status_counts);
        *status_counts.entry(status).or_insert(0) += 1;
    }

    fn add_error_count(&self, error_key: String) {
        let mut error_counts = lock_unpoisoned(&self.inner.error_counts);
        *error_counts.entry(error_key).or_insert(0) += 1;
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.metrics.inner.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
