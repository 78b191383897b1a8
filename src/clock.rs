use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::util::lock_unpoisoned;

/// Monotonic time source used for circuit breaker transitions.
///
/// The default [`SystemClock`] reads `Instant::now()`. Tests can substitute a
/// [`ManualClock`] and step through break windows without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when [`ManualClock::advance`] is called.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, step: Duration) {
        let mut offset = lock_unpoisoned(&self.offset);
        *offset = offset.saturating_add(step);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *lock_unpoisoned(&self.offset)
    }
}
