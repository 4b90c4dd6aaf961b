// Clock abstraction for retry backoff and wait polling
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of time for every blocking loop in the crate
pub trait Clock: Send + Sync {
    /// Get the current instant
    fn now(&self) -> Instant;

    /// Block the current thread for the given duration
    fn sleep(&self, duration: Duration);

    /// Time elapsed since `start`, according to this clock
    fn elapsed_since(&self, start: Instant) -> Duration {
        self.now().saturating_duration_since(start)
    }
}

/// Wall clock backed by `std::thread::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Shared handle to the system clock
pub fn system() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}
