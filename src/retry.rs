// Bounded retry with exponential backoff
// Shared by container creation and mapped-port resolution

use crate::clock::Clock;
use crate::errors::{DyError, Result};
use std::time::Duration;

/// Attempt budget and backoff curve for a retried operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Policy used for mapped-port lookups: 6 attempts, 100ms doubling up to 2s
    pub fn mapped_port() -> Self {
        Self::new(6, Duration::from_millis(100), Duration::from_secs(2))
    }

    /// Delay slept after the given zero-based failed attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or the attempt budget is spent.
    ///
    /// The operation receives the zero-based attempt number. Exhaustion is
    /// reported as `DyError::RetryExhausted` wrapping the last failure.
    pub fn run<T, F, R>(
        &self,
        clock: &dyn Clock,
        operation: &str,
        mut attempt_fn: F,
        is_retryable: R,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Result<T>,
        R: Fn(&DyError) -> bool,
    {
        let mut attempt = 0;

        loop {
            match attempt_fn(attempt) {
                Ok(value) => return Ok(value),
                Err(error) if !is_retryable(&error) => return Err(error),
                Err(error) => {
                    attempt += 1;

                    if attempt >= self.max_attempts {
                        return Err(DyError::RetryExhausted {
                            operation: operation.to_string(),
                            attempts: attempt,
                            source: Box::new(error),
                        });
                    }

                    let delay = self.delay_for_attempt(attempt - 1);
                    tracing::debug!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying after transient failure"
                    );
                    clock.sleep(delay);
                }
            }
        }
    }
}
