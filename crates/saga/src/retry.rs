//! Bounded exponential backoff for payment capture.

use std::time::Duration;

/// How often and how patiently a failed capture is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Total attempts is `max_retries + 1`.
    pub max_retries: u32,

    /// Delay before the first retry; doubled for each later one.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given bounds.
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Returns the delay to wait after failed attempt `retry` (0-based)
    /// before trying again: `base_delay * 2^retry`.
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(retry))
    }

    /// Returns true if another attempt is allowed after `retry` retries.
    pub fn should_retry(&self, retry: u32) -> bool {
        retry < self.max_retries
    }
}
