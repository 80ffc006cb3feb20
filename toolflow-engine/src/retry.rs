//! Exponential backoff for transient failures.

use std::num::NonZeroU32;
use std::time::Duration;

use toolflow_primitives::ErrorCategory;

/// Bounded exponential backoff.
///
/// Only failures in a transient category of a tool whose contract is
/// retryable are ever retried.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    max_attempts: NonZeroU32,
    base_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: NonZeroU32::MIN.saturating_add(2),
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy. Multipliers below `1.0` are raised to `1.0` and a
    /// `max_delay` below `base_delay` is raised to it.
    #[must_use]
    pub fn new(max_attempts: NonZeroU32, base_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay: max_delay.max(base_delay),
            multiplier: if multiplier.is_finite() { multiplier.max(1.0) } else { 1.0 },
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self::new(NonZeroU32::MIN, Duration::ZERO, Duration::ZERO, 1.0)
    }

    /// Total attempts, including the first.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.get()
    }

    /// Returns whether another attempt is allowed after `attempts_made`
    /// attempts failed with `category`.
    #[must_use]
    pub fn should_retry(&self, attempts_made: u32, category: ErrorCategory, retryable: bool) -> bool {
        retryable && category.is_transient() && attempts_made < self.max_attempts.get()
    }

    /// Delay before retry number `retry` (zero-based), capped at `max_delay`.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let scaled = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(scaled)
    }
}
