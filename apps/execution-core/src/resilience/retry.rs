//! Exponential backoff with jitter for caller-side retries.
//!
//! The execution engine never retries on its own; callers that want to
//! retry a [`retryable`](crate::ExecutionError::is_retryable) failure, and
//! the reconciliation scheduler after a failed pass, use these helpers.
//!
//! # Example
//!
//! ```rust,ignore
//! use execution_core::resilience::{ExponentialBackoffCalculator, RetryPolicy};
//!
//! let mut backoff = ExponentialBackoffCalculator::new(&RetryPolicy::default());
//! let delay1 = backoff.next_backoff(); // ~100ms with jitter
//! let delay2 = backoff.next_backoff(); // ~200ms with jitter
//! ```

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ExecutionError;

/// Retry policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (default: 5).
    pub max_attempts: u32,
    /// Initial backoff duration (default: 100ms).
    pub initial_backoff: Duration,
    /// Maximum backoff duration (default: 30s).
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential growth (default: 2.0).
    pub backoff_multiplier: f64,
    /// Jitter factor for randomization (default: 0.2 = ±20%).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Policy for a periodic task: back off from `initial` but never wait
    /// longer than the task's own period.
    #[must_use]
    pub fn bounded_by(initial: Duration, period: Duration) -> Self {
        Self {
            max_attempts: u32::MAX,
            initial_backoff: initial.min(period),
            max_backoff: period,
            ..Self::default()
        }
    }
}

/// Calculator for exponential backoff with jitter.
#[derive(Debug)]
pub struct ExponentialBackoffCalculator {
    current_attempt: u32,
    max_attempts: u32,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
    backoff_multiplier: f64,
    jitter_factor: f64,
}

impl ExponentialBackoffCalculator {
    /// Create a new backoff calculator from a retry policy.
    #[must_use]
    pub const fn new(policy: &RetryPolicy) -> Self {
        Self {
            current_attempt: 0,
            max_attempts: policy.max_attempts,
            initial_backoff_ms: policy.initial_backoff.as_millis() as u64,
            max_backoff_ms: policy.max_backoff.as_millis() as u64,
            jitter_factor: policy.jitter_factor,
            backoff_multiplier: policy.backoff_multiplier,
        }
    }

    /// Get the next backoff duration with jitter.
    ///
    /// Returns `None` if max attempts exceeded.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.current_attempt >= self.max_attempts {
            return None;
        }

        let base_backoff_ms = self.calculate_base_backoff_ms();
        let jittered_ms = self.apply_jitter(base_backoff_ms);
        let capped_ms = jittered_ms.min(self.max_backoff_ms);

        self.current_attempt = self.current_attempt.saturating_add(1);

        Some(Duration::from_millis(capped_ms))
    }

    /// Calculate base exponential backoff without jitter.
    fn calculate_base_backoff_ms(&self) -> u64 {
        let exponent = self.current_attempt.min(i32::MAX as u32) as i32;
        let multiplier = self.backoff_multiplier.powi(exponent);
        let backoff = (self.initial_backoff_ms as f64 * multiplier).min(self.max_backoff_ms as f64);
        backoff as u64
    }

    /// Apply jitter: random value in [backoff * (1 - jitter), backoff * (1 + jitter)].
    fn apply_jitter(&self, backoff_ms: u64) -> u64 {
        let jitter_range = backoff_ms as f64 * self.jitter_factor;
        let min = (backoff_ms as f64 - jitter_range).max(0.0);
        let max = backoff_ms as f64 + jitter_range;
        if max <= min {
            return backoff_ms;
        }
        rand::rng().random_range(min..=max) as u64
    }

    /// Get the current attempt number.
    #[must_use]
    pub const fn current_attempt(&self) -> u32 {
        self.current_attempt
    }

    /// Check if more retries are available.
    #[must_use]
    pub const fn has_remaining_attempts(&self) -> bool {
        self.current_attempt < self.max_attempts
    }

    /// Reset the calculator after a success.
    pub const fn reset(&mut self) {
        self.current_attempt = 0;
    }
}

/// Run `operation`, retrying retryable failures with backoff.
///
/// Non-retryable errors and exhausted attempts return the last error.
/// Blocks the calling thread between attempts.
pub fn retry_blocking<T>(
    policy: &RetryPolicy,
    mut operation: impl FnMut() -> Result<T, ExecutionError>,
) -> Result<T, ExecutionError> {
    let mut backoff = ExponentialBackoffCalculator::new(policy);
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() => match backoff.next_backoff() {
                Some(delay) => {
                    tracing::debug!(
                        attempt = backoff.current_attempt(),
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying after backoff"
                    );
                    std::thread::sleep(delay);
                }
                None => return Err(error),
            },
            Err(error) => return Err(error),
        }
    }
}
