//! Rate limiter and circuit breaker configuration for broker calls.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Sliding-window rate limits applied per broker operation key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterSettings {
    /// Calls admitted per burst window.
    #[serde(default = "default_burst_capacity")]
    pub burst_capacity: u32,
    /// Burst window (milliseconds).
    #[serde(default = "default_burst_window_ms")]
    pub burst_window_ms: u64,
    /// Calls admitted per sustained window.
    #[serde(default = "default_sustained_capacity")]
    pub sustained_capacity: u32,
    /// Sustained window (seconds).
    #[serde(default = "default_sustained_window_secs")]
    pub sustained_window_secs: u64,
    /// How long a caller waits for capacity before giving up (milliseconds).
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

impl Default for RateLimiterSettings {
    fn default() -> Self {
        Self {
            burst_capacity: default_burst_capacity(),
            burst_window_ms: default_burst_window_ms(),
            sustained_capacity: default_sustained_capacity(),
            sustained_window_secs: default_sustained_window_secs(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
        }
    }
}

impl RateLimiterSettings {
    /// Convert to the resilience module's `RateLimiterConfig`.
    #[must_use]
    pub fn to_resilience_config(&self) -> crate::resilience::RateLimiterConfig {
        crate::resilience::RateLimiterConfig {
            burst_capacity: self.burst_capacity,
            burst_window: Duration::from_millis(self.burst_window_ms),
            sustained_capacity: self.sustained_capacity,
            sustained_window: Duration::from_secs(self.sustained_window_secs),
            ..Default::default()
        }
    }

    /// Admission wait for broker calls.
    #[must_use]
    pub const fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

/// Circuit breaker settings for the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    /// Consecutive failures that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Time in the open state before a trial call (seconds).
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Per-call deadline (milliseconds).
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Broker calls allowed in flight at once, including timed-out calls
    /// whose worker has not returned yet.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
            call_timeout_ms: default_call_timeout_ms(),
            max_workers: default_max_workers(),
        }
    }
}

impl CircuitBreakerSettings {
    /// Convert to the resilience module's `CircuitBreakerConfig`.
    #[must_use]
    pub const fn to_resilience_config(&self) -> crate::resilience::CircuitBreakerConfig {
        crate::resilience::CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            cooldown: Duration::from_secs(self.cooldown_secs),
            call_timeout: Duration::from_millis(self.call_timeout_ms),
        }
    }
}

const fn default_burst_capacity() -> u32 {
    10
}

const fn default_burst_window_ms() -> u64 {
    1000
}

const fn default_sustained_capacity() -> u32 {
    200
}

const fn default_sustained_window_secs() -> u64 {
    60
}

const fn default_acquire_timeout_ms() -> u64 {
    2000
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_cooldown_secs() -> u64 {
    30
}

const fn default_call_timeout_ms() -> u64 {
    5000
}

const fn default_max_workers() -> usize {
    8
}
