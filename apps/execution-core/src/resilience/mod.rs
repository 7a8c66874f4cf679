//! Resilience primitives for broker calls.
//!
//! - [`RateLimiter`]: two-tier admission control
//! - [`CircuitBreaker`]: fail fast while the broker is unhealthy
//! - [`retry`]: caller-side backoff

mod circuit_breaker;
mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitBreakerState, CircuitError,
};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use retry::{ExponentialBackoffCalculator, RetryPolicy, retry_blocking};
