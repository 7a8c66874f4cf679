//! Circuit breaker for broker calls.
//!
//! Stops hammering a failing broker and gives it a cooldown before trying
//! again.
//!
//! # State Machine
//!
//! ```text
//! CLOSED → OPEN (failure_threshold consecutive failures)
//! OPEN → HALF_OPEN (cooldown elapsed)
//! HALF_OPEN → CLOSED (the single trial call succeeds)
//! HALF_OPEN → OPEN (the single trial call fails, cooldown restarts)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use execution_core::resilience::{CircuitBreaker, CircuitBreakerConfig};
//!
//! let breaker = CircuitBreaker::new("broker", CircuitBreakerConfig::default());
//! match breaker.call(|| client.get_positions()) {
//!     Ok(positions) => { /* ... */ }
//!     Err(CircuitError::Open { .. }) => { /* failed fast, broker not contacted */ }
//!     Err(CircuitError::Inner(e)) => { /* broker failure, counted */ }
//! }
//! ```

use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::observability::metrics;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitBreakerState {
    /// Circuit is closed, calls flow normally.
    Closed,
    /// Circuit is open, calls are rejected.
    Open,
    /// Circuit is admitting a single trial call.
    HalfOpen,
}

impl CircuitBreakerState {
    /// Numeric encoding for the state gauge (0 closed, 1 half-open, 2 open).
    #[must_use]
    pub const fn as_gauge(self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::HalfOpen => 1.0,
            Self::Open => 2.0,
        }
    }
}

impl std::fmt::Display for CircuitBreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Duration to stay in `OPEN` state before the trial call.
    pub cooldown: Duration,
    /// Maximum call duration before the call counts as a timeout.
    pub call_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            call_timeout: Duration::from_secs(5),
        }
    }
}

/// Error returned by [`CircuitBreaker::call`].
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// The circuit refused the call; the wrapped function never ran.
    #[error("circuit '{name}' is open")]
    Open {
        /// Breaker name.
        name: String,
    },
    /// The wrapped function ran and failed.
    #[error(transparent)]
    Inner(E),
}

/// How a call was let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Grant {
    /// Admitted while `CLOSED`.
    Normal,
    /// The single `HALF_OPEN` trial.
    Trial,
}

/// Circuit breaker for external service calls.
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Service name for logging.
    name: String,
    /// Configuration.
    config: CircuitBreakerConfig,
    /// Current state.
    state: RwLock<CircuitBreakerState>,
    /// Timestamp when circuit opened (for cooldown).
    opened_at: RwLock<Option<Instant>>,
    /// Failures since the last success.
    consecutive_failures: AtomicU32,
    /// Whether the single `HALF_OPEN` trial has been handed out.
    trial_in_flight: AtomicBool,
    /// Total calls counter (for metrics).
    total_calls: AtomicU64,
    /// Total failures counter (for metrics).
    total_failures: AtomicU64,
    /// Calls refused without reaching the wrapped function.
    rejected_calls: AtomicU64,
    /// State transitions counter (for metrics).
    state_transitions: AtomicU64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker.
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: RwLock::new(CircuitBreakerState::Closed),
            opened_at: RwLock::new(None),
            consecutive_failures: AtomicU32::new(0),
            trial_in_flight: AtomicBool::new(false),
            total_calls: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
            state_transitions: AtomicU64::new(0),
        }
    }

    /// Get the service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> CircuitBreakerState {
        self.check_state_transition();
        *self
            .state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Check if a call would be permitted, without claiming the trial slot.
    #[must_use]
    pub fn is_call_permitted(&self) -> bool {
        match self.state() {
            CircuitBreakerState::Closed => true,
            CircuitBreakerState::Open => false,
            CircuitBreakerState::HalfOpen => !self.trial_in_flight.load(Ordering::Acquire),
        }
    }

    /// Claim permission for one call.
    ///
    /// In `HALF_OPEN` only the first caller wins; everyone else is refused
    /// until the trial outcome is recorded.
    #[must_use]
    pub fn try_acquire_permission(&self) -> bool {
        self.acquire().is_some()
    }

    fn acquire(&self) -> Option<Grant> {
        let grant = match self.state() {
            CircuitBreakerState::Closed => Some(Grant::Normal),
            CircuitBreakerState::Open => None,
            CircuitBreakerState::HalfOpen => self
                .trial_in_flight
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
                .then_some(Grant::Trial),
        };

        if grant.is_none() {
            self.rejected_calls.fetch_add(1, Ordering::Relaxed);
            metrics::record_circuit_breaker_rejected(&self.name);
        }
        grant
    }

    /// Run `f` through the breaker.
    ///
    /// Refused calls return [`CircuitError::Open`] without invoking `f`.
    /// Any `Err` from `f` counts as a failure.
    pub fn call<T, E>(&self, f: impl FnOnce() -> Result<T, E>) -> Result<T, CircuitError<E>> {
        let Some(grant) = self.acquire() else {
            tracing::debug!(name = %self.name, "Circuit breaker refused call");
            return Err(CircuitError::Open {
                name: self.name.clone(),
            });
        };

        match f() {
            Ok(value) => {
                self.record_success(grant);
                Ok(value)
            }
            Err(error) => {
                self.record_failure(grant);
                Err(CircuitError::Inner(error))
            }
        }
    }

    /// Only the holder of the trial slot may settle `HALF_OPEN`.
    fn settles_trial(&self, grant: Grant) -> bool {
        grant == Grant::Trial
            && self
                .trial_in_flight
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    fn record_success(&self, grant: Grant) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        metrics::record_circuit_breaker_success(&self.name);

        let current = *self
            .state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        match current {
            CircuitBreakerState::Closed => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
            }
            CircuitBreakerState::HalfOpen if self.settles_trial(grant) => {
                self.transition_to_closed();
            }
            CircuitBreakerState::HalfOpen => {
                tracing::debug!(name = %self.name, "Ignoring success from a call that predates the trial");
            }
            CircuitBreakerState::Open => {
                // Call started before another thread opened the circuit
                tracing::warn!(name = %self.name, "Success recorded while circuit is OPEN");
            }
        }
    }

    fn record_failure(&self, grant: Grant) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        metrics::record_circuit_breaker_failure(&self.name);

        let current = *self
            .state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        match current {
            CircuitBreakerState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.config.failure_threshold {
                    self.transition_to_open();
                }
            }
            CircuitBreakerState::HalfOpen if self.settles_trial(grant) => {
                self.transition_to_open();
            }
            CircuitBreakerState::HalfOpen => {
                tracing::debug!(name = %self.name, "Ignoring failure from a call that predates the trial");
            }
            CircuitBreakerState::Open => {
                tracing::warn!(name = %self.name, "Failure recorded while circuit is OPEN");
            }
        }
    }

    /// Check for time-based state transitions (`OPEN` -> `HALF_OPEN`).
    fn check_state_transition(&self) {
        let state = *self
            .state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if state == CircuitBreakerState::Open
            && let Some(opened) = *self
                .opened_at
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
            && opened.elapsed() >= self.config.cooldown
        {
            self.transition_to_half_open();
        }
    }

    /// Transition to `OPEN` state (also restarts the cooldown from `HALF_OPEN`).
    fn transition_to_open(&self) {
        let mut state = self
            .state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let previous = *state;

        if previous != CircuitBreakerState::Open {
            *state = CircuitBreakerState::Open;

            let mut opened_at = self
                .opened_at
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *opened_at = Some(Instant::now());
            drop(opened_at);
            drop(state);

            self.trial_in_flight.store(false, Ordering::Release);
            self.state_transitions.fetch_add(1, Ordering::Relaxed);
            metrics::record_circuit_breaker_state(&self.name, CircuitBreakerState::Open);

            tracing::warn!(
                name = %self.name,
                from = %previous,
                to = "OPEN",
                consecutive_failures = self.consecutive_failures.load(Ordering::Relaxed),
                "Circuit breaker opened"
            );
        }
    }

    /// Transition to `HALF_OPEN` state.
    fn transition_to_half_open(&self) {
        let mut state = self
            .state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let previous = *state;

        if previous == CircuitBreakerState::Open {
            *state = CircuitBreakerState::HalfOpen;
            drop(state);

            self.trial_in_flight.store(false, Ordering::Release);
            self.state_transitions.fetch_add(1, Ordering::Relaxed);
            metrics::record_circuit_breaker_state(&self.name, CircuitBreakerState::HalfOpen);

            tracing::info!(
                name = %self.name,
                from = %previous,
                to = "HALF_OPEN",
                "Circuit breaker testing"
            );
        }
    }

    /// Transition to CLOSED state.
    fn transition_to_closed(&self) {
        let mut state = self
            .state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let previous = *state;

        if previous != CircuitBreakerState::Closed {
            *state = CircuitBreakerState::Closed;
            drop(state);

            let mut opened_at = self
                .opened_at
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *opened_at = None;
            drop(opened_at);

            self.consecutive_failures.store(0, Ordering::Release);
            self.trial_in_flight.store(false, Ordering::Release);
            self.state_transitions.fetch_add(1, Ordering::Relaxed);
            metrics::record_circuit_breaker_state(&self.name, CircuitBreakerState::Closed);

            tracing::info!(
                name = %self.name,
                from = %previous,
                to = "CLOSED",
                "Circuit breaker closed"
            );
        }
    }

    /// Get the call timeout for this circuit breaker.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        self.config.call_timeout
    }

    /// Get metrics for this circuit breaker.
    #[must_use]
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            name: self.name.clone(),
            state: self.state(),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            rejected_calls: self.rejected_calls.load(Ordering::Relaxed),
            state_transitions: self.state_transitions.load(Ordering::Relaxed),
        }
    }

    /// Force the circuit breaker to open (for testing or emergency).
    pub fn force_open(&self) {
        self.transition_to_open();
    }

    /// Force the circuit breaker to close (for testing or recovery).
    pub fn force_close(&self) {
        self.transition_to_closed();
    }
}

/// Metrics for a circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Service name.
    pub name: String,
    /// Current state.
    pub state: CircuitBreakerState,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Total calls that reached the wrapped function.
    pub total_calls: u64,
    /// Total failures.
    pub total_failures: u64,
    /// Calls refused while open or while the trial was in flight.
    pub rejected_calls: u64,
    /// Number of state transitions.
    pub state_transitions: u64,
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn fast_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 5,
            cooldown: Duration::from_millis(10),
            call_timeout: Duration::from_millis(100),
        }
    }

    fn fail(breaker: &CircuitBreaker) {
        let _ = breaker.call(|| Err::<(), _>("boom"));
    }

    #[test]
    fn test_default_config() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.cooldown, Duration::from_secs(30));
    }

    #[test]
    fn test_initial_state_is_closed() {
        let breaker = CircuitBreaker::new("test", CircuitBreakerConfig::default());
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        assert!(breaker.is_call_permitted());
    }

    #[test]
    fn test_five_consecutive_failures_open() {
        let breaker = CircuitBreaker::new("test", fast_config());

        for _ in 0..4 {
            fail(&breaker);
        }
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);

        fail(&breaker);
        assert_eq!(breaker.state(), CircuitBreakerState::Open);
        assert!(!breaker.is_call_permitted());
    }

    #[test]
    fn test_success_resets_consecutive_count() {
        let breaker = CircuitBreaker::new("test", fast_config());

        for _ in 0..4 {
            fail(&breaker);
        }
        let _ = breaker.call(|| Ok::<_, &str>(()));
        for _ in 0..4 {
            fail(&breaker);
        }

        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        assert_eq!(breaker.metrics().consecutive_failures, 4);
    }

    #[test]
    fn test_open_never_invokes_wrapped_function() {
        let breaker = CircuitBreaker::new("test", CircuitBreakerConfig::default());
        for _ in 0..5 {
            fail(&breaker);
        }

        let invoked = Cell::new(false);
        let result = breaker.call(|| {
            invoked.set(true);
            Ok::<_, &str>(())
        });

        assert!(matches!(result, Err(CircuitError::Open { .. })));
        assert!(!invoked.get());
        assert_eq!(breaker.metrics().rejected_calls, 1);
    }

    #[test]
    fn test_open_to_half_open_after_cooldown() {
        let breaker = CircuitBreaker::new("test", fast_config());
        for _ in 0..5 {
            fail(&breaker);
        }
        assert_eq!(breaker.state(), CircuitBreakerState::Open);

        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(breaker.state(), CircuitBreakerState::HalfOpen);
        assert!(breaker.is_call_permitted());
    }

    #[test]
    fn test_half_open_allows_exactly_one_trial() {
        let breaker = CircuitBreaker::new("test", fast_config());
        for _ in 0..5 {
            fail(&breaker);
        }
        std::thread::sleep(Duration::from_millis(20));

        assert!(breaker.try_acquire_permission());
        assert!(!breaker.try_acquire_permission());
        assert!(!breaker.is_call_permitted());
    }

    #[test]
    fn test_half_open_success_closes() {
        let breaker = CircuitBreaker::new("test", fast_config());
        for _ in 0..5 {
            fail(&breaker);
        }
        std::thread::sleep(Duration::from_millis(20));

        let result = breaker.call(|| Ok::<_, &str>(42));
        assert_eq!(result.unwrap(), 42);
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        assert_eq!(breaker.metrics().consecutive_failures, 0);
    }

    #[test]
    fn test_straggler_success_does_not_close_half_open() {
        let breaker = CircuitBreaker::new("test", fast_config());
        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

        std::thread::scope(|scope| {
            let shared = &breaker;
            let straggler = scope.spawn(move || {
                shared.call(|| {
                    started_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    Ok::<_, &str>(())
                })
            });
            started_rx.recv().unwrap();

            for _ in 0..5 {
                fail(&breaker);
            }
            std::thread::sleep(Duration::from_millis(20));
            assert_eq!(breaker.state(), CircuitBreakerState::HalfOpen);

            release_tx.send(()).unwrap();
            assert!(straggler.join().unwrap().is_ok());
        });

        assert_eq!(breaker.state(), CircuitBreakerState::HalfOpen);
        assert!(breaker.try_acquire_permission());
    }

    #[test]
    fn test_half_open_failure_reopens_and_restarts_cooldown() {
        let config = CircuitBreakerConfig {
            cooldown: Duration::from_millis(50),
            ..fast_config()
        };
        let breaker = CircuitBreaker::new("test", config);
        for _ in 0..5 {
            fail(&breaker);
        }
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(breaker.state(), CircuitBreakerState::HalfOpen);

        fail(&breaker);
        assert_eq!(breaker.state(), CircuitBreakerState::Open);

        // Cooldown restarted at the failed trial
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(breaker.state(), CircuitBreakerState::Open);
    }

    #[test]
    fn test_metrics() {
        let breaker = CircuitBreaker::new("test", CircuitBreakerConfig::default());

        let _ = breaker.call(|| Ok::<_, &str>(()));
        let _ = breaker.call(|| Ok::<_, &str>(()));
        fail(&breaker);

        let metrics = breaker.metrics();
        assert_eq!(metrics.name, "test");
        assert_eq!(metrics.total_calls, 3);
        assert_eq!(metrics.total_failures, 1);
        assert_eq!(metrics.consecutive_failures, 1);
    }

    #[test]
    fn test_force_open_and_close() {
        let breaker = CircuitBreaker::new("test", CircuitBreakerConfig::default());

        breaker.force_open();
        assert_eq!(breaker.state(), CircuitBreakerState::Open);

        breaker.force_close();
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        assert_eq!(breaker.metrics().state_transitions, 2);
    }
}
