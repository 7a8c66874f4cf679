//! Two-tier rate limiter guarding outbound broker calls.
//!
//! Each key carries a short burst window (e.g. 10 calls per second) and a
//! sustained window (e.g. 200 calls per minute). A call is admitted only when
//! both windows have room, and admission takes a slot from each.
//!
//! [`RateLimiter::acquire`] returns the literal admission result. `false`
//! means "do not call the broker now".

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::observability::metrics;

/// Rate limiter configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Calls admitted per burst window.
    pub burst_capacity: u32,
    /// Length of the burst window.
    pub burst_window: Duration,
    /// Calls admitted per sustained window.
    pub sustained_capacity: u32,
    /// Length of the sustained window.
    pub sustained_window: Duration,
    /// How often a blocked caller re-checks for capacity.
    pub poll_interval: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            burst_capacity: 10,
            burst_window: Duration::from_secs(1),
            sustained_capacity: 200,
            sustained_window: Duration::from_secs(60),
            poll_interval: Duration::from_millis(10),
        }
    }
}

impl RateLimiterConfig {
    /// Per-second burst and per-minute sustained limits.
    #[must_use]
    pub const fn per_second_and_minute(per_second: u32, per_minute: u32) -> Self {
        Self {
            burst_capacity: per_second,
            burst_window: Duration::from_secs(1),
            sustained_capacity: per_minute,
            sustained_window: Duration::from_secs(60),
            poll_interval: Duration::from_millis(10),
        }
    }
}

/// Admission timestamps within one window.
#[derive(Debug)]
struct Window {
    capacity: usize,
    span: Duration,
    admitted: VecDeque<Instant>,
}

impl Window {
    fn new(capacity: u32, span: Duration) -> Self {
        Self {
            capacity: capacity as usize,
            span,
            admitted: VecDeque::with_capacity(capacity as usize),
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.admitted.front() {
            if now.saturating_duration_since(oldest) >= self.span {
                self.admitted.pop_front();
            } else {
                break;
            }
        }
    }

    /// Earliest instant this window can admit again, `None` if it can now.
    fn next_free_at(&self, now: Instant) -> Option<Instant> {
        if self.admitted.len() < self.capacity {
            return None;
        }
        // A zero-capacity window never frees up; report one span out
        Some(
            self.admitted
                .front()
                .map_or(now + self.span, |&oldest| oldest + self.span),
        )
    }
}

#[derive(Debug)]
struct KeyWindows {
    burst: Window,
    sustained: Window,
}

impl KeyWindows {
    fn new(config: &RateLimiterConfig) -> Self {
        Self {
            burst: Window::new(config.burst_capacity, config.burst_window),
            sustained: Window::new(config.sustained_capacity, config.sustained_window),
        }
    }
}

/// Outcome of a single admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Admitted,
    RetryAt(Instant),
}

/// Per-key two-tier rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    keys: Mutex<HashMap<String, KeyWindows>>,
    admitted: AtomicU64,
    rejected: AtomicU64,
}

impl RateLimiter {
    /// Create a new rate limiter.
    #[must_use]
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            keys: Mutex::new(HashMap::new()),
            admitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Block until `key` is admitted or `timeout` elapses.
    ///
    /// Returns `true` only if the call was admitted. When the earliest free
    /// slot lies beyond the deadline the call is refused immediately rather
    /// than sleeping out the timeout.
    pub fn acquire(&self, key: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        loop {
            let now = Instant::now();
            match self.try_admit_at(key, now) {
                Admission::Admitted => return self.admit(key),
                Admission::RetryAt(free_at) => {
                    if free_at > deadline || now >= deadline {
                        return self.reject(key, timeout);
                    }
                    let remaining = deadline.saturating_duration_since(now);
                    std::thread::sleep(self.config.poll_interval.min(remaining));
                }
            }
        }
    }

    /// Admit `key` only if both windows have room right now.
    pub fn try_acquire(&self, key: &str) -> bool {
        match self.try_admit_at(key, Instant::now()) {
            Admission::Admitted => self.admit(key),
            Admission::RetryAt(_) => self.reject(key, Duration::ZERO),
        }
    }

    /// Total admitted calls.
    #[must_use]
    pub fn admitted_count(&self) -> u64 {
        self.admitted.load(Ordering::Relaxed)
    }

    /// Total refused calls.
    #[must_use]
    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    fn try_admit_at(&self, key: &str, now: Instant) -> Admission {
        let mut keys = self.keys.lock();
        let windows = keys
            .entry(key.to_string())
            .or_insert_with(|| KeyWindows::new(&self.config));

        windows.burst.prune(now);
        windows.sustained.prune(now);

        match (
            windows.burst.next_free_at(now),
            windows.sustained.next_free_at(now),
        ) {
            (None, None) => {
                windows.burst.admitted.push_back(now);
                windows.sustained.admitted.push_back(now);
                Admission::Admitted
            }
            (Some(at), None) | (None, Some(at)) => Admission::RetryAt(at),
            (Some(burst), Some(sustained)) => Admission::RetryAt(burst.max(sustained)),
        }
    }

    fn admit(&self, key: &str) -> bool {
        self.admitted.fetch_add(1, Ordering::Relaxed);
        metrics::record_rate_limit_decision(key, true);
        true
    }

    fn reject(&self, key: &str, timeout: Duration) -> bool {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        metrics::record_rate_limit_decision(key, false);
        tracing::debug!(
            key,
            timeout_ms = timeout.as_millis() as u64,
            "Rate limiter refused admission"
        );
        false
    }
}
