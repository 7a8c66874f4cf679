//! Throttled snapshot writer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{PersistenceError, SnapshotStore};
use crate::observability::metrics;
use crate::portfolio::PortfolioStore;

/// Writes portfolio snapshots when the state changed, at most once per
/// `min_interval` unless forced.
///
/// Must not be flushed from a thread that holds an open transaction.
pub struct SnapshotPersister {
    store: Arc<dyn SnapshotStore>,
    portfolio: Arc<PortfolioStore>,
    min_interval: Duration,
    dirty: AtomicBool,
    last_flush: Mutex<Option<Instant>>,
}

impl std::fmt::Debug for SnapshotPersister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotPersister")
            .field("min_interval", &self.min_interval)
            .field("dirty", &self.is_dirty())
            .finish_non_exhaustive()
    }
}

impl SnapshotPersister {
    /// Persist `portfolio` into `store`.
    #[must_use]
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        portfolio: Arc<PortfolioStore>,
        min_interval: Duration,
    ) -> Self {
        Self {
            store,
            portfolio,
            min_interval,
            dirty: AtomicBool::new(false),
            last_flush: Mutex::new(None),
        }
    }

    /// Record that the portfolio changed since the last write.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// True if there are unwritten changes.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Write if dirty and the minimum interval has passed since the last
    /// write. Returns whether a snapshot was written.
    ///
    /// # Errors
    ///
    /// Store failures. The dirty flag stays set so a later flush retries.
    pub fn maybe_flush(&self) -> Result<bool, PersistenceError> {
        if !self.is_dirty() {
            return Ok(false);
        }
        let throttled = self
            .last_flush
            .lock()
            .is_some_and(|at| at.elapsed() < self.min_interval);
        if throttled {
            return Ok(false);
        }
        self.write()
    }

    /// Write now if dirty, ignoring the interval.
    ///
    /// # Errors
    ///
    /// Store failures. The dirty flag stays set so a later flush retries.
    pub fn flush(&self) -> Result<bool, PersistenceError> {
        if !self.is_dirty() {
            return Ok(false);
        }
        self.write()
    }

    fn write(&self) -> Result<bool, PersistenceError> {
        // Cleared first so commits racing with the write mark it again.
        self.dirty.store(false, Ordering::Release);
        let snapshot = self.portfolio.snapshot();
        let started = Instant::now();

        match self.store.save_snapshot(&snapshot) {
            Ok(()) => {
                *self.last_flush.lock() = Some(Instant::now());
                metrics::record_snapshot_flush(started.elapsed(), true);
                tracing::debug!(version = snapshot.version, "Portfolio snapshot flushed");
                Ok(true)
            }
            Err(error) => {
                self.mark_dirty();
                metrics::record_snapshot_flush(started.elapsed(), false);
                tracing::error!(error = %error, version = snapshot.version, "Portfolio snapshot flush failed");
                Err(error)
            }
        }
    }
}
