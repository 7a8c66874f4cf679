//! In-memory snapshot store for tests and ephemeral runs.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use super::{PersistenceError, SnapshotStore};
use crate::portfolio::PortfolioSnapshot;

/// Keeps the latest snapshot in memory.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    slot: Mutex<Option<PortfolioSnapshot>>,
    saves: AtomicU64,
    failing: AtomicBool,
}

impl InMemorySnapshotStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-loaded with `snapshot`.
    #[must_use]
    pub fn with_snapshot(snapshot: PortfolioSnapshot) -> Self {
        let store = Self::new();
        *store.slot.lock() = Some(snapshot);
        store
    }

    /// Number of successful saves.
    #[must_use]
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }

    /// Make subsequent saves fail (simulates a full disk).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Latest saved snapshot.
    #[must_use]
    pub fn latest(&self) -> Option<PortfolioSnapshot> {
        self.slot.lock().clone()
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn save_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<(), PersistenceError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PersistenceError::Io("simulated write failure".to_string()));
        }
        *self.slot.lock() = Some(snapshot.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn load_snapshot(&self) -> Result<Option<PortfolioSnapshot>, PersistenceError> {
        Ok(self.slot.lock().clone())
    }
}
