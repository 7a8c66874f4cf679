//! Durable portfolio snapshots.
//!
//! The whole portfolio is written as one [`PortfolioSnapshot`] document.
//! [`SnapshotPersister`] decides when to write; a [`SnapshotStore`] decides
//! where.

mod file_store;
mod in_memory;
mod persister;

use thiserror::Error;

use crate::portfolio::PortfolioSnapshot;

pub use file_store::JsonFileSnapshotStore;
pub use in_memory::InMemorySnapshotStore;
pub use persister::SnapshotPersister;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(String),

    /// Snapshot could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The stored snapshot is unreadable or violates portfolio invariants.
    /// Fatal at startup.
    #[error("Corrupt snapshot: {0}")]
    Corrupt(String),
}

impl From<std::io::Error> for PersistenceError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Where portfolio snapshots live.
pub trait SnapshotStore: Send + Sync {
    /// Replace the stored snapshot.
    fn save_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<(), PersistenceError>;

    /// Load the stored snapshot, `None` if nothing was ever saved.
    fn load_snapshot(&self) -> Result<Option<PortfolioSnapshot>, PersistenceError>;
}
