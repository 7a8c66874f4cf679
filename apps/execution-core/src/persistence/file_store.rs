//! JSON file snapshot store with atomic replace.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{PersistenceError, SnapshotStore};
use crate::portfolio::PortfolioSnapshot;

/// Stores the snapshot as a JSON document at `path`.
///
/// Writes go to a sibling temp file which is synced and renamed over the
/// target, so a crash leaves either the old or the new document.
#[derive(Debug, Clone)]
pub struct JsonFileSnapshotStore {
    path: PathBuf,
}

impl JsonFileSnapshotStore {
    /// Store at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Target file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SnapshotStore for JsonFileSnapshotStore {
    fn save_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let bytes = serde_json::to_vec_pretty(snapshot)?;
        let temp = self.temp_path();
        {
            let mut file = File::create(&temp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&temp, &self.path)?;

        tracing::debug!(
            path = %self.path.display(),
            version = snapshot.version,
            bytes = bytes.len(),
            "Snapshot written"
        );
        Ok(())
    }

    fn load_snapshot(&self) -> Result<Option<PortfolioSnapshot>, PersistenceError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let snapshot: PortfolioSnapshot = serde_json::from_slice(&bytes).map_err(|err| {
            PersistenceError::Corrupt(format!("{}: {err}", self.path.display()))
        })?;
        snapshot
            .validate()
            .map_err(|reason| PersistenceError::Corrupt(format!("{}: {reason}", self.path.display())))?;

        tracing::info!(
            path = %self.path.display(),
            version = snapshot.version,
            positions = snapshot.positions.len(),
            "Snapshot loaded"
        );
        Ok(Some(snapshot))
    }
}
