//! Snapshot persistence configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Snapshot persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Write portfolio snapshots to disk.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Snapshot file path.
    #[serde(default = "default_path")]
    pub path: String,
    /// Minimum seconds between unforced writes.
    #[serde(default = "default_min_flush_interval_secs")]
    pub min_flush_interval_secs: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            path: default_path(),
            min_flush_interval_secs: default_min_flush_interval_secs(),
        }
    }
}

impl PersistenceConfig {
    /// Throttle between unforced writes.
    #[must_use]
    pub const fn min_flush_interval(&self) -> Duration {
        Duration::from_secs(self.min_flush_interval_secs)
    }
}

const fn default_enabled() -> bool {
    true
}

fn default_path() -> String {
    "data/portfolio.json".to_string()
}

const fn default_min_flush_interval_secs() -> u64 {
    5
}
