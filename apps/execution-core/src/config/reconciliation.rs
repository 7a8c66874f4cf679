//! Reconciliation configuration for periodic broker position sync.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Reconciliation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    /// Enable the periodic pass.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Seconds between passes.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Run one pass before accepting orders.
    #[serde(default = "default_on_startup")]
    pub on_startup: bool,
    /// Entry price difference tolerated before a position counts as changed.
    #[serde(default)]
    pub price_tolerance: Decimal,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_secs: default_interval_secs(),
            on_startup: default_on_startup(),
            price_tolerance: Decimal::ZERO,
        }
    }
}

impl ReconciliationConfig {
    /// Period between passes.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

const fn default_enabled() -> bool {
    true
}

const fn default_interval_secs() -> u64 {
    300 // 5 minutes
}

const fn default_on_startup() -> bool {
    true
}
