//! Quote cache configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Quote cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceCacheSettings {
    /// Maximum cached symbols.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Entry lifetime (seconds).
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for PriceCacheSettings {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            ttl_secs: default_ttl_secs(),
        }
    }
}

impl PriceCacheSettings {
    /// Convert to the market data module's `PriceCacheConfig`.
    #[must_use]
    pub const fn to_cache_config(&self) -> crate::market_data::PriceCacheConfig {
        crate::market_data::PriceCacheConfig {
            capacity: self.capacity,
            ttl: Duration::from_secs(self.ttl_secs),
        }
    }
}

const fn default_capacity() -> usize {
    1024
}

const fn default_ttl_secs() -> u64 {
    60
}
