//! Logging and metrics configuration.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::observability::MetricsConfig;

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Default log level when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Serve Prometheus metrics.
    #[serde(default)]
    pub metrics_enabled: bool,
    /// Metrics listen address.
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            metrics_enabled: false,
            metrics_addr: default_metrics_addr(),
        }
    }
}

impl ObservabilityConfig {
    /// Exporter configuration, if the address parses.
    pub fn to_metrics_config(&self) -> Result<MetricsConfig, std::net::AddrParseError> {
        self.metrics_addr
            .parse::<SocketAddr>()
            .map(MetricsConfig::with_addr)
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}
