//! Configuration for the execution core.
//!
//! YAML with `${VAR}` and `${VAR:-default}` environment interpolation. Every
//! section is optional and falls back to its defaults.
//!
//! # Usage
//!
//! ```rust,ignore
//! use execution_core::config::load_config;
//!
//! let config = load_config(Some("config.yaml"))?;
//! println!("initial cash: {}", config.engine.initial_cash);
//! ```

mod engine;
mod observability;
mod persistence;
mod price_cache;
mod reconciliation;
mod resilience;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use engine::EngineConfig;
pub use observability::ObservabilityConfig;
pub use persistence::PersistenceConfig;
pub use price_cache::PriceCacheSettings;
pub use reconciliation::ReconciliationConfig;
pub use resilience::{CircuitBreakerSettings, RateLimiterSettings};

use crate::contract::ExpiryCalendar;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "EXECUTION_CORE_CONFIG";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("Failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Capital and order bounds.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Broker call rate limits.
    #[serde(default)]
    pub rate_limiter: RateLimiterSettings,
    /// Broker circuit breaker.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
    /// Quote cache.
    #[serde(default)]
    pub price_cache: PriceCacheSettings,
    /// Broker position sync.
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    /// Portfolio snapshots.
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Derivative expiry weekdays by underlying.
    #[serde(default)]
    pub expiry_calendar: ExpiryCalendar,
    /// Logging and metrics.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ============================================
// Configuration Loading
// ============================================

/// Load configuration from a YAML file with environment variable interpolation.
///
/// # Arguments
///
/// * `path` - Optional path to the config file. Defaults to "config.yaml".
///
/// # Errors
///
/// Returns a `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or("config.yaml");

    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_string(),
        source: e,
    })?;

    load_config_from_string(&contents)
}

/// Load configuration from a YAML string.
///
/// # Errors
///
/// Returns a `ConfigError` if the YAML cannot be parsed or validated.
pub fn load_config_from_string(yaml: &str) -> Result<Config, ConfigError> {
    let interpolated = interpolate_env_vars(yaml);
    let config: Config = serde_yaml_bw::from_str(&interpolated)?;
    validate_config(&config)?;
    Ok(config)
}

/// Interpolate environment variables in a string.
///
/// Supports both `${VAR}` and `${VAR:-default}` syntax. Unset or empty
/// variables without a default become empty.
#[allow(clippy::expect_used)] // Regex is a constant pattern
fn interpolate_env_vars(input: &str) -> String {
    use std::sync::OnceLock;

    static ENV_VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

    let re = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var regex is valid")
    });

    re.replace_all(input, |cap: &regex::Captures<'_>| {
        let default_value = cap.get(2).map_or("", |m| m.as_str());
        match std::env::var(&cap[1]) {
            Ok(value) if !value.is_empty() => value,
            _ => default_value.to_string(),
        }
    })
    .into_owned()
}

/// Validate configuration values.
///
/// # Errors
///
/// [`ConfigError::ValidationError`] naming the first bad value.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let engine = &config.engine;
    if engine.initial_cash < Decimal::ZERO {
        return Err(ConfigError::ValidationError(
            "engine.initial_cash must not be negative".to_string(),
        ));
    }
    if engine.max_order_quantity <= 0 {
        return Err(ConfigError::ValidationError(
            "engine.max_order_quantity must be positive".to_string(),
        ));
    }
    if engine
        .max_order_notional
        .is_some_and(|cap| cap <= Decimal::ZERO)
    {
        return Err(ConfigError::ValidationError(
            "engine.max_order_notional must be positive".to_string(),
        ));
    }

    let limiter = &config.rate_limiter;
    if limiter.burst_capacity == 0 || limiter.sustained_capacity == 0 {
        return Err(ConfigError::ValidationError(
            "rate_limiter capacities must be positive".to_string(),
        ));
    }
    if limiter.burst_window_ms == 0 || limiter.sustained_window_secs == 0 {
        return Err(ConfigError::ValidationError(
            "rate_limiter windows must be positive".to_string(),
        ));
    }

    let breaker = &config.circuit_breaker;
    if breaker.failure_threshold == 0 {
        return Err(ConfigError::ValidationError(
            "circuit_breaker.failure_threshold must be positive".to_string(),
        ));
    }
    if breaker.call_timeout_ms == 0 {
        return Err(ConfigError::ValidationError(
            "circuit_breaker.call_timeout_ms must be positive".to_string(),
        ));
    }
    if breaker.max_workers == 0 {
        return Err(ConfigError::ValidationError(
            "circuit_breaker.max_workers must be positive".to_string(),
        ));
    }

    if config.price_cache.capacity == 0 {
        return Err(ConfigError::ValidationError(
            "price_cache.capacity must be positive".to_string(),
        ));
    }

    if config.reconciliation.enabled && config.reconciliation.interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "reconciliation.interval_secs must be positive".to_string(),
        ));
    }
    if config.reconciliation.price_tolerance < Decimal::ZERO {
        return Err(ConfigError::ValidationError(
            "reconciliation.price_tolerance must not be negative".to_string(),
        ));
    }

    if config.persistence.enabled && config.persistence.path.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "persistence.path must be set when persistence is enabled".to_string(),
        ));
    }

    let invalid = config.expiry_calendar.invalid_keys();
    if !invalid.is_empty() {
        return Err(ConfigError::ValidationError(format!(
            "expiry_calendar underlyings must be uppercase letters: {invalid:?}"
        )));
    }

    if config.observability.metrics_enabled
        && config.observability.to_metrics_config().is_err()
    {
        return Err(ConfigError::ValidationError(format!(
            "observability.metrics_addr '{}' is not a socket address",
            config.observability.metrics_addr
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Weekday;
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = load_config_from_string("{}").unwrap();
        assert_eq!(config.engine.initial_cash, dec!(100000));
        assert!(config.reconciliation.enabled);
        assert!(config.reconciliation.on_startup);
        assert_eq!(config.reconciliation.interval_secs, 300);
        assert!(config.persistence.enabled);
        assert!(!config.observability.metrics_enabled);
        assert_eq!(
            config.expiry_calendar.weekly_weekday("BANKNIFTY"),
            Weekday::Wed
        );
    }

    #[test]
    fn test_load_sections() {
        let yaml = r#"
engine:
  initial_cash: 250000
  max_order_quantity: 500
rate_limiter:
  burst_capacity: 3
circuit_breaker:
  failure_threshold: 2
  call_timeout_ms: 100
reconciliation:
  interval_secs: 30
  price_tolerance: "0.05"
expiry_calendar:
  default_weekly: Tue
  weekly:
    NIFTY: Thu
"#;
        let config = load_config_from_string(yaml).unwrap();
        assert_eq!(config.engine.initial_cash, dec!(250000));
        assert_eq!(config.engine.to_order_limits().max_order_quantity, 500);
        assert_eq!(config.rate_limiter.to_resilience_config().burst_capacity, 3);
        assert_eq!(config.circuit_breaker.to_resilience_config().failure_threshold, 2);
        assert_eq!(config.circuit_breaker.max_workers, 8);
        assert_eq!(config.reconciliation.price_tolerance, dec!(0.05));
        assert_eq!(config.expiry_calendar.weekly_weekday("NIFTY"), Weekday::Thu);
        assert_eq!(config.expiry_calendar.weekly_weekday("ACME"), Weekday::Tue);
    }

    #[test]
    fn test_env_var_with_default_when_missing() {
        let input = "path: ${EXECUTION_CORE_TEST_NONEXISTENT_VAR:-data/p.json}";
        assert_eq!(interpolate_env_vars(input), "path: data/p.json");
    }

    #[test]
    fn test_env_var_without_default_becomes_empty() {
        let input = "log_level: ${EXECUTION_CORE_TEST_UNLIKELY_TO_EXIST}";
        assert_eq!(interpolate_env_vars(input), "log_level: ");
    }

    #[test]
    #[expect(clippy::literal_string_with_formatting_args)] // ${...} is env var syntax
    fn test_env_var_with_default_uses_existing() {
        let result = interpolate_env_vars("path: ${PATH:-default}");
        assert_ne!(result, "path: default");
        assert!(result.starts_with("path: "));
    }

    #[test]
    fn test_validation_rejects_negative_cash() {
        let Err(err) = load_config_from_string("engine:\n  initial_cash: -1\n") else {
            panic!("expected error for negative cash");
        };
        assert!(err.to_string().contains("initial_cash"));
    }

    #[test]
    fn test_validation_rejects_lowercase_calendar_key() {
        let yaml = "expiry_calendar:\n  weekly:\n    nifty: Thu\n";
        let Err(err) = load_config_from_string(yaml) else {
            panic!("expected error for lowercase underlying");
        };
        assert!(err.to_string().contains("expiry_calendar"));
    }

    #[test]
    fn test_validation_rejects_bad_metrics_addr() {
        let yaml = "observability:\n  metrics_enabled: true\n  metrics_addr: nowhere\n";
        assert!(matches!(
            load_config_from_string(yaml),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = load_config(Some("/nonexistent/execution-core.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }
}
