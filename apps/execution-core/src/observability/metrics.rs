//! Prometheus metrics for the execution core.
//!
//! Recording functions are cheap no-ops until [`init_metrics`] installs the
//! exporter, so library code records unconditionally.
//!
//! # Example
//!
//! ```ignore
//! use execution_core::observability::{init_metrics, MetricsConfig};
//!
//! init_metrics(&MetricsConfig::default())?;
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::resilience::CircuitBreakerState;

/// Configuration for the metrics exporter.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Address to bind the metrics HTTP listener.
    pub listen_addr: SocketAddr,
    /// Histogram buckets for latency measurements (in seconds).
    pub latency_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
            // 100us to 10s; broker calls sit at the top end.
            latency_buckets: vec![
                0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
                10.0,
            ],
        }
    }
}

impl MetricsConfig {
    /// Default buckets, custom address.
    #[must_use]
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            listen_addr: addr,
            ..Default::default()
        }
    }
}

/// Install the Prometheus exporter and its `/metrics` listener.
///
/// # Errors
///
/// Returns an error if the exporter fails to start (e.g., port already in use).
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    PrometheusBuilder::new()
        .with_http_listener(config.listen_addr)
        .set_buckets(&config.latency_buckets)
        .map_err(|e| MetricsError::Configuration(e.to_string()))?
        .install()
        .map_err(|e| MetricsError::Installation(e.to_string()))?;

    tracing::info!(
        addr = %config.listen_addr,
        "Prometheus metrics exporter started"
    );

    Ok(())
}

/// Error type for metrics operations.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Failed to configure metrics exporter.
    #[error("metrics configuration error: {0}")]
    Configuration(String),
    /// Failed to install metrics exporter.
    #[error("metrics installation error: {0}")]
    Installation(String),
}

// ============================================================================
// Execution
// ============================================================================

/// Record one trade intent and how it ended.
///
/// `outcome` is the order status for successes or the error code otherwise.
pub fn record_order(side: &str, outcome: &str, elapsed: Duration) {
    counter!(
        "execution_orders_total",
        "side" => side.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!("execution_order_latency_seconds", "side" => side.to_string())
        .record(elapsed.as_secs_f64());
}

/// Update portfolio gauges after a commit.
pub fn record_portfolio(cash: Decimal, open_positions: usize) {
    gauge!("portfolio_cash").set(cash.to_f64().unwrap_or(0.0));
    #[allow(clippy::cast_precision_loss)]
    gauge!("portfolio_open_positions").set(open_positions as f64);
}

/// Record a transaction outcome (`commit` or `rollback`).
pub fn record_transaction(outcome: &'static str) {
    counter!("portfolio_transactions_total", "outcome" => outcome).increment(1);
}

// ============================================================================
// Broker
// ============================================================================

/// Record one guarded broker call.
pub fn record_broker_call(operation: &'static str, elapsed: Duration, outcome: &'static str) {
    counter!(
        "broker_calls_total",
        "operation" => operation,
        "outcome" => outcome
    )
    .increment(1);
    histogram!("broker_call_latency_seconds", "operation" => operation)
        .record(elapsed.as_secs_f64());
}

/// Record the number of live broker worker threads.
pub fn record_broker_workers(in_flight: usize) {
    gauge!("broker_workers_in_flight").set(in_flight as f64);
}

/// Record a broker call whose response will be discarded after its deadline.
pub fn record_broker_call_abandoned(operation: &'static str) {
    counter!("broker_calls_abandoned_total", "operation" => operation).increment(1);
}

/// Record a broker call refused because every worker was busy.
pub fn record_broker_saturated(operation: &'static str) {
    counter!("broker_calls_saturated_total", "operation" => operation).increment(1);
}

/// Record a rate limiter decision.
pub fn record_rate_limit_decision(key: &str, admitted: bool) {
    let decision = if admitted { "admitted" } else { "rejected" };
    counter!(
        "rate_limiter_decisions_total",
        "key" => key.to_string(),
        "decision" => decision
    )
    .increment(1);
}

// ============================================================================
// Circuit Breaker
// ============================================================================

/// Update circuit breaker state gauge (0=closed, 1=`half_open`, 2=open).
pub fn record_circuit_breaker_state(service: &str, state: CircuitBreakerState) {
    gauge!(
        "circuit_breaker_state",
        "service" => service.to_string()
    )
    .set(state.as_gauge());
}

/// Record a circuit breaker failure.
pub fn record_circuit_breaker_failure(service: &str) {
    counter!(
        "circuit_breaker_failures_total",
        "service" => service.to_string()
    )
    .increment(1);
}

/// Record a circuit breaker success.
pub fn record_circuit_breaker_success(service: &str) {
    counter!(
        "circuit_breaker_success_total",
        "service" => service.to_string()
    )
    .increment(1);
}

/// Record a call refused by an open circuit.
pub fn record_circuit_breaker_rejected(service: &str) {
    counter!(
        "circuit_breaker_rejected_total",
        "service" => service.to_string()
    )
    .increment(1);
}

// ============================================================================
// Price Cache
// ============================================================================

/// Record a cache lookup.
pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("price_cache_lookups_total", "result" => result).increment(1);
}

/// Record LRU evictions.
pub fn record_cache_eviction(count: u64) {
    counter!("price_cache_evictions_total").increment(count);
}

// ============================================================================
// Reconciliation and Persistence
// ============================================================================

/// Record a reconciliation pass.
pub fn record_reconciliation(elapsed: Duration, mutations: usize, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("reconciliation_passes_total", "status" => status).increment(1);
    counter!("reconciliation_mutations_total").increment(mutations as u64);
    histogram!("reconciliation_duration_seconds").record(elapsed.as_secs_f64());
}

/// Record a snapshot write.
pub fn record_snapshot_flush(elapsed: Duration, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("snapshot_flushes_total", "status" => status).increment(1);
    histogram!("snapshot_flush_duration_seconds").record(elapsed.as_secs_f64());
}
