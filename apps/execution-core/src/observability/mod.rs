//! Observability for the execution core.
//!
//! Logging goes through `tracing` everywhere; this module holds the
//! Prometheus metrics surface.

pub mod metrics;

pub use metrics::{MetricsConfig, MetricsError, init_metrics};
