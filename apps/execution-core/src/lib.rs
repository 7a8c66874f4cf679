// Allow unwrap/expect in tests - tests should panic on unexpected errors
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::items_after_statements
    )
)]

//! Execution Core
//!
//! Authoritative portfolio state for a single trading process, and the
//! machinery that mutates it.
//!
//! # Components
//!
//! - `portfolio`: cash, positions and trade history behind one lock
//!   hierarchy, mutated only inside transactions
//! - `execution`: validates trade intents and executes them atomically
//!   against the broker
//! - `broker`: the broker port, its rate-limited and circuit-broken wrapper,
//!   and a paper broker
//! - `resilience`: sliding-window rate limiter, circuit breaker, backoff
//! - `market_data`: TTL/LRU quote cache and the price publisher seam
//! - `reconciliation`: periodic alignment of local positions with the broker
//! - `contract`: derivative identifier parsing and expiry resolution
//! - `persistence`: durable portfolio snapshots
//! - `config`, `observability`: YAML configuration and Prometheus metrics

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

pub mod broker;
pub mod config;
pub mod contract;
pub mod error;
pub mod execution;
pub mod market_data;
pub mod models;
pub mod observability;
pub mod persistence;
pub mod portfolio;
pub mod reconciliation;
pub mod resilience;

pub use broker::{BrokerClient, BrokerError, GuardedBroker, PaperBroker};
pub use contract::{ContractResolver, ExpiryCalendar};
pub use error::{ErrorCode, ExecutionError};
pub use execution::{ExecutionEngine, OrderLimits};
pub use market_data::{PriceCache, PricePublisher};
pub use models::{Order, OrderSide, OrderStatus, Position, TradeIntent, TradeReceipt};
pub use portfolio::{PortfolioSnapshot, PortfolioStore, TransactionManager};
pub use reconciliation::{ReconciliationReport, ReconciliationScheduler, ReconciliationService};
pub use resilience::{CircuitBreaker, RateLimiter};
