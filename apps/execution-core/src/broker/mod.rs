//! Broker boundary.
//!
//! [`BrokerClient`] is the driven port implemented by real venues and by
//! [`PaperBroker`]. Engine code never calls a client directly; every call goes
//! through [`GuardedBroker`], which requires a rate-limiter [`Permit`] and
//! routes the call through the circuit breaker with a deadline.

mod guarded;
mod paper;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{OrderSide, OrderStatus};

pub use guarded::{BrokerOperation, DEFAULT_MAX_WORKERS, GuardedBroker, Permit};
pub use paper::PaperBroker;

/// Limit order sent to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Client-generated id, echoed by the broker.
    pub client_order_id: String,
    /// Instrument symbol.
    pub symbol: String,
    /// Order side.
    pub side: OrderSide,
    /// Unsigned quantity.
    pub quantity: i64,
    /// Limit price.
    pub limit_price: Decimal,
}

/// Acknowledgement from the broker after submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAck {
    /// Broker-assigned order id.
    pub order_id: String,
    /// Status at acknowledgement time.
    pub status: OrderStatus,
    /// Quantity filled so far.
    pub filled_quantity: i64,
    /// Average fill price, if anything filled.
    pub average_fill_price: Option<Decimal>,
}

/// A position as the broker reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerPosition {
    /// Broker-formatted symbol (may carry venue prefix or series suffix).
    pub symbol: String,
    /// Signed quantity.
    pub quantity: i64,
    /// Average entry price.
    pub average_price: Decimal,
    /// Last traded price, if the broker supplies one.
    pub last_price: Option<Decimal>,
}

/// Broker port error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// Broker answered and refused the request.
    #[error("Order rejected: {reason}")]
    Rejected {
        /// Rejection reason.
        reason: String,
    },

    /// No answer within the deadline.
    #[error("Broker timed out after {elapsed_ms}ms")]
    Timeout {
        /// Time waited.
        elapsed_ms: u64,
    },

    /// Transport failure.
    #[error("Broker connection error: {message}")]
    Connection {
        /// Error details.
        message: String,
    },

    /// The broker does not know the symbol.
    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    /// The broker throttled the request.
    #[error("Rate limited by broker")]
    RateLimited,
}

impl BrokerError {
    /// Whether this failure says something about broker health.
    ///
    /// Business refusals come from a healthy broker and do not count toward
    /// opening the circuit.
    #[must_use]
    pub const fn trips_breaker(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Connection { .. } | Self::RateLimited
        )
    }
}

/// Port for broker interactions.
///
/// Calls are blocking. Implementations should bound their own transport
/// timeouts; [`GuardedBroker`] additionally abandons calls that outlive the
/// circuit breaker's call timeout.
pub trait BrokerClient: Send + Sync {
    /// Submit a limit order.
    fn place_order(&self, request: &OrderRequest) -> Result<OrderAck, BrokerError>;

    /// All positions the broker holds for the account.
    fn get_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError>;

    /// Last traded price for `symbol`.
    fn get_quote(&self, symbol: &str) -> Result<Decimal, BrokerError>;

    /// Name used in logs.
    fn broker_name(&self) -> &'static str {
        "broker"
    }
}
