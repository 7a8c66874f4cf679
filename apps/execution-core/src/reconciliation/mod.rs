//! Position reconciliation against the broker.
//!
//! A pass fetches the broker's positions (before taking any store lock),
//! normalizes their symbols, and applies the difference to the store inside
//! one transaction. Broker-only positions are adopted with the `external`
//! strategy tag, local-only positions are dropped and mismatched ones take the
//! broker's quantity and average price. Running a pass twice in a row leaves
//! the second one with nothing to do.

mod normalize;
mod report;
mod scheduler;
mod service;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::error::ExecutionError;

pub use normalize::normalize_symbol;
pub use report::{DiscrepancyKind, PositionDiscrepancy, ReconciliationReport};
pub use scheduler::ReconciliationScheduler;
pub use service::{ReconciliationService, diff_positions, index_broker_positions};

/// Reasons a broker position list cannot be applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconciliationError {
    /// Two broker entries normalize to the same symbol.
    #[error("duplicate broker position for {symbol}")]
    DuplicateSymbol {
        /// Normalized symbol.
        symbol: String,
    },

    /// A broker entry has no usable symbol.
    #[error("broker position with empty symbol ('{raw}')")]
    EmptySymbol {
        /// Symbol as reported.
        raw: String,
    },

    /// A broker entry that would be written carries a non-positive price.
    #[error("broker position {symbol} has non-positive average price {price}")]
    InvalidPrice {
        /// Normalized symbol.
        symbol: String,
        /// Reported average price.
        price: Decimal,
    },
}

impl From<ReconciliationError> for ExecutionError {
    fn from(error: ReconciliationError) -> Self {
        Self::ReconciliationConflict(error.to_string())
    }
}
