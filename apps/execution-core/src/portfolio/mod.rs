//! Authoritative portfolio state and its transactional mutation.
//!
//! # Locking
//!
//! - Position lock: re-entrant, so nested reads inside one logical
//!   operation can take it again on the same thread.
//! - Cash lock: exclusive. It is only reachable through
//!   [`PortfolioStore::lock_all`](store::PortfolioStore), which takes the
//!   position lock first, so position-before-cash holds everywhere.
//!
//! Writers go through [`TransactionManager`]; readers get owned copies.

mod snapshot;
mod store;
mod transaction;

use rust_decimal::Decimal;
use thiserror::Error;

pub use snapshot::PortfolioSnapshot;
pub use store::{FillRequest, LockedPortfolio, PortfolioStore, PositionMap};
pub use transaction::{Transaction, TransactionManager};

/// Errors from portfolio mutation primitives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortfolioError {
    /// The debit would drive cash negative.
    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        /// Amount requested.
        required: Decimal,
        /// Cash on hand.
        available: Decimal,
    },

    /// Cash movements must be non-negative amounts.
    #[error("invalid cash amount {0}: must be non-negative")]
    InvalidAmount(Decimal),

    /// A cash or position amount does not fit in a decimal.
    #[error("{operation} overflowed")]
    Overflow {
        /// Which amount overflowed.
        operation: &'static str,
    },
}
