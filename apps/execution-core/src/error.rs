//! Error taxonomy for the execution core.
//!
//! Every boundary returns an explicit `Result`. Each variant maps to a stable
//! [`ErrorCode`] so callers and metrics can branch on the kind of failure
//! without parsing messages.
//!
//! | Code | Raised when | Retryable |
//! |------|-------------|-----------|
//! | `INVALID_REQUEST` | Intent malformed or out of bounds | no |
//! | `INSUFFICIENT_FUNDS` | Debit would drive cash negative | no |
//! | `RATE_LIMITED` | Rate limiter refused admission | yes |
//! | `ORDER_REJECTED` | Broker answered with a failure | no |
//! | `BROKER_TIMEOUT` | Broker did not answer in time | yes |
//! | `BROKER_UNAVAILABLE` | Circuit open or transport failure | yes |
//! | `RECONCILIATION_CONFLICT` | Broker view could not be applied atomically | yes |
//! | `STORE_CORRUPTED` | Durable snapshot failed to load | no |
//! | `PERSISTENCE_FAILED` | Durable snapshot failed to write | yes |

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::persistence::PersistenceError;
use crate::portfolio::PortfolioError;

/// Error codes for the execution core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed or out-of-bounds request.
    InvalidRequest,
    /// Not enough cash for the debit.
    InsufficientFunds,
    /// Rate limiter refused admission.
    RateLimited,
    /// Order rejected by broker.
    OrderRejected,
    /// Broker did not respond in time.
    BrokerTimeout,
    /// Broker unreachable or circuit open.
    BrokerUnavailable,
    /// Reconciliation pass aborted.
    ReconciliationConflict,
    /// Durable state is corrupt.
    StoreCorrupted,
    /// Durable state could not be written.
    PersistenceFailed,
}

impl ErrorCode {
    /// Get the error reason string.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::InsufficientFunds => "INSUFFICIENT_FUNDS",
            Self::RateLimited => "RATE_LIMITED",
            Self::OrderRejected => "ORDER_REJECTED",
            Self::BrokerTimeout => "BROKER_TIMEOUT",
            Self::BrokerUnavailable => "BROKER_UNAVAILABLE",
            Self::ReconciliationConflict => "RECONCILIATION_CONFLICT",
            Self::StoreCorrupted => "STORE_CORRUPTED",
            Self::PersistenceFailed => "PERSISTENCE_FAILED",
        }
    }

    /// Whether a caller may reasonably retry after backing off.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited
                | Self::BrokerTimeout
                | Self::BrokerUnavailable
                | Self::ReconciliationConflict
                | Self::PersistenceFailed
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason())
    }
}

/// Errors surfaced by the execution core.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Rejected before any lock or network call.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A debit would have driven cash negative.
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        /// Amount the debit needed.
        required: Decimal,
        /// Cash available at the time.
        available: Decimal,
    },

    /// The rate limiter refused admission; the broker was not called.
    #[error("Rate limit exceeded for '{key}'")]
    RateLimitExceeded {
        /// Rate limiter key that was exhausted.
        key: String,
    },

    /// The broker answered with a failure.
    #[error("Broker rejected request: {reason}")]
    BrokerRejected {
        /// Broker-supplied reason.
        reason: String,
    },

    /// The broker did not answer within the call timeout.
    #[error("Broker call '{operation}' timed out after {timeout_ms}ms")]
    BrokerTimeout {
        /// Broker operation name.
        operation: &'static str,
        /// Configured timeout.
        timeout_ms: u64,
    },

    /// Circuit open or transport failure; the broker could not be reached.
    #[error("Broker unavailable: {reason}")]
    BrokerUnavailable {
        /// Why the broker is unavailable.
        reason: String,
    },

    /// The broker view could not be applied atomically; nothing was changed.
    #[error("Reconciliation conflict: {0}")]
    ReconciliationConflict(String),

    /// Durable store failure.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl ExecutionError {
    /// Create a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Get the error code.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::InvalidRequest,
            Self::InsufficientFunds { .. } => ErrorCode::InsufficientFunds,
            Self::RateLimitExceeded { .. } => ErrorCode::RateLimited,
            Self::BrokerRejected { .. } => ErrorCode::OrderRejected,
            Self::BrokerTimeout { .. } => ErrorCode::BrokerTimeout,
            Self::BrokerUnavailable { .. } => ErrorCode::BrokerUnavailable,
            Self::ReconciliationConflict(_) => ErrorCode::ReconciliationConflict,
            Self::Persistence(PersistenceError::Corrupt(_)) => ErrorCode::StoreCorrupted,
            Self::Persistence(_) => ErrorCode::PersistenceFailed,
        }
    }

    /// Whether a caller may reasonably retry after backing off.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }
}

impl From<PortfolioError> for ExecutionError {
    fn from(error: PortfolioError) -> Self {
        match error {
            PortfolioError::InsufficientFunds {
                required,
                available,
            } => Self::InsufficientFunds {
                required,
                available,
            },
            PortfolioError::InvalidAmount(_) | PortfolioError::Overflow { .. } => {
                Self::Validation(error.to_string())
            }
        }
    }
}
