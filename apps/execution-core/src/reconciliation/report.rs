//! Reconciliation report types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// How a position differed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyKind {
    /// Held at the broker only.
    Added,
    /// Held locally only.
    Removed,
    /// Held on both sides with different quantity or price.
    Updated,
}

impl DiscrepancyKind {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::Updated => "updated",
        }
    }
}

/// One corrected position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionDiscrepancy {
    /// Normalized symbol.
    pub symbol: String,
    /// Kind of correction.
    pub kind: DiscrepancyKind,
    /// Local quantity before the pass.
    pub local_quantity: Option<i64>,
    /// Local entry price before the pass.
    pub local_price: Option<Decimal>,
    /// Broker quantity.
    pub broker_quantity: Option<i64>,
    /// Broker average price.
    pub broker_price: Option<Decimal>,
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    /// Corrections applied.
    pub discrepancies: Vec<PositionDiscrepancy>,
    /// Broker positions considered after normalization.
    pub broker_positions: usize,
    /// Local positions before the pass.
    pub local_positions: usize,
    /// Number of store mutations committed.
    pub mutations: usize,
    /// Store version before the pass.
    pub version_before: u64,
    /// Store version after commit.
    pub version_after: u64,
    /// When the pass started.
    pub started_at: DateTime<Utc>,
    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl ReconciliationReport {
    /// True if the store already matched the broker.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.discrepancies.is_empty()
    }

    /// Number of discrepancies of `kind`.
    #[must_use]
    pub fn count(&self, kind: DiscrepancyKind) -> usize {
        self.discrepancies.iter().filter(|d| d.kind == kind).count()
    }

    /// Broker-only positions adopted.
    #[must_use]
    pub fn added(&self) -> usize {
        self.count(DiscrepancyKind::Added)
    }

    /// Local-only positions dropped.
    #[must_use]
    pub fn removed(&self) -> usize {
        self.count(DiscrepancyKind::Removed)
    }

    /// Positions corrected in place.
    #[must_use]
    pub fn updated(&self) -> usize {
        self.count(DiscrepancyKind::Updated)
    }
}
