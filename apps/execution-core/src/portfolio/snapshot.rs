//! Serializable image of the whole portfolio for the durable store.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{PerformanceCounters, Position, TradeRecord};

/// Point-in-time portfolio image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    /// Cash balance.
    pub cash: Decimal,
    /// Open positions, ordered by symbol.
    pub positions: Vec<Position>,
    /// Trade history in commit order.
    pub trade_history: Vec<TradeRecord>,
    /// Performance counters.
    #[serde(default)]
    pub counters: PerformanceCounters,
    /// Store version when taken.
    pub version: u64,
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
}

impl PortfolioSnapshot {
    /// An empty portfolio holding `cash`.
    #[must_use]
    pub fn with_cash(cash: Decimal) -> Self {
        Self {
            cash,
            positions: Vec::new(),
            trade_history: Vec::new(),
            counters: PerformanceCounters::default(),
            version: 0,
            taken_at: Utc::now(),
        }
    }

    /// Check the portfolio invariants a loaded snapshot must satisfy.
    pub fn validate(&self) -> Result<(), String> {
        if self.cash < Decimal::ZERO {
            return Err(format!("negative cash balance {}", self.cash));
        }

        let mut seen = HashSet::with_capacity(self.positions.len());
        for position in &self.positions {
            if position.symbol.trim().is_empty() {
                return Err("position with empty symbol".to_string());
            }
            if position.quantity == 0 {
                return Err(format!("zero-quantity position for {}", position.symbol));
            }
            if !seen.insert(position.symbol.as_str()) {
                return Err(format!("duplicate position for {}", position.symbol));
            }
        }

        if self.counters.trades_executed < self.trade_history.len() as u64 {
            return Err(format!(
                "counters report {} trades but history holds {}",
                self.counters.trades_executed,
                self.trade_history.len()
            ));
        }

        Ok(())
    }
}
