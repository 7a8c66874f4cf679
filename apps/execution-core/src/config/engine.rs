//! Engine configuration: starting capital and per-order bounds.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::execution::OrderLimits;

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Cash the portfolio starts with when no snapshot exists.
    #[serde(default = "default_initial_cash")]
    pub initial_cash: Decimal,
    /// Largest notional accepted in one order. Unbounded if absent.
    #[serde(default)]
    pub max_order_notional: Option<Decimal>,
    /// Largest quantity accepted in one order.
    #[serde(default = "default_max_order_quantity")]
    pub max_order_quantity: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_cash: default_initial_cash(),
            max_order_notional: None,
            max_order_quantity: default_max_order_quantity(),
        }
    }
}

impl EngineConfig {
    /// Per-order bounds for the engine.
    #[must_use]
    pub const fn to_order_limits(&self) -> OrderLimits {
        OrderLimits {
            max_order_quantity: self.max_order_quantity,
            max_order_notional: self.max_order_notional,
        }
    }
}

fn default_initial_cash() -> Decimal {
    Decimal::new(100_000, 0)
}

const fn default_max_order_quantity() -> i64 {
    1_000_000
}
