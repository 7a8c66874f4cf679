//! Pre-trade checks. These run before any lock is taken or network call made.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ExecutionError;
use crate::models::{OrderSide, TradeIntent};

/// Per-order bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLimits {
    /// Largest quantity accepted in one order.
    pub max_order_quantity: i64,
    /// Largest notional (quantity times limit price) accepted in one order.
    pub max_order_notional: Option<Decimal>,
}

impl Default for OrderLimits {
    fn default() -> Self {
        Self {
            max_order_quantity: 1_000_000,
            max_order_notional: None,
        }
    }
}

/// Reject malformed or out-of-bounds intents.
///
/// # Errors
///
/// [`ExecutionError::Validation`] naming the first failed check.
pub fn validate_intent(intent: &TradeIntent, limits: &OrderLimits) -> Result<(), ExecutionError> {
    if intent.symbol.trim().is_empty() {
        return Err(ExecutionError::validation("symbol must not be empty"));
    }
    if intent.symbol.trim() != intent.symbol {
        return Err(ExecutionError::validation(format!(
            "symbol '{}' has surrounding whitespace",
            intent.symbol
        )));
    }
    if intent.strategy_tag.trim().is_empty() {
        return Err(ExecutionError::validation("strategy_tag must not be empty"));
    }
    if intent.quantity <= 0 {
        return Err(ExecutionError::validation(format!(
            "quantity must be positive, got {}",
            intent.quantity
        )));
    }
    if intent.quantity > limits.max_order_quantity {
        return Err(ExecutionError::validation(format!(
            "quantity {} exceeds maximum {}",
            intent.quantity, limits.max_order_quantity
        )));
    }
    if intent.limit_price <= Decimal::ZERO {
        return Err(ExecutionError::validation(format!(
            "limit_price must be positive, got {}",
            intent.limit_price
        )));
    }
    let Some(notional) = intent.notional() else {
        return Err(ExecutionError::validation(format!(
            "notional of {} at {} is out of range",
            intent.quantity, intent.limit_price
        )));
    };
    if let Some(max) = limits.max_order_notional {
        if notional > max {
            return Err(ExecutionError::validation(format!(
                "notional {notional} exceeds maximum {max}"
            )));
        }
    }

    validate_protection(intent)
}

fn validate_protection(intent: &TradeIntent) -> Result<(), ExecutionError> {
    let price = intent.limit_price;
    for (name, level) in [("stop_loss", intent.stop_loss), ("take_profit", intent.take_profit)] {
        if level.is_some_and(|level| level <= Decimal::ZERO) {
            return Err(ExecutionError::validation(format!("{name} must be positive")));
        }
    }

    // Stops sit on the losing side of the entry, targets on the winning side.
    let (stop_ok, target_ok) = match intent.side {
        OrderSide::Buy => (
            intent.stop_loss.is_none_or(|stop| stop < price),
            intent.take_profit.is_none_or(|target| target > price),
        ),
        OrderSide::Sell => (
            intent.stop_loss.is_none_or(|stop| stop > price),
            intent.take_profit.is_none_or(|target| target < price),
        ),
    };
    if !stop_ok {
        return Err(ExecutionError::validation(format!(
            "stop_loss is on the wrong side of limit {price} for a {} order",
            intent.side
        )));
    }
    if !target_ok {
        return Err(ExecutionError::validation(format!(
            "take_profit is on the wrong side of limit {price} for a {} order",
            intent.side
        )));
    }
    Ok(())
}
