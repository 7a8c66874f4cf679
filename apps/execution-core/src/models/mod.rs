//! Core domain models for the execution core.
//!
//! Orders exchanged with the broker, positions held by the portfolio,
//! and the trade intents/receipts that cross the strategy boundary.

mod order;
mod position;
mod trade;

pub use order::{Order, OrderSide, OrderStatus};
pub use position::{EXTERNAL_STRATEGY_TAG, FillOutcome, Position};
pub use trade::{PerformanceCounters, TradeIntent, TradeReceipt, TradeRecord};
