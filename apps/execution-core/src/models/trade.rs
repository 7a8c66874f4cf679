//! Trade intents, receipts, and the trade history record.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Order, OrderSide, Position};

/// A request from the strategy layer to trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeIntent {
    /// Instrument symbol.
    pub symbol: String,
    /// Buy or sell.
    pub side: OrderSide,
    /// Positive quantity to trade.
    pub quantity: i64,
    /// Worst acceptable price.
    pub limit_price: Decimal,
    /// Which strategy produced the intent.
    pub strategy_tag: String,
    /// Protective stop for the resulting position.
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
    /// Profit target for the resulting position.
    #[serde(default)]
    pub take_profit: Option<Decimal>,
}

impl TradeIntent {
    /// Create an intent without protective levels.
    #[must_use]
    pub fn new(
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: i64,
        limit_price: Decimal,
        strategy_tag: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            limit_price,
            strategy_tag: strategy_tag.into(),
            stop_loss: None,
            take_profit: None,
        }
    }

    /// An intent that flattens `position` at `limit_price`.
    #[must_use]
    pub fn closing(position: &Position, limit_price: Decimal, strategy_tag: impl Into<String>) -> Self {
        let side = if position.is_long() {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        };
        Self::new(
            position.symbol.clone(),
            side,
            position.quantity.abs(),
            limit_price,
            strategy_tag,
        )
    }

    /// Attach a stop-loss.
    #[must_use]
    pub const fn with_stop_loss(mut self, stop_loss: Decimal) -> Self {
        self.stop_loss = Some(stop_loss);
        self
    }

    /// Attach a take-profit.
    #[must_use]
    pub const fn with_take_profit(mut self, take_profit: Decimal) -> Self {
        self.take_profit = Some(take_profit);
        self
    }

    /// Quantity times limit price, `None` on overflow.
    pub fn notional(&self) -> Option<Decimal> {
        self.limit_price.checked_mul(Decimal::from(self.quantity))
    }
}

/// What the strategy layer gets back for a successful execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeReceipt {
    /// The order as acknowledged by the broker.
    pub order: Order,
    /// The position after the fill (`None` if flat or unfilled).
    pub position: Option<Position>,
    /// Cash balance after commit.
    pub cash_after: Decimal,
    /// Store version after commit.
    pub version: u64,
}

impl TradeReceipt {
    /// True when anything was filled and committed.
    #[must_use]
    pub const fn is_filled(&self) -> bool {
        self.order.filled_quantity > 0
    }
}

/// A completed fill in the append-only trade history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Locally generated trade ID.
    pub trade_id: String,
    /// Broker order ID.
    pub order_id: String,
    /// Instrument symbol.
    pub symbol: String,
    /// Side of the fill.
    pub side: OrderSide,
    /// Filled quantity (positive).
    pub quantity: i64,
    /// Average fill price.
    pub price: Decimal,
    /// Strategy that traded.
    pub strategy_tag: String,
    /// PnL realized by this fill.
    pub realized_pnl: Decimal,
    /// Commit time.
    pub executed_at: DateTime<Utc>,
}

/// Aggregate performance counters kept alongside the trade history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceCounters {
    /// Fills committed.
    pub trades_executed: u64,
    /// Fills that realized a positive PnL.
    pub winning_trades: u64,
    /// Fills that realized a negative PnL.
    pub losing_trades: u64,
    /// Cumulative realized PnL.
    pub realized_pnl: Decimal,
}

impl PerformanceCounters {
    /// Account for one committed fill.
    pub fn record(&mut self, realized_pnl: Decimal) {
        self.trades_executed += 1;
        if realized_pnl > Decimal::ZERO {
            self.winning_trades += 1;
        } else if realized_pnl < Decimal::ZERO {
            self.losing_trades += 1;
        }
        self.realized_pnl += realized_pnl;
    }

    /// Winning fills over fills that realized anything.
    #[must_use]
    pub fn win_rate(&self) -> Option<f64> {
        let decided = self.winning_trades + self.losing_trades;
        (decided > 0).then(|| self.winning_trades as f64 / decided as f64)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn test_closing_intent_for_short() {
        let position = Position::open("SBIN", -7, dec!(600), "breakout", Utc::now());
        let intent = TradeIntent::closing(&position, dec!(590), "expiry_exit");
        assert_eq!(intent.side, OrderSide::Buy);
        assert_eq!(intent.quantity, 7);
        assert_eq!(intent.notional(), Some(dec!(4130)));
    }

    #[test]
    fn test_counters_record() {
        let mut counters = PerformanceCounters::default();
        counters.record(dec!(10));
        counters.record(dec!(-4));
        counters.record(Decimal::ZERO);

        assert_eq!(counters.trades_executed, 3);
        assert_eq!(counters.winning_trades, 1);
        assert_eq!(counters.losing_trades, 1);
        assert_eq!(counters.realized_pnl, dec!(6));
        assert_eq!(counters.win_rate(), Some(0.5));
    }
}
