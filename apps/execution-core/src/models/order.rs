//! Order-related types for the broker request/response cycle.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::broker::{OrderAck, OrderRequest};

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    /// Buy order.
    Buy,
    /// Sell order.
    Sell,
}

impl OrderSide {
    /// Sign applied to a quantity traded on this side (+1 buy, -1 sell).
    #[must_use]
    pub const fn sign(self) -> i64 {
        match self {
            Self::Buy => 1,
            Self::Sell => -1,
        }
    }

    /// The side that closes exposure opened on this side.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Stable label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order status in the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Created locally, not yet acknowledged.
    Pending,
    /// Acknowledged by the broker, not (fully) filled.
    Accepted,
    /// Completely filled.
    Filled,
    /// Rejected by the broker.
    Rejected,
    /// No answer within the request timeout.
    TimedOut,
}

impl OrderStatus {
    /// Returns true if the order can no longer change.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Rejected | Self::TimedOut)
    }

    /// Stable label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Filled => "filled",
            Self::Rejected => "rejected",
            Self::TimedOut => "timed_out",
        }
    }
}

/// A single request/response cycle with the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Broker-assigned ID once accepted, client ID before that.
    pub order_id: String,
    /// Instrument symbol.
    pub symbol: String,
    /// Order side.
    pub side: OrderSide,
    /// Requested quantity (always positive).
    pub quantity: i64,
    /// Limit price sent with the order.
    pub requested_price: Decimal,
    /// Lifecycle status.
    pub status: OrderStatus,
    /// Quantity filled so far.
    pub filled_quantity: i64,
    /// Volume-weighted fill price, if anything filled.
    pub average_fill_price: Option<Decimal>,
}

impl Order {
    /// A pending order for a request that has not been acknowledged yet.
    #[must_use]
    pub fn pending(request: &OrderRequest) -> Self {
        Self {
            order_id: request.client_order_id.clone(),
            symbol: request.symbol.clone(),
            side: request.side,
            quantity: request.quantity,
            requested_price: request.limit_price,
            status: OrderStatus::Pending,
            filled_quantity: 0,
            average_fill_price: None,
        }
    }

    /// Combine the request with the broker's acknowledgement.
    #[must_use]
    pub fn from_ack(request: &OrderRequest, ack: &OrderAck) -> Self {
        Self {
            order_id: ack.order_id.clone(),
            status: ack.status,
            filled_quantity: ack.filled_quantity,
            average_fill_price: ack.average_fill_price,
            ..Self::pending(request)
        }
    }

    /// Quantity still open at the broker.
    #[must_use]
    pub const fn remaining_quantity(&self) -> i64 {
        self.quantity - self.filled_quantity
    }

    /// Filled notional (filled quantity times average fill price).
    #[must_use]
    pub fn filled_notional(&self) -> Decimal {
        self.average_fill_price
            .map_or(Decimal::ZERO, |price| price * Decimal::from(self.filled_quantity))
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn request() -> OrderRequest {
        OrderRequest {
            client_order_id: "client-1".to_string(),
            symbol: "INFY".to_string(),
            side: OrderSide::Buy,
            quantity: 10,
            limit_price: dec!(1500),
        }
    }

    #[test]
    fn test_side_sign_and_opposite() {
        assert_eq!(OrderSide::Buy.sign(), 1);
        assert_eq!(OrderSide::Sell.sign(), -1);
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
    }

    #[test]
    fn test_from_ack_takes_broker_fields() {
        let ack = OrderAck {
            order_id: "broker-9".to_string(),
            status: OrderStatus::Accepted,
            filled_quantity: 4,
            average_fill_price: Some(dec!(1499.5)),
        };
        let order = Order::from_ack(&request(), &ack);

        assert_eq!(order.order_id, "broker-9");
        assert_eq!(order.remaining_quantity(), 6);
        assert_eq!(order.filled_notional(), dec!(5998.0));
        assert!(!order.status.is_terminal());
    }

    #[test]
    fn test_pending_has_no_fill() {
        let order = Order::pending(&request());
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.filled_notional(), Decimal::ZERO);
    }
}
