//! In-process simulated broker.
//!
//! Limit orders fill completely at the limit price, unless a quote is known
//! and the limit is not marketable, in which case the order rests as
//! `Accepted` with nothing filled.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use rust_decimal::Decimal;

use super::{BrokerClient, BrokerError, BrokerPosition, OrderAck, OrderRequest};
use crate::models::{OrderSide, OrderStatus, Position};

#[derive(Debug, Default)]
struct PaperState {
    positions: BTreeMap<String, BrokerPosition>,
    quotes: HashMap<String, Decimal>,
    next_order_id: u64,
}

/// Paper-trading broker.
#[derive(Debug, Default)]
pub struct PaperBroker {
    state: Mutex<PaperState>,
}

impl PaperBroker {
    /// Empty account.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Account that already holds `positions`.
    #[must_use]
    pub fn with_positions<'a>(positions: impl IntoIterator<Item = &'a Position>) -> Self {
        let broker = Self::new();
        {
            let mut state = broker.state.lock();
            for position in positions {
                state.positions.insert(
                    position.symbol.clone(),
                    BrokerPosition {
                        symbol: position.symbol.clone(),
                        quantity: position.quantity,
                        average_price: position.entry_price,
                        last_price: Some(position.current_price),
                    },
                );
            }
        }
        broker
    }

    /// Set the last traded price for `symbol`.
    pub fn set_quote(&self, symbol: &str, price: Decimal) {
        let mut state = self.state.lock();
        state.quotes.insert(symbol.to_string(), price);
        if let Some(position) = state.positions.get_mut(symbol) {
            position.last_price = Some(price);
        }
    }

    /// Overwrite or remove a broker-side position, as if changed out of band.
    pub fn set_position(&self, symbol: &str, quantity: i64, average_price: Decimal) {
        let mut state = self.state.lock();
        if quantity == 0 {
            state.positions.remove(symbol);
        } else {
            let last_price = state.quotes.get(symbol).copied();
            state.positions.insert(
                symbol.to_string(),
                BrokerPosition {
                    symbol: symbol.to_string(),
                    quantity,
                    average_price,
                    last_price,
                },
            );
        }
    }

    fn apply_fill(state: &mut PaperState, request: &OrderRequest) {
        let signed = request.side.sign() * request.quantity;
        let price = request.limit_price;
        let updated = match state.positions.get(&request.symbol) {
            None => Some((signed, price)),
            Some(existing) => {
                let quantity = existing.quantity + signed;
                if quantity == 0 {
                    None
                } else if existing.quantity.signum() == signed.signum() {
                    let cost = existing.average_price * Decimal::from(existing.quantity.abs())
                        + price * Decimal::from(request.quantity);
                    Some((quantity, (cost / Decimal::from(quantity.abs())).normalize()))
                } else if existing.quantity.signum() == quantity.signum() {
                    Some((quantity, existing.average_price))
                } else {
                    Some((quantity, price))
                }
            }
        };

        match updated {
            Some((quantity, average_price)) => {
                state.positions.insert(
                    request.symbol.clone(),
                    BrokerPosition {
                        symbol: request.symbol.clone(),
                        quantity,
                        average_price,
                        last_price: Some(price),
                    },
                );
            }
            None => {
                state.positions.remove(&request.symbol);
            }
        }
    }
}

impl BrokerClient for PaperBroker {
    fn place_order(&self, request: &OrderRequest) -> Result<OrderAck, BrokerError> {
        if request.quantity <= 0 {
            return Err(BrokerError::Rejected {
                reason: format!("quantity must be positive, got {}", request.quantity),
            });
        }
        if request.limit_price <= Decimal::ZERO {
            return Err(BrokerError::Rejected {
                reason: format!("limit price must be positive, got {}", request.limit_price),
            });
        }

        let mut state = self.state.lock();
        state.next_order_id += 1;
        let order_id = format!("paper-{}", state.next_order_id);

        let marketable = state
            .quotes
            .get(&request.symbol)
            .is_none_or(|&quote| match request.side {
                OrderSide::Buy => request.limit_price >= quote,
                OrderSide::Sell => request.limit_price <= quote,
            });

        if !marketable {
            tracing::debug!(
                order_id = %order_id,
                symbol = %request.symbol,
                "Paper order resting, limit not marketable"
            );
            return Ok(OrderAck {
                order_id,
                status: OrderStatus::Accepted,
                filled_quantity: 0,
                average_fill_price: None,
            });
        }

        Self::apply_fill(&mut state, request);
        tracing::debug!(
            order_id = %order_id,
            symbol = %request.symbol,
            side = %request.side,
            quantity = request.quantity,
            price = %request.limit_price,
            "Paper order filled"
        );

        Ok(OrderAck {
            order_id,
            status: OrderStatus::Filled,
            filled_quantity: request.quantity,
            average_fill_price: Some(request.limit_price),
        })
    }

    fn get_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        Ok(self.state.lock().positions.values().cloned().collect())
    }

    fn get_quote(&self, symbol: &str) -> Result<Decimal, BrokerError> {
        let state = self.state.lock();
        state
            .quotes
            .get(symbol)
            .copied()
            .or_else(|| state.positions.get(symbol).and_then(|p| p.last_price))
            .ok_or_else(|| BrokerError::UnknownSymbol(symbol.to_string()))
    }

    fn broker_name(&self) -> &'static str {
        "paper"
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal_macros::dec;

    use super::*;

    fn order(side: OrderSide, quantity: i64, price: Decimal) -> OrderRequest {
        OrderRequest {
            client_order_id: "c-1".to_string(),
            symbol: "HDFC".to_string(),
            side,
            quantity,
            limit_price: price,
        }
    }

    #[test]
    fn test_fills_at_limit_and_tracks_position() {
        let broker = PaperBroker::new();
        let ack = broker
            .place_order(&order(OrderSide::Buy, 10, dec!(100)))
            .unwrap();
        assert_eq!(ack.status, OrderStatus::Filled);
        assert_eq!(ack.filled_quantity, 10);

        broker
            .place_order(&order(OrderSide::Buy, 10, dec!(110)))
            .unwrap();
        let positions = broker.get_positions().unwrap();
        assert_eq!(positions[0].quantity, 20);
        assert_eq!(positions[0].average_price, dec!(105));

        broker
            .place_order(&order(OrderSide::Sell, 20, dec!(120)))
            .unwrap();
        assert!(broker.get_positions().unwrap().is_empty());
    }

    #[test]
    fn test_non_marketable_limit_rests() {
        let broker = PaperBroker::new();
        broker.set_quote("HDFC", dec!(100));
        let ack = broker
            .place_order(&order(OrderSide::Buy, 5, dec!(99)))
            .unwrap();
        assert_eq!(ack.status, OrderStatus::Accepted);
        assert_eq!(ack.filled_quantity, 0);
        assert!(broker.get_positions().unwrap().is_empty());
    }

    #[test]
    fn test_rejects_non_positive_quantity() {
        let broker = PaperBroker::new();
        let err = broker
            .place_order(&order(OrderSide::Buy, 0, dec!(100)))
            .unwrap_err();
        assert!(matches!(err, BrokerError::Rejected { .. }));
    }

    #[test]
    fn test_seeded_positions_and_quotes() {
        let seed = Position::open("HDFC", 3, dec!(50), "t", Utc::now());
        let broker = PaperBroker::with_positions([&seed]);
        assert_eq!(broker.get_quote("HDFC").unwrap(), dec!(50));
        assert!(matches!(
            broker.get_quote("NOPE"),
            Err(BrokerError::UnknownSymbol(_))
        ));
    }
}
