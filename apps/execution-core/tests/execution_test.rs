//! Atomicity of trade execution against scripted and paper brokers.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use common::{ScriptedBroker, ack, harness_with, paper_harness};
use execution_core::broker::{BrokerClient, BrokerError};
use execution_core::error::{ErrorCode, ExecutionError};
use execution_core::models::{OrderSide, OrderStatus, TradeIntent};

fn buy(symbol: &str, quantity: i64, price: Decimal) -> TradeIntent {
    TradeIntent::new(symbol, OrderSide::Buy, quantity, price, "momentum")
}

fn sell(symbol: &str, quantity: i64, price: Decimal) -> TradeIntent {
    TradeIntent::new(symbol, OrderSide::Sell, quantity, price, "momentum")
}

#[test]
fn test_buy_then_sell_round_trip() {
    let (h, _) = paper_harness(dec!(10000));

    let receipt = h.engine.execute(buy("INFY", 10, dec!(100))).unwrap();
    assert!(receipt.is_filled());
    assert_eq!(receipt.cash_after, dec!(9000));
    assert_eq!(receipt.position.as_ref().unwrap().quantity, 10);

    let receipt = h.engine.execute(sell("INFY", 10, dec!(120))).unwrap();
    assert_eq!(receipt.cash_after, dec!(10200));
    assert!(receipt.position.is_none());
    assert!(h.store.get_position("INFY").is_none());
    assert_eq!(h.store.trade_count(), 2);
    assert_eq!(h.store.counters().trades_executed, 2);
}

#[test]
fn test_insufficient_funds_never_calls_broker() {
    let scripted = Arc::new(ScriptedBroker::new());
    let h = harness_with(Arc::clone(&scripted) as Arc<dyn BrokerClient>, dec!(500));
    let version = h.store.version();

    let err = h.engine.execute(buy("TCS", 10, dec!(100))).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InsufficientFunds);
    assert_eq!(scripted.order_calls(), 0);
    assert_eq!(h.store.get_cash(), dec!(500));
    assert_eq!(h.store.version(), version);
}

#[test]
fn test_broker_rejection_rolls_back_reservation() {
    let scripted = Arc::new(ScriptedBroker::new());
    scripted.push(Err(BrokerError::Rejected {
        reason: "margin".to_string(),
    }));
    let h = harness_with(Arc::clone(&scripted) as Arc<dyn BrokerClient>, dec!(5000));

    let err = h.engine.execute(buy("TCS", 10, dec!(100))).unwrap_err();
    assert!(matches!(err, ExecutionError::BrokerRejected { .. }));
    assert_eq!(h.store.get_cash(), dec!(5000));
    assert!(h.store.snapshot_positions().is_empty());
    assert_eq!(h.store.trade_count(), 0);
}

#[test]
fn test_rejected_status_in_ack_rolls_back() {
    let scripted = Arc::new(ScriptedBroker::new());
    scripted.push(Ok(ack(OrderStatus::Rejected, 0, None)));
    let h = harness_with(Arc::clone(&scripted) as Arc<dyn BrokerClient>, dec!(5000));

    assert!(h.engine.execute(buy("TCS", 1, dec!(100))).is_err());
    assert_eq!(h.store.get_cash(), dec!(5000));
}

#[test]
fn test_late_broker_response_is_discarded() {
    let scripted = Arc::new(ScriptedBroker::new());
    scripted.set_delay(Duration::from_millis(600));
    let h = harness_with(Arc::clone(&scripted) as Arc<dyn BrokerClient>, dec!(5000));

    let err = h.engine.execute(buy("TCS", 10, dec!(100))).unwrap_err();
    assert_eq!(err.code(), ErrorCode::BrokerTimeout);

    // Let the slow call finish; its fill must not reach the store.
    std::thread::sleep(Duration::from_millis(700));
    assert_eq!(h.store.get_cash(), dec!(5000));
    assert!(h.store.get_position("TCS").is_none());
    assert_eq!(scripted.order_calls(), 1);
}

#[test]
fn test_partial_fill_books_only_filled_quantity() {
    let scripted = Arc::new(ScriptedBroker::new());
    scripted.push(Ok(ack(OrderStatus::Accepted, 4, Some(dec!(99)))));
    let h = harness_with(Arc::clone(&scripted) as Arc<dyn BrokerClient>, dec!(5000));

    let receipt = h.engine.execute(buy("TCS", 10, dec!(100))).unwrap();
    assert_eq!(receipt.order.filled_quantity, 4);
    assert_eq!(receipt.cash_after, dec!(5000) - dec!(396));
    assert_eq!(h.store.get_position("TCS").unwrap().quantity, 4);
}

#[test]
fn test_unfilled_order_leaves_portfolio_unchanged() {
    let (h, paper) = paper_harness(dec!(5000));
    paper.set_quote("HDFC", dec!(100));

    let receipt = h.engine.execute(buy("HDFC", 5, dec!(90))).unwrap();
    assert_eq!(receipt.order.status, OrderStatus::Accepted);
    assert!(!receipt.is_filled());
    assert_eq!(receipt.cash_after, dec!(5000));
    assert!(h.store.snapshot_positions().is_empty());
    assert_eq!(h.store.trade_count(), 0);
}

#[test]
fn test_overfill_is_refused() {
    let scripted = Arc::new(ScriptedBroker::new());
    scripted.push(Ok(ack(OrderStatus::Filled, 11, Some(dec!(100)))));
    let h = harness_with(Arc::clone(&scripted) as Arc<dyn BrokerClient>, dec!(5000));

    assert!(h.engine.execute(buy("TCS", 10, dec!(100))).is_err());
    assert_eq!(h.store.get_cash(), dec!(5000));
}

#[test]
fn test_short_sale_opens_negative_position() {
    let (h, _) = paper_harness(dec!(1000));

    let receipt = h.engine.execute(sell("SBIN", 3, dec!(600))).unwrap();
    assert_eq!(receipt.position.unwrap().quantity, -3);
    assert_eq!(receipt.cash_after, dec!(2800));
}

#[test]
fn test_validation_failure_has_no_side_effects() {
    let scripted = Arc::new(ScriptedBroker::new());
    let h = harness_with(Arc::clone(&scripted) as Arc<dyn BrokerClient>, dec!(1000));

    let err = h.engine.execute(buy("", 1, dec!(1))).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidRequest);
    assert_eq!(scripted.order_calls(), 0);
    assert_eq!(h.broker.limiter().admitted_count(), 0);
}

#[test]
fn test_oversized_limit_price_is_a_validation_error() {
    let scripted = Arc::new(ScriptedBroker::new());
    let h = harness_with(Arc::clone(&scripted) as Arc<dyn BrokerClient>, dec!(1000));

    let err = h
        .engine
        .execute(buy("ITC", 10, Decimal::MAX / dec!(2)))
        .unwrap_err();
    assert!(matches!(err, ExecutionError::Validation(_)));
    assert_eq!(scripted.order_calls(), 0);
    assert_eq!(h.store.get_cash(), dec!(1000));
    assert_eq!(h.store.version(), 0);
}

#[test]
fn test_unbookable_fill_price_rolls_back() {
    let scripted = Arc::new(ScriptedBroker::new());
    scripted.push(Ok(ack(OrderStatus::Filled, 10, Some(Decimal::MAX / dec!(2)))));
    let h = harness_with(Arc::clone(&scripted) as Arc<dyn BrokerClient>, dec!(1000));

    let err = h.engine.execute(sell("ITC", 10, dec!(400))).unwrap_err();
    assert_eq!(err.code(), ErrorCode::OrderRejected);
    assert_eq!(scripted.order_calls(), 1);
    assert_eq!(h.store.get_cash(), dec!(1000));
    assert!(h.store.get_position("ITC").is_none());
    assert_eq!(h.store.trade_count(), 0);
}

#[test]
fn test_concurrent_buys_never_overdraw() {
    let (h, _) = paper_harness(dec!(1000));
    let engine = Arc::new(h.engine);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || engine.execute(buy(&format!("SYM{i}"), 2, dec!(100))))
        })
        .collect();
    let filled = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .filter(Result::is_ok)
        .count();

    assert_eq!(filled, 5);
    assert_eq!(h.store.get_cash(), dec!(0));
    assert_eq!(h.store.snapshot_positions().len(), 5);
}
