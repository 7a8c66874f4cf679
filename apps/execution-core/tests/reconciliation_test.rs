//! Reconciliation against the paper broker, end to end.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;

use common::{ScriptedBroker, broker_position, generous_limits, guarded, paper_harness, test_breaker_config};
use execution_core::broker::BrokerClient;
use execution_core::error::ErrorCode;
use execution_core::models::{EXTERNAL_STRATEGY_TAG, OrderSide, TradeIntent};
use execution_core::portfolio::PortfolioStore;
use execution_core::reconciliation::{DiscrepancyKind, ReconciliationScheduler, ReconciliationService};

#[test]
fn test_out_of_band_changes_are_applied_then_idempotent() {
    let (h, paper) = paper_harness(dec!(100000));
    h.engine
        .execute(TradeIntent::new("ITC", OrderSide::Buy, 10, dec!(400), "carry"))
        .unwrap();
    h.engine
        .execute(TradeIntent::new("TCS", OrderSide::Buy, 1, dec!(3500), "carry"))
        .unwrap();

    paper.set_position("ITC", 15, dec!(410));
    paper.set_position("TCS", 0, dec!(0));
    paper.set_position("NSE:WIPRO-EQ", 7, dec!(300));

    let service = ReconciliationService::new(Arc::clone(&h.broker), Arc::clone(&h.store));
    let cash_before = h.store.get_cash();
    let report = service.run_once().unwrap();

    assert_eq!(report.count(DiscrepancyKind::Added), 1);
    assert_eq!(report.count(DiscrepancyKind::Removed), 1);
    assert_eq!(report.count(DiscrepancyKind::Updated), 1);
    assert_eq!(h.store.get_cash(), cash_before);

    let itc = h.store.get_position("ITC").unwrap();
    assert_eq!(itc.quantity, 15);
    assert_eq!(itc.entry_price, dec!(410));
    assert_eq!(itc.strategy_tag, "carry");
    assert!(h.store.get_position("TCS").is_none());
    let wipro = h.store.get_position("WIPRO").unwrap();
    assert_eq!(wipro.strategy_tag, EXTERNAL_STRATEGY_TAG);

    let version = h.store.version();
    let second = service.run_once().unwrap();
    assert!(second.is_clean());
    assert_eq!(h.store.version(), version);
}

#[test]
fn test_conflicting_broker_view_changes_nothing() {
    let scripted = Arc::new(ScriptedBroker::new());
    scripted.set_positions(vec![
        broker_position("NSE:ITC-EQ", 5, dec!(400)),
        broker_position("ITC", 6, dec!(401)),
    ]);
    let broker = guarded(
        Arc::clone(&scripted) as Arc<dyn BrokerClient>,
        generous_limits(),
        test_breaker_config(),
    );
    let store = Arc::new(PortfolioStore::new(dec!(1000)));
    let service = ReconciliationService::new(broker, Arc::clone(&store));

    let err = service.run_once().unwrap_err();
    assert_eq!(err.code(), ErrorCode::ReconciliationConflict);
    assert!(store.snapshot_positions().is_empty());
    assert_eq!(store.version(), 0);
    assert!(service.last_report().is_none());
}

#[test]
fn test_invalid_price_aborts_whole_pass() {
    let scripted = Arc::new(ScriptedBroker::new());
    scripted.set_positions(vec![
        broker_position("AAA", 5, dec!(10)),
        broker_position("BBB", 5, dec!(0)),
    ]);
    let broker = guarded(
        Arc::clone(&scripted) as Arc<dyn BrokerClient>,
        generous_limits(),
        test_breaker_config(),
    );
    let store = Arc::new(PortfolioStore::new(dec!(1000)));
    let service = ReconciliationService::new(broker, Arc::clone(&store));

    assert!(service.run_once().is_err());
    assert!(store.get_position("AAA").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scheduler_runs_until_cancelled() {
    let (h, paper) = paper_harness(dec!(1000));
    paper.set_position("ITC", 3, dec!(400));
    let service = Arc::new(ReconciliationService::new(
        Arc::clone(&h.broker),
        Arc::clone(&h.store),
    ));

    let cancel = CancellationToken::new();
    let handle = ReconciliationScheduler::new(Arc::clone(&service), Duration::from_millis(20))
        .spawn(cancel.clone());

    tokio::time::sleep(Duration::from_millis(300)).await;
    cancel.cancel();
    tokio_test::assert_ok!(handle.await);

    assert_eq!(h.store.get_position("ITC").unwrap().quantity, 3);
    assert!(service.last_report().unwrap().is_clean());
}
