//! Portfolio invariants under arbitrary intent sequences.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use common::paper_harness;
use execution_core::models::{OrderSide, TradeIntent};

fn intent_strategy() -> impl Strategy<Value = TradeIntent> {
    (
        prop::sample::select(vec!["ITC", "SBIN", "TCS"]),
        any::<bool>(),
        1i64..50,
        1u32..500,
    )
        .prop_map(|(symbol, is_buy, quantity, price)| {
            let side = if is_buy { OrderSide::Buy } else { OrderSide::Sell };
            TradeIntent::new(symbol, side, quantity, Decimal::from(price), "prop")
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_cash_never_negative_and_no_flat_positions(
        intents in prop::collection::vec(intent_strategy(), 1..30)
    ) {
        let (h, _) = paper_harness(dec!(20000));
        let mut filled = 0usize;

        for intent in intents {
            let version_before = h.store.version();
            match h.engine.execute(intent) {
                Ok(receipt) => {
                    filled += usize::from(receipt.is_filled());
                    prop_assert!(receipt.version > version_before);
                }
                Err(_) => {}
            }
            prop_assert!(h.store.get_cash() >= Decimal::ZERO);
            for position in h.store.snapshot_positions().values() {
                prop_assert_ne!(position.quantity, 0);
            }
        }

        prop_assert_eq!(h.store.trade_count(), filled);
        prop_assert!(h.store.snapshot().validate().is_ok());
    }

    #[test]
    fn test_failed_execution_restores_cash(quantity in 1i64..1000, price in 1u32..1000) {
        let (h, _) = paper_harness(dec!(100));
        let intent = TradeIntent::new("ITC", OrderSide::Buy, quantity, Decimal::from(price), "prop");
        let affordable = intent.notional().is_some_and(|notional| notional <= dec!(100));

        let result = h.engine.execute(intent);
        prop_assert_eq!(result.is_ok(), affordable);
        if !affordable {
            prop_assert_eq!(h.store.get_cash(), dec!(100));
        }
    }
}
