//! Lock-protected portfolio state.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard, ReentrantMutex, ReentrantMutexGuard};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::PortfolioError;
use super::snapshot::PortfolioSnapshot;
use crate::models::{FillOutcome, OrderSide, PerformanceCounters, Position, TradeRecord};
use crate::persistence::PersistenceError;

/// Positions keyed by symbol.
pub type PositionMap = BTreeMap<String, Position>;

/// State guarded by the cash lock.
#[derive(Debug, Clone)]
struct CashLedger {
    cash: Decimal,
    trade_history: Vec<TradeRecord>,
    counters: PerformanceCounters,
}

/// Deep copy captured when a transaction begins.
#[derive(Debug, Clone)]
pub(crate) struct Checkpoint {
    cash: Decimal,
    positions: PositionMap,
    trade_count: usize,
    counters: PerformanceCounters,
    pub(crate) version: u64,
}

/// The authoritative portfolio.
///
/// Reads return owned copies and never expose interior references. Writes
/// are only possible through [`LockedPortfolio`], which a
/// [`Transaction`](super::Transaction) hands out.
pub struct PortfolioStore {
    positions: ReentrantMutex<RefCell<PositionMap>>,
    ledger: Mutex<CashLedger>,
    version: AtomicU64,
}

impl std::fmt::Debug for PortfolioStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortfolioStore")
            .field("version", &self.version())
            .finish_non_exhaustive()
    }
}

impl PortfolioStore {
    /// Empty portfolio holding `initial_cash`.
    #[must_use]
    pub fn new(initial_cash: Decimal) -> Self {
        Self {
            positions: ReentrantMutex::new(RefCell::new(PositionMap::new())),
            ledger: Mutex::new(CashLedger {
                cash: initial_cash.max(Decimal::ZERO),
                trade_history: Vec::new(),
                counters: PerformanceCounters::default(),
            }),
            version: AtomicU64::new(0),
        }
    }

    /// Restore a portfolio from a durable snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Corrupt`] if the snapshot violates a
    /// portfolio invariant.
    pub fn from_snapshot(snapshot: PortfolioSnapshot) -> Result<Self, PersistenceError> {
        snapshot.validate().map_err(PersistenceError::Corrupt)?;

        let positions = snapshot
            .positions
            .into_iter()
            .map(|position| (position.symbol.clone(), position))
            .collect();

        Ok(Self {
            positions: ReentrantMutex::new(RefCell::new(positions)),
            ledger: Mutex::new(CashLedger {
                cash: snapshot.cash,
                trade_history: snapshot.trade_history,
                counters: snapshot.counters,
            }),
            version: AtomicU64::new(snapshot.version),
        })
    }

    /// Current cash balance.
    ///
    /// Takes the cash lock, so it must not be called on a thread that holds
    /// an open transaction. Use [`LockedPortfolio::cash`] there instead.
    #[must_use]
    pub fn get_cash(&self) -> Decimal {
        self.ledger.lock().cash
    }

    /// Copy of the position for `symbol`, if any.
    #[must_use]
    pub fn get_position(&self, symbol: &str) -> Option<Position> {
        let guard = self.positions.lock();
        let positions = guard.borrow();
        positions.get(symbol).cloned()
    }

    /// Deep copy of all positions.
    #[must_use]
    pub fn snapshot_positions(&self) -> PositionMap {
        let guard = self.positions.lock();
        let positions = guard.borrow();
        positions.clone()
    }

    /// Monotonic mutation counter.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Number of recorded trades.
    #[must_use]
    pub fn trade_count(&self) -> usize {
        self.ledger.lock().trade_history.len()
    }

    /// Copy of the trade history in commit order.
    #[must_use]
    pub fn trade_history(&self) -> Vec<TradeRecord> {
        self.ledger.lock().trade_history.clone()
    }

    /// Copy of the performance counters.
    #[must_use]
    pub fn counters(&self) -> PerformanceCounters {
        self.ledger.lock().counters.clone()
    }

    /// Consistent image of the whole portfolio.
    #[must_use]
    pub fn snapshot(&self) -> PortfolioSnapshot {
        let locked = self.lock_all();
        locked.to_snapshot()
    }

    /// Take the position lock, then the cash lock.
    pub(crate) fn lock_all(&self) -> LockedPortfolio<'_> {
        let positions = self.positions.lock();
        let ledger = self.ledger.lock();
        LockedPortfolio {
            store: self,
            positions,
            ledger,
        }
    }
}

/// A fill to book against the portfolio.
#[derive(Debug, Clone, Copy)]
pub struct FillRequest<'a> {
    /// Broker order id.
    pub order_id: &'a str,
    /// Instrument symbol.
    pub symbol: &'a str,
    /// Fill direction.
    pub side: OrderSide,
    /// Filled quantity (unsigned).
    pub quantity: i64,
    /// Fill price.
    pub price: Decimal,
    /// Strategy that asked for the trade.
    pub strategy_tag: &'a str,
    /// Stop for a newly opened position.
    pub stop_loss: Option<Decimal>,
    /// Target for a newly opened position.
    pub take_profit: Option<Decimal>,
    /// Execution time.
    pub executed_at: DateTime<Utc>,
}

/// Both portfolio locks, held in position-then-cash order.
///
/// Field order makes the cash guard drop before the position guard.
pub struct LockedPortfolio<'a> {
    store: &'a PortfolioStore,
    ledger: MutexGuard<'a, CashLedger>,
    positions: ReentrantMutexGuard<'a, RefCell<PositionMap>>,
}

impl std::fmt::Debug for LockedPortfolio<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockedPortfolio")
            .field("cash", &self.ledger.cash)
            .field("positions", &self.positions.borrow().len())
            .field("version", &self.version())
            .finish()
    }
}

impl LockedPortfolio<'_> {
    /// Cash balance as seen inside the lock.
    #[must_use]
    pub fn cash(&self) -> Decimal {
        self.ledger.cash
    }

    /// Copy of the position for `symbol`.
    #[must_use]
    pub fn position(&self, symbol: &str) -> Option<Position> {
        self.positions.borrow().get(symbol).cloned()
    }

    /// Deep copy of all positions.
    #[must_use]
    pub fn positions(&self) -> PositionMap {
        self.positions.borrow().clone()
    }

    /// Number of recorded trades.
    #[must_use]
    pub fn trade_count(&self) -> usize {
        self.ledger.trade_history.len()
    }

    /// Copy of the performance counters.
    #[must_use]
    pub fn counters(&self) -> PerformanceCounters {
        self.ledger.counters.clone()
    }

    /// Store version as seen inside the lock.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.store.version()
    }

    /// Remove `amount` from cash.
    ///
    /// # Errors
    ///
    /// [`PortfolioError::InsufficientFunds`] if cash would go negative, or
    /// [`PortfolioError::InvalidAmount`] for a negative amount. Nothing is
    /// changed on error.
    pub fn debit_cash(&mut self, amount: Decimal) -> Result<Decimal, PortfolioError> {
        if amount < Decimal::ZERO {
            return Err(PortfolioError::InvalidAmount(amount));
        }
        if self.ledger.cash < amount {
            return Err(PortfolioError::InsufficientFunds {
                required: amount,
                available: self.ledger.cash,
            });
        }
        self.ledger.cash -= amount;
        self.bump();
        Ok(self.ledger.cash)
    }

    /// Add `amount` to cash.
    ///
    /// # Errors
    ///
    /// [`PortfolioError::InvalidAmount`] for a negative amount, or
    /// [`PortfolioError::Overflow`] if the balance would not fit. Nothing is
    /// changed on error.
    pub fn credit_cash(&mut self, amount: Decimal) -> Result<Decimal, PortfolioError> {
        if amount < Decimal::ZERO {
            return Err(PortfolioError::InvalidAmount(amount));
        }
        self.ledger.cash = self
            .ledger
            .cash
            .checked_add(amount)
            .ok_or(PortfolioError::Overflow { operation: "cash credit" })?;
        self.bump();
        Ok(self.ledger.cash)
    }

    /// Insert or replace a position. A zero quantity removes the entry.
    pub fn upsert_position(&mut self, position: Position) -> Option<Position> {
        let previous = if position.quantity == 0 {
            self.positions.borrow_mut().remove(&position.symbol)
        } else {
            self.positions
                .borrow_mut()
                .insert(position.symbol.clone(), position)
        };
        self.bump();
        previous
    }

    /// Remove the position for `symbol`, returning it if present.
    pub fn remove_position(&mut self, symbol: &str) -> Option<Position> {
        let removed = self.positions.borrow_mut().remove(symbol);
        if removed.is_some() {
            self.bump();
        }
        removed
    }

    /// Update the last known price of an open position.
    pub fn mark_price(&mut self, symbol: &str, price: Decimal) -> bool {
        let marked = match self.positions.borrow_mut().get_mut(symbol) {
            Some(position) if position.current_price != price => {
                position.current_price = price;
                true
            }
            _ => false,
        };
        if marked {
            self.bump();
        }
        marked
    }

    /// Append a trade and fold its PnL into the counters.
    pub fn record_trade(&mut self, record: TradeRecord) {
        self.ledger.counters.record(record.realized_pnl);
        self.ledger.trade_history.push(record);
        self.bump();
    }

    /// Book a fill: move cash, apply signed position arithmetic and record
    /// the trade.
    ///
    /// Buys debit `quantity * price` and sells credit it. Protective levels
    /// from the request apply to a freshly opened (or flipped) position and
    /// override existing levels only when supplied.
    ///
    /// # Errors
    ///
    /// [`PortfolioError::InsufficientFunds`] if a buy cannot be paid for,
    /// [`PortfolioError::Overflow`] if the notional, position cost or
    /// realized PnL does not fit. Nothing is changed on error.
    pub fn book_fill(&mut self, fill: &FillRequest<'_>) -> Result<FillOutcome, PortfolioError> {
        let notional = Decimal::from(fill.quantity)
            .checked_mul(fill.price)
            .ok_or(PortfolioError::Overflow { operation: "fill notional" })?;

        let current = self.position(fill.symbol);
        let signed_quantity = fill.side.sign() * fill.quantity;
        let mut outcome = Position::apply_fill(
            current.as_ref(),
            fill.symbol,
            signed_quantity,
            fill.price,
            fill.strategy_tag,
            fill.executed_at,
        )
        .ok_or(PortfolioError::Overflow { operation: "position cost" })?;
        if self
            .ledger
            .counters
            .realized_pnl
            .checked_add(outcome.realized_pnl)
            .is_none()
        {
            return Err(PortfolioError::Overflow { operation: "realized pnl" });
        }

        match fill.side {
            OrderSide::Buy => self.debit_cash(notional)?,
            OrderSide::Sell => self.credit_cash(notional)?,
        };

        match outcome.position.as_mut() {
            Some(position) => {
                let fresh = current
                    .as_ref()
                    .is_none_or(|existing| existing.quantity.signum() != position.quantity.signum());
                if fresh {
                    position.stop_loss = fill.stop_loss;
                    position.take_profit = fill.take_profit;
                } else {
                    position.stop_loss = fill.stop_loss.or(position.stop_loss);
                    position.take_profit = fill.take_profit.or(position.take_profit);
                }
                self.upsert_position(position.clone());
            }
            None => {
                self.remove_position(fill.symbol);
            }
        }

        self.record_trade(TradeRecord {
            trade_id: Uuid::new_v4().to_string(),
            order_id: fill.order_id.to_string(),
            symbol: fill.symbol.to_string(),
            side: fill.side,
            quantity: fill.quantity,
            price: fill.price,
            strategy_tag: fill.strategy_tag.to_string(),
            realized_pnl: outcome.realized_pnl,
            executed_at: fill.executed_at,
        });

        Ok(outcome)
    }

    pub(crate) fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            cash: self.ledger.cash,
            positions: self.positions(),
            trade_count: self.ledger.trade_history.len(),
            counters: self.ledger.counters.clone(),
            version: self.version(),
        }
    }

    pub(crate) fn restore(&mut self, checkpoint: &Checkpoint) {
        self.ledger.cash = checkpoint.cash;
        self.ledger.trade_history.truncate(checkpoint.trade_count);
        self.ledger.counters = checkpoint.counters.clone();
        *self.positions.borrow_mut() = checkpoint.positions.clone();
        self.bump();
    }

    fn to_snapshot(&self) -> PortfolioSnapshot {
        PortfolioSnapshot {
            cash: self.ledger.cash,
            positions: self.positions.borrow().values().cloned().collect(),
            trade_history: self.ledger.trade_history.clone(),
            counters: self.ledger.counters.clone(),
            version: self.version(),
            taken_at: Utc::now(),
        }
    }

    fn bump(&self) -> u64 {
        self.store.version.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn buy<'a>(symbol: &'a str, quantity: i64, price: Decimal) -> FillRequest<'a> {
        FillRequest {
            order_id: "ord-1",
            symbol,
            side: OrderSide::Buy,
            quantity,
            price,
            strategy_tag: "momentum",
            stop_loss: None,
            take_profit: None,
            executed_at: Utc::now(),
        }
    }

    #[test]
    fn test_debit_rejects_overdraft_without_mutation() {
        let store = PortfolioStore::new(dec!(100));
        let mut locked = store.lock_all();
        let err = locked.debit_cash(dec!(100.01)).unwrap_err();
        assert_eq!(
            err,
            PortfolioError::InsufficientFunds {
                required: dec!(100.01),
                available: dec!(100),
            }
        );
        assert_eq!(locked.cash(), dec!(100));
        assert_eq!(locked.version(), 0);
    }

    #[test]
    fn test_negative_amounts_are_rejected() {
        let store = PortfolioStore::new(dec!(100));
        let mut locked = store.lock_all();
        assert!(locked.debit_cash(dec!(-1)).is_err());
        assert!(locked.credit_cash(dec!(-1)).is_err());
    }

    #[test]
    fn test_credit_overflow_leaves_cash_alone() {
        let store = PortfolioStore::new(Decimal::MAX);
        let mut locked = store.lock_all();
        let err = locked.credit_cash(dec!(1)).unwrap_err();
        assert_eq!(err, PortfolioError::Overflow { operation: "cash credit" });
        assert_eq!(locked.cash(), Decimal::MAX);
        assert_eq!(locked.version(), 0);
    }

    #[test]
    fn test_book_fill_overflow_changes_nothing() {
        let store = PortfolioStore::new(dec!(1000));
        let mut locked = store.lock_all();
        let sell = FillRequest {
            side: OrderSide::Sell,
            ..buy("TCS", 10, Decimal::MAX / dec!(2))
        };
        let err = locked.book_fill(&sell).unwrap_err();
        assert_eq!(err, PortfolioError::Overflow { operation: "fill notional" });
        assert_eq!(locked.cash(), dec!(1000));
        assert!(locked.position("TCS").is_none());
        assert_eq!(locked.trade_count(), 0);
        assert_eq!(locked.version(), 0);
    }

    #[test]
    fn test_upsert_zero_quantity_removes() {
        let store = PortfolioStore::new(dec!(100));
        {
            let mut locked = store.lock_all();
            locked.upsert_position(Position::open("INFY", 5, dec!(10), "t", Utc::now()));
            locked.upsert_position(Position::open("INFY", 0, dec!(10), "t", Utc::now()));
        }
        assert!(store.get_position("INFY").is_none());
        assert_eq!(store.version(), 2);
    }

    #[test]
    fn test_reads_reenter_position_lock() {
        let store = PortfolioStore::new(dec!(100));
        let mut locked = store.lock_all();
        locked.upsert_position(Position::open("INFY", 5, dec!(10), "t", Utc::now()));
        // Same thread, position lock already held.
        assert_eq!(store.get_position("INFY").map(|p| p.quantity), Some(5));
        assert_eq!(store.snapshot_positions().len(), 1);
    }

    #[test]
    fn test_book_fill_round_trip_realizes_pnl() {
        let store = PortfolioStore::new(dec!(1000));
        let mut locked = store.lock_all();
        locked.book_fill(&buy("TCS", 10, dec!(50))).unwrap();
        assert_eq!(locked.cash(), dec!(500));

        let sell = FillRequest {
            side: OrderSide::Sell,
            price: dec!(60),
            ..buy("TCS", 10, dec!(60))
        };
        let outcome = locked.book_fill(&sell).unwrap();
        assert!(outcome.position.is_none());
        assert_eq!(outcome.realized_pnl, dec!(100));
        assert_eq!(locked.cash(), dec!(1100));
        assert!(locked.position("TCS").is_none());
        assert_eq!(locked.trade_count(), 2);
        assert_eq!(locked.counters().winning_trades, 1);
    }

    #[test]
    fn test_book_fill_sets_protection_on_open() {
        let store = PortfolioStore::new(dec!(1000));
        let mut locked = store.lock_all();
        let fill = FillRequest {
            stop_loss: Some(dec!(45)),
            take_profit: Some(dec!(70)),
            ..buy("TCS", 2, dec!(50))
        };
        locked.book_fill(&fill).unwrap();
        locked.book_fill(&buy("TCS", 2, dec!(52))).unwrap();

        let position = locked.position("TCS").unwrap();
        assert_eq!(position.quantity, 4);
        assert_eq!(position.stop_loss, Some(dec!(45)));
        assert_eq!(position.take_profit, Some(dec!(70)));
    }

    #[test]
    fn test_mark_price_only_bumps_on_change() {
        let store = PortfolioStore::new(dec!(100));
        let mut locked = store.lock_all();
        locked.upsert_position(Position::open("INFY", 5, dec!(10), "t", Utc::now()));
        let before = locked.version();
        assert!(!locked.mark_price("INFY", dec!(10)));
        assert!(!locked.mark_price("MISSING", dec!(10)));
        assert_eq!(locked.version(), before);
        assert!(locked.mark_price("INFY", dec!(11)));
        assert_eq!(locked.version(), before + 1);
    }

    #[test]
    fn test_snapshot_restores_into_new_store() {
        let store = PortfolioStore::new(dec!(1000));
        store.lock_all().book_fill(&buy("TCS", 3, dec!(100))).unwrap();

        let snapshot = store.snapshot();
        let restored = PortfolioStore::from_snapshot(snapshot.clone()).unwrap();
        assert_eq!(restored.get_cash(), dec!(700));
        assert_eq!(restored.get_position("TCS").map(|p| p.quantity), Some(3));
        assert_eq!(restored.version(), snapshot.version);
        assert_eq!(restored.trade_count(), 1);
    }

    #[test]
    fn test_from_snapshot_rejects_corruption() {
        let mut snapshot = PortfolioSnapshot::with_cash(dec!(10));
        snapshot
            .positions
            .push(Position::open("BAD", 0, dec!(1), "t", Utc::now()));
        let err = PortfolioStore::from_snapshot(snapshot).unwrap_err();
        assert!(matches!(err, PersistenceError::Corrupt(_)));
    }
}
