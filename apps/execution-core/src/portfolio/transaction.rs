//! Snapshot/commit/rollback around portfolio mutations.

use std::ops::{Deref, DerefMut};

use super::store::{Checkpoint, LockedPortfolio, PortfolioStore};
use crate::observability::metrics;

/// An open portfolio transaction.
///
/// Holds both store locks for its whole lifetime. Dropping it without
/// [`commit`](Self::commit) restores the state captured at `begin`.
#[derive(Debug)]
pub struct Transaction<'a> {
    locked: LockedPortfolio<'a>,
    checkpoint: Checkpoint,
    finished: bool,
}

impl<'a> Transaction<'a> {
    fn begin(store: &'a PortfolioStore) -> Self {
        let locked = store.lock_all();
        let checkpoint = locked.checkpoint();
        tracing::trace!(version = checkpoint.version, "Transaction started");
        Self {
            locked,
            checkpoint,
            finished: false,
        }
    }

    /// True once any primitive has mutated the store in this transaction.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.locked.version() != self.checkpoint.version
    }

    /// Keep the changes and release both locks. Returns the committed version.
    pub fn commit(mut self) -> u64 {
        self.finished = true;
        let version = self.locked.version();
        tracing::debug!(
            from = self.checkpoint.version,
            to = version,
            "Transaction committed"
        );
        metrics::record_transaction("commit");
        version
    }

    /// Restore the captured state and release both locks.
    pub fn rollback(mut self) {
        self.restore();
        self.finished = true;
    }

    fn restore(&mut self) {
        if self.is_dirty() {
            self.locked.restore(&self.checkpoint);
            tracing::debug!(
                version = self.checkpoint.version,
                "Transaction rolled back"
            );
        }
        metrics::record_transaction("rollback");
    }
}

impl<'a> Deref for Transaction<'a> {
    type Target = LockedPortfolio<'a>;

    fn deref(&self) -> &Self::Target {
        &self.locked
    }
}

impl DerefMut for Transaction<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.locked
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if self.is_dirty() {
                tracing::warn!(
                    version = self.checkpoint.version,
                    "Transaction dropped without commit, rolling back"
                );
            }
            self.restore();
        }
    }
}

/// Entry points for portfolio transactions.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionManager;

impl TransactionManager {
    /// Lock the store (positions, then cash) and capture a checkpoint.
    #[must_use]
    pub fn begin(store: &PortfolioStore) -> Transaction<'_> {
        Transaction::begin(store)
    }

    /// Commit `tx`, returning the store version.
    pub fn commit(tx: Transaction<'_>) -> u64 {
        tx.commit()
    }

    /// Roll `tx` back.
    pub fn rollback(tx: Transaction<'_>) {
        tx.rollback();
    }

    /// Run `operation` inside a transaction. `Ok` commits, `Err` rolls back
    /// and returns the closure's error.
    ///
    /// # Errors
    ///
    /// Whatever `operation` returns.
    pub fn run<T, E>(
        store: &PortfolioStore,
        operation: impl FnOnce(&mut Transaction<'_>) -> Result<T, E>,
    ) -> Result<T, E> {
        let mut tx = Self::begin(store);
        match operation(&mut tx) {
            Ok(value) => {
                tx.commit();
                Ok(value)
            }
            Err(error) => {
                tx.rollback();
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::models::Position;
    use crate::portfolio::PortfolioError;

    #[test]
    fn test_commit_keeps_changes() {
        let store = PortfolioStore::new(dec!(100));
        let mut tx = TransactionManager::begin(&store);
        tx.debit_cash(dec!(40)).unwrap();
        let version = TransactionManager::commit(tx);
        assert_eq!(store.get_cash(), dec!(60));
        assert_eq!(store.version(), version);
    }

    #[test]
    fn test_rollback_restores_everything() {
        let store = PortfolioStore::new(dec!(100));
        let mut tx = TransactionManager::begin(&store);
        tx.debit_cash(dec!(40)).unwrap();
        tx.upsert_position(Position::open("SBIN", 4, dec!(10), "t", Utc::now()));
        TransactionManager::rollback(tx);

        assert_eq!(store.get_cash(), dec!(100));
        assert!(store.snapshot_positions().is_empty());
    }

    #[test]
    fn test_drop_without_commit_rolls_back() {
        let store = PortfolioStore::new(dec!(100));
        {
            let mut tx = TransactionManager::begin(&store);
            tx.debit_cash(dec!(99)).unwrap();
        }
        assert_eq!(store.get_cash(), dec!(100));
    }

    #[test]
    fn test_clean_rollback_keeps_version() {
        let store = PortfolioStore::new(dec!(100));
        TransactionManager::rollback(TransactionManager::begin(&store));
        assert_eq!(store.version(), 0);
    }

    #[test]
    fn test_run_commits_on_ok_and_rolls_back_on_err() {
        let store = PortfolioStore::new(dec!(100));

        let cash = TransactionManager::run(&store, |tx| tx.debit_cash(dec!(10))).unwrap();
        assert_eq!(cash, dec!(90));

        let result: Result<(), PortfolioError> = TransactionManager::run(&store, |tx| {
            tx.debit_cash(dec!(50))?;
            tx.debit_cash(dec!(50))?;
            Ok(())
        });
        assert!(matches!(result, Err(PortfolioError::InsufficientFunds { .. })));
        assert_eq!(store.get_cash(), dec!(90));
    }
}
