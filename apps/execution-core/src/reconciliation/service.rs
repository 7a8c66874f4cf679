//! The reconciliation pass.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;

use super::normalize::normalize_symbol;
use super::report::{DiscrepancyKind, PositionDiscrepancy, ReconciliationReport};
use super::ReconciliationError;
use crate::broker::{BrokerOperation, BrokerPosition, GuardedBroker};
use crate::error::ExecutionError;
use crate::models::{EXTERNAL_STRATEGY_TAG, Position};
use crate::observability::metrics;
use crate::persistence::SnapshotPersister;
use crate::portfolio::{PortfolioStore, PositionMap, Transaction, TransactionManager};

/// Key broker positions by normalized symbol.
///
/// Flat (zero-quantity) entries are skipped.
///
/// # Errors
///
/// [`ReconciliationError`] for empty or duplicate normalized symbols.
pub fn index_broker_positions(
    raw: Vec<BrokerPosition>,
) -> Result<BTreeMap<String, BrokerPosition>, ReconciliationError> {
    let mut indexed = BTreeMap::new();
    for position in raw {
        let symbol = normalize_symbol(&position.symbol);
        if symbol.is_empty() {
            return Err(ReconciliationError::EmptySymbol {
                raw: position.symbol,
            });
        }
        if position.quantity == 0 {
            tracing::debug!(symbol = %symbol, "Skipping flat broker position");
            continue;
        }
        match indexed.entry(symbol) {
            Entry::Occupied(entry) => {
                return Err(ReconciliationError::DuplicateSymbol {
                    symbol: entry.key().clone(),
                });
            }
            Entry::Vacant(entry) => {
                let symbol = entry.key().clone();
                entry.insert(BrokerPosition { symbol, ..position });
            }
        }
    }
    Ok(indexed)
}

/// Differences between local and broker positions, in symbol order.
///
/// Entry prices count as different only when they differ by more than
/// `price_tolerance`.
#[must_use]
pub fn diff_positions(
    local: &PositionMap,
    broker: &BTreeMap<String, BrokerPosition>,
    price_tolerance: Decimal,
) -> Vec<PositionDiscrepancy> {
    let mut discrepancies = Vec::new();

    for (symbol, remote) in broker {
        match local.get(symbol) {
            None => discrepancies.push(PositionDiscrepancy {
                symbol: symbol.clone(),
                kind: DiscrepancyKind::Added,
                local_quantity: None,
                local_price: None,
                broker_quantity: Some(remote.quantity),
                broker_price: Some(remote.average_price),
            }),
            Some(held) => {
                let quantity_differs = held.quantity != remote.quantity;
                let price_differs =
                    (held.entry_price - remote.average_price).abs() > price_tolerance;
                if quantity_differs || price_differs {
                    discrepancies.push(PositionDiscrepancy {
                        symbol: symbol.clone(),
                        kind: DiscrepancyKind::Updated,
                        local_quantity: Some(held.quantity),
                        local_price: Some(held.entry_price),
                        broker_quantity: Some(remote.quantity),
                        broker_price: Some(remote.average_price),
                    });
                }
            }
        }
    }

    for (symbol, held) in local {
        if !broker.contains_key(symbol) {
            discrepancies.push(PositionDiscrepancy {
                symbol: symbol.clone(),
                kind: DiscrepancyKind::Removed,
                local_quantity: Some(held.quantity),
                local_price: Some(held.entry_price),
                broker_quantity: None,
                broker_price: None,
            });
        }
    }

    discrepancies.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    discrepancies
}

/// Keeps the store's positions in line with the broker.
pub struct ReconciliationService {
    broker: Arc<GuardedBroker>,
    store: Arc<PortfolioStore>,
    persister: Option<Arc<SnapshotPersister>>,
    price_tolerance: Decimal,
    pass_lock: Mutex<()>,
    last_report: Mutex<Option<ReconciliationReport>>,
}

impl std::fmt::Debug for ReconciliationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationService")
            .field("price_tolerance", &self.price_tolerance)
            .finish_non_exhaustive()
    }
}

impl ReconciliationService {
    /// Reconcile `store` against `broker`.
    #[must_use]
    pub fn new(broker: Arc<GuardedBroker>, store: Arc<PortfolioStore>) -> Self {
        Self {
            broker,
            store,
            persister: None,
            price_tolerance: Decimal::ZERO,
            pass_lock: Mutex::new(()),
            last_report: Mutex::new(None),
        }
    }

    /// Mark the persister dirty after a pass that changed something.
    #[must_use]
    pub fn with_persister(mut self, persister: Arc<SnapshotPersister>) -> Self {
        self.persister = Some(persister);
        self
    }

    /// Ignore entry price differences up to `tolerance`.
    #[must_use]
    pub fn with_price_tolerance(mut self, tolerance: Decimal) -> Self {
        self.price_tolerance = tolerance.abs();
        self
    }

    /// Report of the most recent successful pass.
    #[must_use]
    pub fn last_report(&self) -> Option<ReconciliationReport> {
        self.last_report.lock().clone()
    }

    /// Run one pass.
    ///
    /// Passes are serialized. The broker is queried before any store lock is
    /// taken; all corrections then commit together or not at all.
    ///
    /// # Errors
    ///
    /// - Rate limiter or broker failures from the fetch.
    /// - [`ExecutionError::ReconciliationConflict`] when the broker list
    ///   cannot be applied; the store is left untouched.
    pub fn run_once(&self) -> Result<ReconciliationReport, ExecutionError> {
        let _pass = self.pass_lock.lock();
        let started = Instant::now();
        let started_at = Utc::now();

        let result = self.reconcile(started, started_at);
        metrics::record_reconciliation(
            started.elapsed(),
            result.as_ref().map_or(0, |report| report.mutations),
            result.is_ok(),
        );

        match &result {
            Ok(report) if report.is_clean() => {
                tracing::debug!(
                    positions = report.broker_positions,
                    version = report.version_after,
                    "Reconciliation found no discrepancies"
                );
            }
            Ok(report) => {
                tracing::info!(
                    added = report.added(),
                    removed = report.removed(),
                    updated = report.updated(),
                    version = report.version_after,
                    duration_ms = report.duration_ms,
                    "Reconciliation applied corrections"
                );
            }
            Err(error) => {
                tracing::warn!(error = %error, "Reconciliation pass failed");
            }
        }

        if let Ok(report) = &result {
            *self.last_report.lock() = Some(report.clone());
        }
        result
    }

    fn reconcile(
        &self,
        started: Instant,
        started_at: DateTime<Utc>,
    ) -> Result<ReconciliationReport, ExecutionError> {
        let permit = self.broker.admit(BrokerOperation::GetPositions)?;
        let raw = self.broker.get_positions(permit)?;
        let broker = index_broker_positions(raw)?;

        let (local_positions, version_before, discrepancies, version_after) =
            TransactionManager::run(&self.store, |tx| {
                let version_before = tx.version();
                let local = tx.positions();
                let discrepancies = diff_positions(&local, &broker, self.price_tolerance);
                for discrepancy in &discrepancies {
                    apply_discrepancy(tx, discrepancy, &broker, started_at)?;
                }
                Ok::<_, ExecutionError>((local.len(), version_before, discrepancies, tx.version()))
            })?;

        if !discrepancies.is_empty() {
            if let Some(persister) = &self.persister {
                persister.mark_dirty();
                if let Err(error) = persister.maybe_flush() {
                    tracing::warn!(error = %error, "Snapshot flush after reconciliation failed");
                }
            }
        }

        Ok(ReconciliationReport {
            mutations: discrepancies.len(),
            discrepancies,
            broker_positions: broker.len(),
            local_positions,
            version_before,
            version_after,
            started_at,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

fn apply_discrepancy(
    tx: &mut Transaction<'_>,
    discrepancy: &PositionDiscrepancy,
    broker: &BTreeMap<String, BrokerPosition>,
    at: DateTime<Utc>,
) -> Result<(), ReconciliationError> {
    let symbol = discrepancy.symbol.as_str();

    let Some(remote) = broker.get(symbol) else {
        tx.remove_position(symbol);
        return Ok(());
    };

    if remote.average_price <= Decimal::ZERO {
        return Err(ReconciliationError::InvalidPrice {
            symbol: symbol.to_string(),
            price: remote.average_price,
        });
    }
    let last_price = remote.last_price.unwrap_or(remote.average_price);

    let position = match tx.position(symbol) {
        Some(held) => Position {
            quantity: remote.quantity,
            entry_price: remote.average_price,
            current_price: last_price,
            ..held
        },
        None => Position {
            current_price: last_price,
            ..Position::open(
                symbol,
                remote.quantity,
                remote.average_price,
                EXTERNAL_STRATEGY_TAG,
                at,
            )
        },
    };
    tx.upsert_position(position);
    Ok(())
}
