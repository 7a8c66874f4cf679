//! The execution facade.

use std::sync::Arc;
use std::time::Instant;

use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::validation::{OrderLimits, validate_intent};
use crate::broker::{BrokerOperation, GuardedBroker, OrderAck, OrderRequest, Permit};
use crate::contract::{ContractError, ContractResolver};
use crate::error::ExecutionError;
use crate::market_data::{NoOpPricePublisher, PriceCache, PricePublisher};
use crate::models::{Order, OrderSide, OrderStatus, Position, TradeIntent, TradeReceipt};
use crate::observability::metrics;
use crate::persistence::SnapshotPersister;
use crate::portfolio::{
    FillRequest, PortfolioError, PortfolioStore, Transaction, TransactionManager,
};

/// What the broker did with a submitted order.
enum Submission {
    /// Some quantity filled and was booked in the transaction.
    Filled { order: Order, price: Decimal },
    /// Accepted with nothing filled; the reservation must be released.
    Resting(Order),
}

/// Orchestrates validation, admission, the broker call and the portfolio
/// transaction for each trade intent.
///
/// The engine never retries. Callers decide what to do with a
/// [`retryable`](ExecutionError::is_retryable) error.
pub struct ExecutionEngine {
    store: Arc<PortfolioStore>,
    broker: Arc<GuardedBroker>,
    cache: Arc<PriceCache>,
    publisher: Arc<dyn PricePublisher>,
    resolver: ContractResolver,
    persister: Option<Arc<SnapshotPersister>>,
    limits: OrderLimits,
    submission_lock: Mutex<()>,
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("broker", &self.broker)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl ExecutionEngine {
    /// Engine over `store`, trading through `broker`.
    #[must_use]
    pub fn new(
        store: Arc<PortfolioStore>,
        broker: Arc<GuardedBroker>,
        cache: Arc<PriceCache>,
        resolver: ContractResolver,
    ) -> Self {
        Self {
            store,
            broker,
            cache,
            publisher: Arc::new(NoOpPricePublisher),
            resolver,
            persister: None,
            limits: OrderLimits::default(),
            submission_lock: Mutex::new(()),
        }
    }

    /// Fan fresh prices out through `publisher`.
    #[must_use]
    pub fn with_publisher(mut self, publisher: Arc<dyn PricePublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    /// Persist committed changes through `persister`.
    #[must_use]
    pub fn with_persister(mut self, persister: Arc<SnapshotPersister>) -> Self {
        self.persister = Some(persister);
        self
    }

    /// Override per-order bounds.
    #[must_use]
    pub fn with_limits(mut self, limits: OrderLimits) -> Self {
        self.limits = limits;
        self
    }

    /// The portfolio this engine writes to.
    #[must_use]
    pub fn store(&self) -> &Arc<PortfolioStore> {
        &self.store
    }

    /// Execute one trade intent.
    ///
    /// Buys reserve `quantity * limit_price` before the broker is called;
    /// the reservation is released against the actual fill. Any failure
    /// after the reservation rolls the portfolio back to its state before
    /// the attempt. An order the broker accepts without filling comes back
    /// with status `Accepted` and leaves the portfolio unchanged.
    ///
    /// # Errors
    ///
    /// - [`ExecutionError::Validation`] before any lock or network call.
    /// - [`ExecutionError::RateLimitExceeded`] without calling the broker.
    /// - [`ExecutionError::InsufficientFunds`] if the reservation fails.
    /// - Broker rejections, timeouts and outages.
    pub fn execute(&self, intent: TradeIntent) -> Result<TradeReceipt, ExecutionError> {
        let started = Instant::now();
        let result = self.try_execute(&intent);
        let outcome = match &result {
            Ok(receipt) => receipt.order.status.as_str(),
            Err(error) => error.code().reason(),
        };
        metrics::record_order(intent.side.as_str(), outcome, started.elapsed());

        match &result {
            Ok(receipt) => tracing::info!(
                symbol = %intent.symbol,
                side = %intent.side,
                quantity = intent.quantity,
                filled = receipt.order.filled_quantity,
                status = receipt.order.status.as_str(),
                strategy = %intent.strategy_tag,
                version = receipt.version,
                "Trade intent executed"
            ),
            Err(error) => tracing::warn!(
                symbol = %intent.symbol,
                side = %intent.side,
                quantity = intent.quantity,
                code = %error.code(),
                error = %error,
                "Trade intent failed"
            ),
        }
        result
    }

    fn try_execute(&self, intent: &TradeIntent) -> Result<TradeReceipt, ExecutionError> {
        validate_intent(intent, &self.limits)?;
        let permit = self.broker.admit(BrokerOperation::PlaceOrder)?;

        let submission = self.submission_lock.lock();
        let request = OrderRequest {
            client_order_id: Uuid::new_v4().to_string(),
            symbol: intent.symbol.clone(),
            side: intent.side,
            quantity: intent.quantity,
            limit_price: intent.limit_price,
        };

        let mut tx = TransactionManager::begin(&self.store);
        let (order, fill_price) = match self.submit(&mut tx, intent, &request, permit) {
            Ok(Submission::Filled { order, price }) => (order, price),
            Ok(Submission::Resting(order)) => {
                tx.rollback();
                return Ok(TradeReceipt {
                    order,
                    position: self.store.get_position(&intent.symbol),
                    cash_after: self.store.get_cash(),
                    version: self.store.version(),
                });
            }
            Err(error) => {
                tx.rollback();
                return Err(error);
            }
        };

        let position = tx.position(&intent.symbol);
        let cash_after = tx.cash();
        let version = tx.commit();
        drop(submission);

        self.after_commit(&intent.symbol, fill_price);

        Ok(TradeReceipt {
            order,
            position,
            cash_after,
            version,
        })
    }

    /// Reserve, call the broker and book the fill inside `tx`.
    fn submit(
        &self,
        tx: &mut Transaction<'_>,
        intent: &TradeIntent,
        request: &OrderRequest,
        permit: Permit,
    ) -> Result<Submission, ExecutionError> {
        let reserved = match intent.side {
            OrderSide::Buy => intent
                .notional()
                .ok_or_else(|| ExecutionError::validation("order notional is out of range"))?,
            OrderSide::Sell => Decimal::ZERO,
        };
        tx.debit_cash(reserved)?;

        let ack = self.broker.place_order(permit, request)?;
        self.check_ack(&ack, request)?;
        if ack.filled_quantity == 0 {
            return Ok(Submission::Resting(Order::from_ack(request, &ack)));
        }

        let price = ack.average_fill_price.unwrap_or(request.limit_price);
        tx.credit_cash(reserved)?;
        tx.book_fill(&FillRequest {
            order_id: &ack.order_id,
            symbol: &request.symbol,
            side: request.side,
            quantity: ack.filled_quantity,
            price,
            strategy_tag: &intent.strategy_tag,
            stop_loss: intent.stop_loss,
            take_profit: intent.take_profit,
            executed_at: Utc::now(),
        })
        .map_err(|error| match error {
            PortfolioError::Overflow { .. } => {
                tracing::error!(
                    order_id = %ack.order_id,
                    filled = ack.filled_quantity,
                    price = %price,
                    "Broker fill cannot be booked, leaving it to reconciliation"
                );
                ExecutionError::BrokerRejected {
                    reason: format!("fill of order {} at {price} cannot be booked: {error}", ack.order_id),
                }
            }
            other => other.into(),
        })?;

        let order = Order {
            average_fill_price: Some(price),
            ..Order::from_ack(request, &ack)
        };
        Ok(Submission::Filled { order, price })
    }

    /// Turn failure statuses and inconsistent fills into errors.
    fn check_ack(&self, ack: &OrderAck, request: &OrderRequest) -> Result<(), ExecutionError> {
        match ack.status {
            OrderStatus::Rejected => {
                return Err(ExecutionError::BrokerRejected {
                    reason: format!("order {} rejected", ack.order_id),
                });
            }
            OrderStatus::TimedOut => {
                return Err(ExecutionError::BrokerTimeout {
                    operation: BrokerOperation::PlaceOrder.name(),
                    timeout_ms: self.broker.breaker().call_timeout().as_millis() as u64,
                });
            }
            OrderStatus::Pending | OrderStatus::Accepted | OrderStatus::Filled => {}
        }

        if ack.filled_quantity < 0 || ack.filled_quantity > request.quantity {
            tracing::error!(
                order_id = %ack.order_id,
                filled = ack.filled_quantity,
                requested = request.quantity,
                "Broker reported an impossible fill, leaving it to reconciliation"
            );
            return Err(ExecutionError::BrokerRejected {
                reason: format!(
                    "fill of {} outside order quantity {}",
                    ack.filled_quantity, request.quantity
                ),
            });
        }
        if ack
            .average_fill_price
            .is_some_and(|price| price <= Decimal::ZERO)
        {
            return Err(ExecutionError::BrokerRejected {
                reason: format!("order {} filled at a non-positive price", ack.order_id),
            });
        }
        Ok(())
    }

    fn after_commit(&self, symbol: &str, fill_price: Decimal) {
        self.cache.set(symbol, fill_price);
        self.publisher.publish(symbol, fill_price);
        metrics::record_portfolio(self.store.get_cash(), self.store.snapshot_positions().len());
        self.persist();
    }

    fn persist(&self) {
        if let Some(persister) = &self.persister {
            persister.mark_dirty();
            if let Err(error) = persister.maybe_flush() {
                tracing::warn!(error = %error, "Snapshot flush after commit failed");
            }
        }
    }

    /// Last price for `symbol`.
    ///
    /// Served from the price cache when fresh. On a miss the broker is
    /// asked (rate-limited and circuit-protected), the cache refreshed, the
    /// price published, and any open position marked to it.
    ///
    /// # Errors
    ///
    /// Validation, rate limiter and broker failures.
    pub fn quote(&self, symbol: &str) -> Result<Decimal, ExecutionError> {
        if symbol.trim().is_empty() {
            return Err(ExecutionError::validation("symbol must not be empty"));
        }
        if let Some(price) = self.cache.get(symbol) {
            return Ok(price);
        }

        let permit = self.broker.admit(BrokerOperation::GetQuote)?;
        let price = self.broker.get_quote(permit, symbol)?;
        if price <= Decimal::ZERO {
            return Err(ExecutionError::BrokerRejected {
                reason: format!("non-positive quote {price} for {symbol}"),
            });
        }

        self.cache.set(symbol, price);
        self.publisher.publish(symbol, price);

        let marked = TransactionManager::run(&self.store, |tx| {
            Ok::<_, ExecutionError>(tx.mark_price(symbol, price))
        })?;
        if marked {
            self.persist();
        }
        Ok(price)
    }

    /// Open positions whose contract expires on `today`.
    ///
    /// Symbols that are not derivative identifiers are skipped.
    #[must_use]
    pub fn positions_expiring_on(&self, today: NaiveDate) -> Vec<Position> {
        self.store
            .snapshot_positions()
            .into_values()
            .filter(|position| match self.resolver.expires_on(&position.symbol, today) {
                Ok(expires) => expires,
                Err(ContractError::NotDerivative(_)) => false,
                Err(error) => {
                    tracing::warn!(
                        symbol = %position.symbol,
                        error = %error,
                        "Could not resolve contract expiry"
                    );
                    false
                }
            })
            .collect()
    }

    /// Force a snapshot write at a session boundary.
    ///
    /// # Errors
    ///
    /// [`ExecutionError::Persistence`] if the write fails.
    pub fn end_session(&self) -> Result<(), ExecutionError> {
        let Some(persister) = &self.persister else {
            return Ok(());
        };
        let written = persister.flush()?;
        tracing::info!(
            written,
            version = self.store.version(),
            trades = self.store.trade_count(),
            "Session ended"
        );
        Ok(())
    }
}
