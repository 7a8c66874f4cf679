//! Rate-limited, circuit-protected access to a [`BrokerClient`].

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use rust_decimal::Decimal;

use super::{BrokerClient, BrokerError, BrokerPosition, OrderAck, OrderRequest};
use crate::error::ExecutionError;
use crate::observability::metrics;
use crate::resilience::{CircuitBreaker, CircuitError, RateLimiter};

/// Broker operations, each with its own rate-limiter key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrokerOperation {
    /// Order submission.
    PlaceOrder,
    /// Position listing.
    GetPositions,
    /// Quote lookup.
    GetQuote,
}

impl BrokerOperation {
    /// Rate-limiter key.
    #[must_use]
    pub const fn rate_key(self) -> &'static str {
        match self {
            Self::PlaceOrder => "orders",
            Self::GetPositions => "positions",
            Self::GetQuote => "quotes",
        }
    }

    /// Operation label for logs, errors and metrics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::PlaceOrder => "place_order",
            Self::GetPositions => "get_positions",
            Self::GetQuote => "get_quote",
        }
    }
}

/// Default cap on broker calls in flight, abandoned ones included.
pub const DEFAULT_MAX_WORKERS: usize = 8;

/// One claimed broker worker; released when the worker thread ends.
struct WorkerSlot(Arc<AtomicUsize>);

impl WorkerSlot {
    fn claim(workers: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        workers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |busy| {
                (busy < max).then_some(busy + 1)
            })
            .ok()
            .map(|busy| {
                metrics::record_broker_workers(busy + 1);
                Self(Arc::clone(workers))
            })
    }
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        let busy = self.0.fetch_sub(1, Ordering::AcqRel) - 1;
        metrics::record_broker_workers(busy);
    }
}

/// Proof that the rate limiter admitted one broker call.
///
/// Only [`GuardedBroker::admit`] creates permits, and each broker call
/// consumes one.
#[must_use = "a permit is one admitted broker call"]
#[derive(Debug)]
pub struct Permit {
    operation: BrokerOperation,
}

impl Permit {
    /// Operation this permit was issued for.
    #[must_use]
    pub const fn operation(&self) -> BrokerOperation {
        self.operation
    }
}

/// The only path from the core to a broker.
pub struct GuardedBroker {
    client: Arc<dyn BrokerClient>,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    acquire_timeout: Duration,
    workers: Arc<AtomicUsize>,
    max_workers: usize,
}

impl std::fmt::Debug for GuardedBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedBroker")
            .field("broker", &self.client.broker_name())
            .field("breaker", &self.breaker.name())
            .field("acquire_timeout", &self.acquire_timeout)
            .field("max_workers", &self.max_workers)
            .finish_non_exhaustive()
    }
}

impl GuardedBroker {
    /// Wrap `client` with `limiter` and `breaker`.
    #[must_use]
    pub fn new(
        client: Arc<dyn BrokerClient>,
        limiter: Arc<RateLimiter>,
        breaker: Arc<CircuitBreaker>,
        acquire_timeout: Duration,
    ) -> Self {
        Self {
            client,
            limiter,
            breaker,
            acquire_timeout,
            workers: Arc::new(AtomicUsize::new(0)),
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }

    /// Cap broker calls in flight. Calls that timed out keep their worker
    /// until the broker returns, so a hung broker fills the cap and further
    /// calls fail fast instead of piling up threads.
    #[must_use]
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    /// Broker workers currently running, abandoned ones included.
    #[must_use]
    pub fn workers_in_flight(&self) -> usize {
        self.workers.load(Ordering::Acquire)
    }

    /// The circuit breaker guarding this broker.
    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// The rate limiter guarding this broker.
    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Ask the rate limiter for one `operation` slot, blocking up to the
    /// acquire timeout.
    ///
    /// # Errors
    ///
    /// [`ExecutionError::RateLimitExceeded`] if no slot frees in time.
    pub fn admit(&self, operation: BrokerOperation) -> Result<Permit, ExecutionError> {
        let key = operation.rate_key();
        if self.limiter.acquire(key, self.acquire_timeout) {
            Ok(Permit { operation })
        } else {
            tracing::warn!(
                key,
                timeout_ms = self.acquire_timeout.as_millis() as u64,
                "Rate limiter refused broker call"
            );
            Err(ExecutionError::RateLimitExceeded {
                key: key.to_string(),
            })
        }
    }

    /// Submit an order.
    ///
    /// # Errors
    ///
    /// Broker failures mapped onto [`ExecutionError`].
    pub fn place_order(
        &self,
        permit: Permit,
        request: &OrderRequest,
    ) -> Result<OrderAck, ExecutionError> {
        let request = request.clone();
        self.dispatch(permit, BrokerOperation::PlaceOrder, move |client| {
            client.place_order(&request)
        })
    }

    /// Fetch broker positions.
    ///
    /// # Errors
    ///
    /// Broker failures mapped onto [`ExecutionError`].
    pub fn get_positions(&self, permit: Permit) -> Result<Vec<BrokerPosition>, ExecutionError> {
        self.dispatch(permit, BrokerOperation::GetPositions, |client| {
            client.get_positions()
        })
    }

    /// Fetch a quote.
    ///
    /// # Errors
    ///
    /// Broker failures mapped onto [`ExecutionError`].
    pub fn get_quote(&self, permit: Permit, symbol: &str) -> Result<Decimal, ExecutionError> {
        let symbol = symbol.to_string();
        self.dispatch(permit, BrokerOperation::GetQuote, move |client| {
            client.get_quote(&symbol)
        })
    }

    fn dispatch<T, F>(
        &self,
        permit: Permit,
        operation: BrokerOperation,
        call: F,
    ) -> Result<T, ExecutionError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn BrokerClient) -> Result<T, BrokerError> + Send + 'static,
    {
        if permit.operation != operation {
            return Err(ExecutionError::validation(format!(
                "permit for {} cannot be spent on {}",
                permit.operation.name(),
                operation.name()
            )));
        }

        let started = Instant::now();
        // Business refusals pass through the breaker as successes.
        let outcome = self
            .breaker
            .call(|| match self.call_with_deadline(operation, call) {
                Err(error) if !error.trips_breaker() => Ok(Err(error)),
                other => other.map(Ok),
            });

        let result = match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) | Err(CircuitError::Inner(error)) => Err(self.classify(operation, error)),
            Err(CircuitError::Open { name }) => Err(ExecutionError::BrokerUnavailable {
                reason: format!("circuit '{name}' is open"),
            }),
        };

        metrics::record_broker_call(
            operation.name(),
            started.elapsed(),
            result.as_ref().map_or_else(|e| e.code().reason(), |_| "ok"),
        );
        result
    }

    /// Run `call` on a worker thread and give up after the call timeout.
    ///
    /// A response that arrives after the deadline is dropped; the outcome is
    /// a timeout either way. With every worker busy the call is refused as a
    /// connection failure without reaching the broker.
    fn call_with_deadline<T, F>(&self, operation: BrokerOperation, call: F) -> Result<T, BrokerError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn BrokerClient) -> Result<T, BrokerError> + Send + 'static,
    {
        let Some(slot) = WorkerSlot::claim(&self.workers, self.max_workers) else {
            metrics::record_broker_saturated(operation.name());
            tracing::warn!(
                operation = operation.name(),
                max_workers = self.max_workers,
                "All broker workers busy, refusing call"
            );
            return Err(BrokerError::Connection {
                message: format!("all {} broker workers are busy", self.max_workers),
            });
        };

        let timeout = self.breaker.call_timeout();
        let client = Arc::clone(&self.client);
        let (tx, rx) = mpsc::sync_channel(1);
        let started = Instant::now();

        std::thread::Builder::new()
            .name(format!("broker-{}", operation.name()))
            .spawn(move || {
                let _slot = slot;
                let _ = tx.send(call(client.as_ref()));
            })
            .map_err(|error| BrokerError::Connection {
                message: format!("failed to start broker call: {error}"),
            })?;

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                metrics::record_broker_call_abandoned(operation.name());
                tracing::warn!(
                    operation = operation.name(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Broker call exceeded deadline, response will be discarded"
                );
                Err(BrokerError::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(BrokerError::Connection {
                message: "broker call ended without a response".to_string(),
            }),
        }
    }

    fn classify(&self, operation: BrokerOperation, error: BrokerError) -> ExecutionError {
        tracing::warn!(
            broker = self.client.broker_name(),
            operation = operation.name(),
            error = %error,
            "Broker call failed"
        );
        match error {
            BrokerError::Rejected { reason } => ExecutionError::BrokerRejected { reason },
            BrokerError::UnknownSymbol(symbol) => ExecutionError::BrokerRejected {
                reason: format!("unknown symbol {symbol}"),
            },
            BrokerError::Timeout { .. } => ExecutionError::BrokerTimeout {
                operation: operation.name(),
                timeout_ms: self.breaker.call_timeout().as_millis() as u64,
            },
            BrokerError::Connection { message } => {
                ExecutionError::BrokerUnavailable { reason: message }
            }
            BrokerError::RateLimited => ExecutionError::RateLimitExceeded {
                key: operation.rate_key().to_string(),
            },
        }
    }
}
