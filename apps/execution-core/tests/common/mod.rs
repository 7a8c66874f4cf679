//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rust_decimal::Decimal;

use execution_core::broker::{
    BrokerClient, BrokerError, BrokerPosition, GuardedBroker, OrderAck, OrderRequest, PaperBroker,
};
use execution_core::contract::ContractResolver;
use execution_core::execution::ExecutionEngine;
use execution_core::market_data::{PriceCache, PriceCacheConfig};
use execution_core::models::OrderStatus;
use execution_core::portfolio::PortfolioStore;
use execution_core::resilience::{
    CircuitBreaker, CircuitBreakerConfig, RateLimiter, RateLimiterConfig,
};

/// Limits loose enough that tests never hit them by accident.
pub fn generous_limits() -> RateLimiterConfig {
    RateLimiterConfig::per_second_and_minute(10_000, 100_000)
}

/// Breaker with a short call deadline and a long cooldown.
pub fn test_breaker_config() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: 5,
        cooldown: Duration::from_secs(60),
        call_timeout: Duration::from_millis(200),
    }
}

/// Wrap `client` with a limiter and breaker.
pub fn guarded(
    client: Arc<dyn BrokerClient>,
    limits: RateLimiterConfig,
    breaker: CircuitBreakerConfig,
) -> Arc<GuardedBroker> {
    Arc::new(GuardedBroker::new(
        client,
        Arc::new(RateLimiter::new(limits)),
        Arc::new(CircuitBreaker::new("test-broker", breaker)),
        Duration::from_millis(50),
    ))
}

/// Engine plus the pieces tests poke at.
pub struct Harness {
    pub engine: ExecutionEngine,
    pub store: Arc<PortfolioStore>,
    pub broker: Arc<GuardedBroker>,
}

/// Engine over `client` with `cash` and default limits.
pub fn harness_with(client: Arc<dyn BrokerClient>, cash: Decimal) -> Harness {
    let store = Arc::new(PortfolioStore::new(cash));
    let broker = guarded(client, generous_limits(), test_breaker_config());
    let engine = ExecutionEngine::new(
        Arc::clone(&store),
        Arc::clone(&broker),
        Arc::new(PriceCache::new(PriceCacheConfig::default())),
        ContractResolver::default(),
    );
    Harness {
        engine,
        store,
        broker,
    }
}

/// Engine over a fresh paper broker.
pub fn paper_harness(cash: Decimal) -> (Harness, Arc<PaperBroker>) {
    let paper = Arc::new(PaperBroker::new());
    let harness = harness_with(Arc::clone(&paper) as Arc<dyn BrokerClient>, cash);
    (harness, paper)
}

/// Broker that replays queued order responses, optionally after a delay.
///
/// With nothing queued, orders fill completely at their limit price.
#[derive(Default)]
pub struct ScriptedBroker {
    responses: Mutex<VecDeque<Result<OrderAck, BrokerError>>>,
    positions: Mutex<Vec<BrokerPosition>>,
    delay: Mutex<Duration>,
    order_calls: AtomicUsize,
}

impl ScriptedBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: Result<OrderAck, BrokerError>) {
        self.responses.lock().push_back(response);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn set_positions(&self, positions: Vec<BrokerPosition>) {
        *self.positions.lock() = positions;
    }

    pub fn order_calls(&self) -> usize {
        self.order_calls.load(Ordering::SeqCst)
    }
}

impl BrokerClient for ScriptedBroker {
    fn place_order(&self, request: &OrderRequest) -> Result<OrderAck, BrokerError> {
        self.order_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.responses.lock().pop_front().unwrap_or_else(|| {
            Ok(OrderAck {
                order_id: format!("scripted-{}", self.order_calls()),
                status: OrderStatus::Filled,
                filled_quantity: request.quantity,
                average_fill_price: Some(request.limit_price),
            })
        })
    }

    fn get_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        Ok(self.positions.lock().clone())
    }

    fn get_quote(&self, symbol: &str) -> Result<Decimal, BrokerError> {
        Err(BrokerError::UnknownSymbol(symbol.to_string()))
    }
}

pub fn ack(status: OrderStatus, filled: i64, price: Option<Decimal>) -> OrderAck {
    OrderAck {
        order_id: "scripted".to_string(),
        status,
        filled_quantity: filled,
        average_fill_price: price,
    }
}

pub fn broker_position(symbol: &str, quantity: i64, price: Decimal) -> BrokerPosition {
    BrokerPosition {
        symbol: symbol.to_string(),
        quantity,
        average_price: price,
        last_price: None,
    }
}
