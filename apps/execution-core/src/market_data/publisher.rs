//! Distribution of fresh prices to other processes.
//!
//! The in-process [`PriceCache`](super::PriceCache) stays authoritative for
//! reads. A publisher only fans fresh quotes out to a shared cache service
//! when several processes want them.

use rust_decimal::Decimal;

/// Port for a shared price distribution service.
pub trait PricePublisher: Send + Sync {
    /// Publish a freshly fetched price. Failures are the publisher's to log.
    fn publish(&self, symbol: &str, price: Decimal);
}

/// Publisher for single-process deployments.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpPricePublisher;

impl PricePublisher for NoOpPricePublisher {
    fn publish(&self, _symbol: &str, _price: Decimal) {}
}
