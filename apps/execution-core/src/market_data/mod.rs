//! Short-lived price data.

mod price_cache;
mod publisher;

pub use price_cache::{CacheStats, DEFAULT_PRICE_TTL, PriceCache, PriceCacheConfig};
pub use publisher::{NoOpPricePublisher, PricePublisher};
