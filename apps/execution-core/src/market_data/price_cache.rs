//! Bounded LRU + TTL cache of last-known prices.
//!
//! Entries expire a fixed TTL after insertion regardless of how often they
//! are read. Reads never refresh an entry; refreshing is the caller's job
//! after a successful broker fetch.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::observability::metrics;

/// Default TTL for cached prices.
pub const DEFAULT_PRICE_TTL: Duration = Duration::from_secs(60);

/// Price cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceCacheConfig {
    /// Maximum number of symbols kept.
    pub capacity: usize,
    /// Lifetime of an entry from insertion.
    pub ttl: Duration,
}

impl Default for PriceCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            ttl: DEFAULT_PRICE_TTL,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Decimal,
    inserted_at: Instant,
    last_access: u64,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    /// Access tick → symbol; the first key is the least recently used.
    recency: BTreeMap<u64, String>,
    tick: u64,
}

impl CacheInner {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn remove(&mut self, symbol: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(symbol)?;
        self.recency.remove(&entry.last_access);
        Some(entry)
    }
}

/// Counters exposed for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups that returned a value.
    pub hits: u64,
    /// Lookups that returned nothing (absent or expired).
    pub misses: u64,
    /// Entries dropped to make room.
    pub evictions: u64,
    /// Entries dropped because their TTL passed.
    pub expirations: u64,
    /// Entries currently held.
    pub size: usize,
}

/// LRU + TTL price cache.
#[derive(Debug)]
pub struct PriceCache {
    config: PriceCacheConfig,
    inner: Mutex<CacheInner>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl PriceCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new(config: PriceCacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(CacheInner::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// Get a live price for `symbol`.
    pub fn get(&self, symbol: &str) -> Option<Decimal> {
        self.get_at(symbol, Instant::now())
    }

    /// Store `price` for `symbol`, resetting its TTL.
    pub fn set(&self, symbol: &str, price: Decimal) {
        self.set_at(symbol, price, Instant::now());
    }

    /// Drop `symbol` from the cache.
    pub fn invalidate(&self, symbol: &str) -> bool {
        self.inner.lock().remove(symbol).is_some()
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.recency.clear();
    }

    /// Number of entries held (including ones not yet found expired).
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// True when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            size: self.len(),
        }
    }

    pub(crate) fn get_at(&self, symbol: &str, now: Instant) -> Option<Decimal> {
        let mut inner = self.inner.lock();

        let Some(entry) = inner.entries.get(symbol) else {
            drop(inner);
            return self.miss();
        };

        if now.saturating_duration_since(entry.inserted_at) >= self.config.ttl {
            inner.remove(symbol);
            drop(inner);
            self.expirations.fetch_add(1, Ordering::Relaxed);
            return self.miss();
        }

        let value = entry.value;
        let previous_tick = entry.last_access;
        let tick = inner.next_tick();
        inner.recency.remove(&previous_tick);
        inner.recency.insert(tick, symbol.to_string());
        if let Some(entry) = inner.entries.get_mut(symbol) {
            entry.last_access = tick;
        }
        drop(inner);

        self.hits.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_lookup(true);
        Some(value)
    }

    pub(crate) fn set_at(&self, symbol: &str, price: Decimal, now: Instant) {
        let mut inner = self.inner.lock();

        let replaced = inner.remove(symbol).is_some();
        let mut evicted = 0_u64;
        if !replaced {
            while inner.entries.len() >= self.config.capacity {
                let Some((_, lru_symbol)) = inner.recency.pop_first() else {
                    break;
                };
                inner.entries.remove(&lru_symbol);
                evicted += 1;
            }
        }

        if self.config.capacity > 0 {
            let tick = inner.next_tick();
            inner.recency.insert(tick, symbol.to_string());
            inner.entries.insert(
                symbol.to_string(),
                CacheEntry {
                    value: price,
                    inserted_at: now,
                    last_access: tick,
                },
            );
        }
        drop(inner);

        if evicted > 0 {
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
            metrics::record_cache_eviction(evicted);
        }
    }

    fn miss(&self) -> Option<Decimal> {
        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_lookup(false);
        None
    }
}
