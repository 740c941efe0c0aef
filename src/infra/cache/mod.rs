//! In-memory balance cache with TTL expiry and an LRU capacity bound.

use std::sync::Mutex;
use std::time::Duration;

use cached::{Cached, TimedSizedCache};
use uuid::Uuid;

use crate::domain::{BalanceCache, PartnerBalance};

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached balances; least-recently-used entries are
    /// evicted beyond this
    pub capacity: usize,
    /// Entry lifetime
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            ttl: Duration::from_secs(60),
        }
    }
}

/// Read-through balance cache. An optimization only; every balance mutation
/// invalidates the partner's entry, so the worst case is a stale read inside
/// the TTL window between a concurrent write and its invalidation.
pub struct InMemoryBalanceCache {
    entries: Mutex<TimedSizedCache<Uuid, PartnerBalance>>,
    config: CacheConfig,
}

impl InMemoryBalanceCache {
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        let entries = Mutex::new(TimedSizedCache::with_size_and_lifespan(
            config.capacity,
            config.ttl.as_secs(),
        ));
        Self { entries, config }
    }

    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl Default for InMemoryBalanceCache {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl BalanceCache for InMemoryBalanceCache {
    fn get(&self, partner_id: Uuid) -> Option<PartnerBalance> {
        self.entries
            .lock()
            .expect("balance cache lock poisoned")
            .cache_get(&partner_id)
            .cloned()
    }

    fn put(&self, balance: PartnerBalance) {
        self.entries
            .lock()
            .expect("balance cache lock poisoned")
            .cache_set(balance.partner_id, balance);
    }

    fn invalidate(&self, partner_id: Uuid) {
        self.entries
            .lock()
            .expect("balance cache lock poisoned")
            .cache_remove(&partner_id);
    }

    fn capacity(&self) -> usize {
        self.config.capacity
    }

    fn ttl(&self) -> Duration {
        self.config.ttl
    }
}
