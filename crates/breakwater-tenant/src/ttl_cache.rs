//! Short-TTL cache for hot tenant configs.
//!
//! Non-authoritative: a miss (or an expired hit) falls through to the
//! sharded config store. Entries expire by wall-clock age; a background
//! evictor scans and reclaims expired entries so a cold tenant does not
//! pin its slot until the LRU pushes it out.

use crate::tenant::TenantConfig;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct CachedConfig {
    config: Arc<TenantConfig>,
    cached_at: Instant,
}

pub(crate) struct TtlCache {
    inner: Mutex<LruCache<Arc<str>, CachedConfig>>,
    ttl: Duration,
}

impl TtlCache {
    pub(crate) fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least 1");
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub(crate) fn get(&self, id: &str) -> Option<Arc<TenantConfig>> {
        let mut inner = self.inner.lock();
        match inner.get(id) {
            Some(cached) if cached.cached_at.elapsed() <= self.ttl => {
                Some(Arc::clone(&cached.config))
            }
            Some(_) => {
                inner.pop(id);
                None
            }
            None => None,
        }
    }

    pub(crate) fn insert(&self, config: Arc<TenantConfig>) {
        let mut inner = self.inner.lock();
        inner.put(
            Arc::clone(&config.id),
            CachedConfig {
                config,
                cached_at: Instant::now(),
            },
        );
    }

    pub(crate) fn invalidate(&self, id: &str) {
        self.inner.lock().pop(id);
    }

    /// Drops every expired entry; returns how many were reclaimed.
    pub(crate) fn evict_expired(&self) -> usize {
        let mut inner = self.inner.lock();
        let expired: Vec<Arc<str>> = inner
            .iter()
            .filter(|(_, cached)| cached.cached_at.elapsed() > self.ttl)
            .map(|(id, _)| Arc::clone(id))
            .collect();
        for id in &expired {
            inner.pop(id.as_ref());
        }
        expired.len()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::TenantFeatures;

    fn config(id: &str) -> Arc<TenantConfig> {
        Arc::new(TenantConfig {
            id: Arc::from(id),
            name: Arc::from(id),
            storage_quota: 0,
            bandwidth_quota: 0,
            rate_quota: 0,
            created_unix_nanos: 0,
            features: TenantFeatures::default(),
        })
    }

    #[test]
    fn hit_within_ttl_miss_after() {
        let cache = TtlCache::new(8, Duration::from_millis(30));
        cache.insert(config("tenant-a"));
        assert!(cache.get("tenant-a").is_some());
        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get("tenant-a").is_none());
    }

    #[test]
    fn evictor_reclaims_expired_entries() {
        let cache = TtlCache::new(8, Duration::from_millis(20));
        cache.insert(config("tenant-a"));
        cache.insert(config("tenant-b"));
        std::thread::sleep(Duration::from_millis(30));
        cache.insert(config("tenant-c"));
        assert_eq!(cache.evict_expired(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn capacity_bound_holds() {
        let cache = TtlCache::new(2, Duration::from_secs(60));
        cache.insert(config("a"));
        cache.insert(config("b"));
        cache.insert(config("c"));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
    }
}
