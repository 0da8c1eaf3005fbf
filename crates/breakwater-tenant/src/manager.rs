//! The tenant manager: config store, quota enforcement, durability flush.

use crate::config::TenantManagerConfig;
use crate::error::{QuotaDimension, TenantError};
use crate::events::TenantEvent;
use crate::flush::{flusher_loop, FlushShared};
use crate::id::derive_tenant_id;
use crate::tenant::{Tenant, TenantConfig, TenantFeatures, TenantUpdate, UsageDelta};
use crate::usage::UsageSnapshot;
use breakwater_core::events::EventSink;
use breakwater_core::{BoundedQueue, ShardedMap};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Point-in-time snapshot of the manager's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantStats {
    /// Registered tenants.
    pub tenants: usize,
    /// Hot-config cache hits.
    pub cache_hits: u64,
    /// Hot-config cache misses.
    pub cache_misses: u64,
    /// Updates rejected by a quota.
    pub quota_rejections: u64,
    /// Durability batches written.
    pub flushes: u64,
    /// Usage rows written.
    pub flushed_entries: u64,
    /// Batches that exhausted their write attempts.
    pub flush_failures: u64,
    /// Durability writes dropped because the dirty queue was full.
    pub lost_updates: u64,
    /// Dirty entries awaiting flush.
    pub dirty_queue_depth: usize,
}

/// Authoritative in-memory view of per-tenant configuration and quota
/// state.
///
/// Quota enforcement is lock-free on the request path; durability writes
/// are batched off it. See the crate docs for the full protocol.
pub struct TenantManager {
    name: String,
    tenants: ShardedMap<Arc<str>, Arc<Tenant>>,
    /// Display name → tenant ID, for duplicate rejection.
    names: ShardedMap<Arc<str>, Arc<str>>,
    hot: Arc<crate::ttl_cache::TtlCache>,
    flush: Arc<FlushShared>,
    events: EventSink<TenantEvent>,
    workers: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    quota_rejections: AtomicU64,
}

impl TenantManager {
    /// Returns a new builder.
    pub fn builder() -> crate::config::TenantManagerConfigBuilder {
        crate::config::TenantManagerConfigBuilder::new()
    }

    pub(crate) fn from_config(config: TenantManagerConfig) -> Self {
        let flush = Arc::new(FlushShared {
            name: config.name.clone(),
            queue: BoundedQueue::new(config.dirty_queue_capacity),
            writer: config.writer,
            events: config.events.clone(),
            shutdown: std::sync::atomic::AtomicBool::new(false),
            batch_size: config.flush_batch,
            batch_timeout: config.flush_period,
            retry_initial: config.flush_retry_initial,
            retry_max: config.flush_retry_max,
            flush_attempts: config.flush_attempts,
            flushes: AtomicU64::new(0),
            flushed_entries: AtomicU64::new(0),
            flush_failures: AtomicU64::new(0),
            lost_updates: AtomicU64::new(0),
        });

        let mut workers = Vec::with_capacity(config.flusher_count + 1);
        for _ in 0..config.flusher_count {
            let shared = Arc::clone(&flush);
            workers.push(tokio::spawn(async move { flusher_loop(shared).await }));
        }

        let hot = Arc::new(crate::ttl_cache::TtlCache::new(
            config.cache_capacity,
            config.cache_ttl,
        ));
        let manager = Self {
            name: config.name,
            tenants: ShardedMap::new(config.shard_count),
            names: ShardedMap::new(config.shard_count),
            hot,
            flush,
            events: config.events,
            workers: Mutex::new(workers),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            quota_rejections: AtomicU64::new(0),
        };
        manager.spawn_evictor(config.cache_ttl);
        manager
    }

    fn spawn_evictor(&self, ttl: Duration) {
        let shared = Arc::clone(&self.flush);
        let tick = (ttl / 2).max(Duration::from_millis(100));
        let hot = Arc::clone(&self.hot);
        self.workers.lock().push(tokio::spawn(async move {
            loop {
                if shared.shutdown.load(Ordering::Acquire) {
                    return;
                }
                tokio::time::sleep(tick).await;
                hot.evict_expired();
            }
        }));
    }

    /// Returns the manager's configured name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Creates a tenant. Quotas of 0 are unlimited.
    ///
    /// The ID is derived from the display name and creation time; a
    /// duplicate display name is rejected.
    pub fn create(
        &self,
        name: &str,
        storage_quota: u64,
        bandwidth_quota: u64,
        rate_quota: u64,
    ) -> Result<Arc<str>, TenantError> {
        let created_unix_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let id: Arc<str> = Arc::from(derive_tenant_id(name, created_unix_nanos).as_str());
        let name_arc: Arc<str> = Arc::from(name);

        if self
            .names
            .try_insert(Arc::clone(&name_arc), Arc::clone(&id))
            .is_some()
        {
            return Err(TenantError::DuplicateName(name.to_string()));
        }

        let config = TenantConfig {
            id: Arc::clone(&id),
            name: name_arc,
            storage_quota,
            bandwidth_quota,
            rate_quota,
            created_unix_nanos,
            features: TenantFeatures::default(),
        };
        self.tenants
            .insert(Arc::clone(&id), Arc::new(Tenant::new(config)));

        self.events.emit(&TenantEvent::Created {
            source: self.name.clone(),
            timestamp: std::time::Instant::now(),
            tenant_id: Arc::clone(&id),
        });
        #[cfg(feature = "tracing")]
        tracing::info!(tenant = %id, "tenant created");

        Ok(id)
    }

    fn tenant(&self, id: &str) -> Result<Arc<Tenant>, TenantError> {
        self.tenants
            .get(id)
            .ok_or_else(|| TenantError::NotFound(id.to_string()))
    }

    /// Returns the tenant's config snapshot, serving hot lookups from the
    /// TTL cache.
    pub fn get(&self, id: &str) -> Result<Arc<TenantConfig>, TenantError> {
        if let Some(config) = self.hot.get(id) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(config);
        }
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        let config = self.tenant(id)?.config();
        self.hot.insert(Arc::clone(&config));
        Ok(config)
    }

    /// Replaces quota fields on a tenant (RCU snapshot swap).
    pub fn update_config(
        &self,
        id: &str,
        update: TenantUpdate,
    ) -> Result<Arc<TenantConfig>, TenantError> {
        let tenant = self.tenant(id)?;
        let next = tenant.update_config(update);
        self.hot.invalidate(id);
        Ok(next)
    }

    /// Removes a tenant entirely.
    pub fn remove(&self, id: &str) -> Result<(), TenantError> {
        let tenant = self
            .tenants
            .remove(id)
            .ok_or_else(|| TenantError::NotFound(id.to_string()))?;
        self.names.remove(&tenant.config().name);
        self.hot.invalidate(id);
        Ok(())
    }

    /// Returns whether `bytes_required` more bytes would fit under the
    /// tenant's storage quota. Advisory; `update_usage` is the
    /// enforcement point.
    pub fn check_quota(&self, id: &str, bytes_required: u64) -> Result<bool, TenantError> {
        let tenant = self.tenant(id)?;
        let quota = tenant.config().storage_quota;
        Ok(quota == 0
            || tenant.usage.storage_used() + bytes_required as i64 <= quota as i64)
    }

    /// Applies a usage delta with quota enforcement.
    ///
    /// Dimensions commit in a fixed order (storage, bandwidth, rate); the
    /// first rejection rolls back every increment already applied by this
    /// call, in reverse order, before the error returns. On success the
    /// entry is marked dirty and scheduled for durability flush.
    pub fn update_usage(&self, id: &str, delta: UsageDelta) -> Result<(), TenantError> {
        let tenant = self.tenant(id)?;
        let config = tenant.config();
        let usage = &tenant.usage;

        if !usage.try_reserve_storage(delta.bytes, config.storage_quota) {
            return Err(self.reject(&config.id, QuotaDimension::Storage));
        }
        if !usage.try_reserve_bandwidth(delta.bandwidth, config.bandwidth_quota) {
            usage.unreserve_storage(delta.bytes);
            return Err(self.reject(&config.id, QuotaDimension::Bandwidth));
        }
        if !usage.try_reserve_requests(delta.requests, config.rate_quota) {
            usage.unreserve_bandwidth(delta.bandwidth);
            usage.unreserve_storage(delta.bytes);
            return Err(self.reject(&config.id, QuotaDimension::RequestRate));
        }

        usage.stamp_updated();
        self.flush
            .enqueue(Arc::clone(&config.id), Arc::clone(usage));
        Ok(())
    }

    /// Write-path convenience: reserve `bytes` of storage, one operation,
    /// and `bytes` of bandwidth in a single quota-checked call.
    pub fn check_and_reserve(&self, id: &str, bytes: u64) -> Result<(), TenantError> {
        self.update_usage(
            id,
            UsageDelta {
                bytes: bytes as i64,
                requests: 1,
                bandwidth: bytes,
            },
        )
    }

    /// Applies several tenants' deltas. Partial: updates commit in
    /// iteration order and the first failure surfaces, leaving earlier
    /// tenants' updates applied.
    pub fn batch_update<'a, I>(&self, updates: I) -> Result<(), TenantError>
    where
        I: IntoIterator<Item = (&'a str, UsageDelta)>,
    {
        for (id, delta) in updates {
            self.update_usage(id, delta)?;
        }
        Ok(())
    }

    /// Returns a copy of the tenant's usage counters.
    pub fn usage(&self, id: &str) -> Result<UsageSnapshot, TenantError> {
        Ok(self.tenant(id)?.usage.snapshot())
    }

    /// Registered tenant count (weakly consistent).
    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    /// Returns true when no tenants are registered.
    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }

    /// Point-in-time counter snapshot.
    pub fn stats(&self) -> TenantStats {
        TenantStats {
            tenants: self.tenants.len(),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            quota_rejections: self.quota_rejections.load(Ordering::Relaxed),
            flushes: self.flush.flushes.load(Ordering::Relaxed),
            flushed_entries: self.flush.flushed_entries.load(Ordering::Relaxed),
            flush_failures: self.flush.flush_failures.load(Ordering::Relaxed),
            lost_updates: self.flush.lost_updates.load(Ordering::Relaxed),
            dirty_queue_depth: self.flush.queue.len(),
        }
    }

    /// Signals the flushers and evictor to stop, drains the dirty queue,
    /// and waits up to `deadline`.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), TenantError> {
        self.flush.shutdown.store(true, Ordering::Release);
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        let join_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        tokio::time::timeout(deadline, join_all)
            .await
            .map_err(|_| TenantError::ShutdownTimeout)
    }

    fn reject(&self, id: &Arc<str>, dimension: QuotaDimension) -> TenantError {
        self.quota_rejections.fetch_add(1, Ordering::Relaxed);
        self.events.emit(&TenantEvent::QuotaRejected {
            source: self.name.clone(),
            timestamp: std::time::Instant::now(),
            tenant_id: Arc::clone(id),
            dimension,
        });
        #[cfg(feature = "metrics")]
        metrics::counter!(
            "tenant_quota_rejections_total",
            "dimension" => dimension.to_string()
        )
        .increment(1);
        #[cfg(feature = "tracing")]
        tracing::info!(tenant = %id, %dimension, "usage update rejected by quota");
        TenantError::QuotaExceeded {
            tenant_id: id.to_string(),
            dimension,
        }
    }
}

impl std::fmt::Debug for TenantManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantManager")
            .field("name", &self.name)
            .field("tenants", &self.tenants.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flush::{DurabilityWriter, UsageRecord, WriteError};
    use async_trait::async_trait;

    #[tokio::test]
    async fn create_get_round_trip() {
        let manager = TenantManager::builder().name("t").build();
        let id = manager.create("acme", 1024, 0, 0).unwrap();
        let config = manager.get(&id).unwrap();
        assert_eq!(&*config.name, "acme");
        assert_eq!(config.storage_quota, 1024);
        // Second get is served by the hot cache.
        manager.get(&id).unwrap();
        assert_eq!(manager.stats().cache_hits, 1);
        manager.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let manager = TenantManager::builder().build();
        manager.create("acme", 0, 0, 0).unwrap();
        assert!(matches!(
            manager.create("acme", 0, 0, 0),
            Err(TenantError::DuplicateName(_))
        ));
        manager.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_tenant_is_not_found() {
        let manager = TenantManager::builder().build();
        assert!(matches!(
            manager.get("tenant-missing"),
            Err(TenantError::NotFound(_))
        ));
        manager.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn storage_quota_rejects_with_rollback() {
        let manager = TenantManager::builder().build();
        let id = manager.create("t", 100, 0, 0).unwrap();

        manager
            .update_usage(&id, UsageDelta { bytes: 99, ..Default::default() })
            .unwrap();
        let err = manager
            .update_usage(&id, UsageDelta { bytes: 10, ..Default::default() })
            .unwrap_err();
        assert!(matches!(
            err,
            TenantError::QuotaExceeded {
                dimension: QuotaDimension::Storage,
                ..
            }
        ));
        assert_eq!(manager.usage(&id).unwrap().storage_used, 99);
        assert_eq!(manager.stats().quota_rejections, 1);
        manager.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn failed_dimension_rolls_back_earlier_ones() {
        let manager = TenantManager::builder().build();
        // Rate quota of 1: the second request in the window must fail and
        // leave storage untouched.
        let id = manager.create("t", 0, 0, 1).unwrap();
        manager
            .update_usage(&id, UsageDelta { bytes: 10, requests: 1, bandwidth: 10 })
            .unwrap();
        let err = manager
            .update_usage(&id, UsageDelta { bytes: 10, requests: 1, bandwidth: 10 })
            .unwrap_err();
        assert!(matches!(
            err,
            TenantError::QuotaExceeded {
                dimension: QuotaDimension::RequestRate,
                ..
            }
        ));
        let usage = manager.usage(&id).unwrap();
        assert_eq!(usage.storage_used, 10);
        assert_eq!(usage.bandwidth_used, 10);
        assert_eq!(usage.request_count, 1);
        manager.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn plus_then_minus_restores_usage() {
        let manager = TenantManager::builder().build();
        let id = manager.create("t", 1000, 0, 0).unwrap();
        manager
            .update_usage(&id, UsageDelta { bytes: 400, ..Default::default() })
            .unwrap();
        manager
            .update_usage(&id, UsageDelta { bytes: -400, ..Default::default() })
            .unwrap();
        assert_eq!(manager.usage(&id).unwrap().storage_used, 0);
        manager.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn batch_update_stops_at_first_failure() {
        let manager = TenantManager::builder().build();
        let a = manager.create("a", 1000, 0, 0).unwrap();
        let b = manager.create("b", 10, 0, 0).unwrap();
        let c = manager.create("c", 1000, 0, 0).unwrap();

        let err = manager
            .batch_update([
                (&*a, UsageDelta { bytes: 100, ..Default::default() }),
                (&*b, UsageDelta { bytes: 100, ..Default::default() }),
                (&*c, UsageDelta { bytes: 100, ..Default::default() }),
            ])
            .unwrap_err();
        assert!(matches!(err, TenantError::QuotaExceeded { .. }));
        // Partial semantics: earlier updates stay, later ones never ran.
        assert_eq!(manager.usage(&a).unwrap().storage_used, 100);
        assert_eq!(manager.usage(&b).unwrap().storage_used, 0);
        assert_eq!(manager.usage(&c).unwrap().storage_used, 0);
        manager.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    struct CountingWriter {
        batches: std::sync::atomic::AtomicU64,
        rows: std::sync::atomic::AtomicU64,
    }

    #[async_trait]
    impl DurabilityWriter for CountingWriter {
        async fn write_batch(&self, updates: &[UsageRecord]) -> Result<(), WriteError> {
            self.batches.fetch_add(1, Ordering::SeqCst);
            self.rows
                .fetch_add(updates.len() as u64, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn dirty_entries_reach_the_writer() {
        let writer = Arc::new(CountingWriter {
            batches: AtomicU64::new(0),
            rows: AtomicU64::new(0),
        });
        let manager = TenantManager::builder()
            .flush_period(Duration::from_millis(20))
            .flusher_count(1)
            .writer(Arc::clone(&writer) as Arc<dyn DurabilityWriter>)
            .build();
        let id = manager.create("t", 0, 0, 0).unwrap();
        manager
            .update_usage(&id, UsageDelta { bytes: 5, ..Default::default() })
            .unwrap();

        for _ in 0..100 {
            if writer.rows.load(Ordering::SeqCst) >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(writer.rows.load(Ordering::SeqCst) >= 1);
        assert!(manager.stats().flushes >= 1);
        manager.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    struct FailingWriter {
        failures_left: std::sync::atomic::AtomicU64,
        successes: std::sync::atomic::AtomicU64,
    }

    #[async_trait]
    impl DurabilityWriter for FailingWriter {
        async fn write_batch(&self, _updates: &[UsageRecord]) -> Result<(), WriteError> {
            if self.failures_left.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                n.checked_sub(1)
            })
            .is_ok()
            {
                return Err(WriteError::new("injected"));
            }
            self.successes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_flush_retries_until_success() {
        let writer = Arc::new(FailingWriter {
            failures_left: AtomicU64::new(2),
            successes: AtomicU64::new(0),
        });
        let manager = TenantManager::builder()
            .flush_period(Duration::from_millis(10))
            .flush_retry_initial(Duration::from_millis(5))
            .flusher_count(1)
            .writer(Arc::clone(&writer) as Arc<dyn DurabilityWriter>)
            .build();
        let id = manager.create("t", 0, 0, 0).unwrap();
        manager
            .update_usage(&id, UsageDelta { bytes: 5, ..Default::default() })
            .unwrap();

        for _ in 0..200 {
            if writer.successes.load(Ordering::SeqCst) >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(writer.successes.load(Ordering::SeqCst) >= 1);
        manager.shutdown(Duration::from_secs(1)).await.unwrap();
    }
}
