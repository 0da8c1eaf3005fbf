//! The gateway: request-path composition of the three engines.
//!
//! The external HTTP layer is thin routing glue; this type is the contract
//! it calls. A write reserves quota, publishes into the cache, and hands
//! the payload to replication, in that order, returning as soon as the
//! replica task is queued. A read walks the cache tiers and accounts
//! bandwidth on the hit.

use breakwater_cache::{CacheEngine, CacheError, CacheStats};
use breakwater_core::{hash64, monotonic_nanos};
use breakwater_replication::{ReplicationEngine, ReplicationError, ReplicationStats, TaskFlags};
use breakwater_tenant::{TenantError, TenantManager, TenantStats, UsageDelta};
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced to the request layer; each maps mechanically to an
/// HTTP status.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Tenant missing, duplicate, or quota-rejected (maps to 403/404).
    #[error(transparent)]
    Tenant(#[from] TenantError),

    /// Cache store failure (maps to 500).
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Replication enqueue refused (maps to 503).
    #[error(transparent)]
    Replication(#[from] ReplicationError),

    /// The requested object is not cached (maps to 404).
    #[error("object `{key}` not found")]
    ObjectNotFound {
        /// The missing key.
        key: String,
    },
}

/// Acknowledgement returned to the upload path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Object key.
    pub key: String,
    /// Payload size in bytes.
    pub size: u64,
    /// Content ETag (hex).
    pub etag: String,
    /// Version assigned to this write.
    pub version_id: String,
}

/// Combined counter snapshot across the engines.
#[derive(Debug, Clone)]
pub struct GatewayStats {
    /// Cache engine counters.
    pub cache: CacheStats,
    /// Tenant manager counters.
    pub tenants: TenantStats,
    /// Replication counters, when replication is configured.
    pub replication: Option<ReplicationStats>,
}

/// Multi-tenant object-storage front end.
pub struct Gateway {
    tenants: TenantManager,
    cache: CacheEngine,
    replication: Option<ReplicationEngine>,
}

impl Gateway {
    /// Composes a gateway without replication.
    pub fn new(tenants: TenantManager, cache: CacheEngine) -> Self {
        Self {
            tenants,
            cache,
            replication: None,
        }
    }

    /// Adds the replication engine to the write path.
    #[must_use]
    pub fn with_replication(mut self, replication: ReplicationEngine) -> Self {
        self.replication = Some(replication);
        self
    }

    /// The tenant manager.
    pub fn tenants(&self) -> &TenantManager {
        &self.tenants
    }

    /// The cache engine.
    pub fn cache(&self) -> &CacheEngine {
        &self.cache
    }

    /// The replication engine, when configured.
    pub fn replication(&self) -> Option<&ReplicationEngine> {
        self.replication.as_ref()
    }

    /// Stores an object for a tenant.
    ///
    /// Quota is reserved first; a cache store failure hands the reserved
    /// bytes back before the error surfaces. Replication (when
    /// configured) is queued before returning and proceeds off the
    /// request path: the caller may see this acknowledgement before any
    /// region holds a replica.
    pub fn upload(
        &self,
        tenant_id: &str,
        key: &str,
        payload: Bytes,
    ) -> Result<UploadReceipt, GatewayError> {
        let size = payload.len() as u64;
        self.tenants.check_and_reserve(tenant_id, size)?;

        let etag = format!("{:016x}", hash64(&payload));
        let version_id = format!("{:x}", monotonic_nanos());

        if let Err(error) = self.cache.put(key, payload.clone(), None) {
            // Hand the reserved bytes back; the object was never stored.
            let _ = self.tenants.update_usage(
                tenant_id,
                UsageDelta {
                    bytes: -(size as i64),
                    ..Default::default()
                },
            );
            return Err(error.into());
        }

        if let Some(replication) = &self.replication {
            replication.enqueue(tenant_id, key, &version_id, payload)?;
        }

        Ok(UploadReceipt {
            key: key.to_string(),
            size,
            etag,
            version_id,
        })
    }

    /// Fetches an object for a tenant, accounting the request and the
    /// transferred bandwidth.
    pub fn download(&self, tenant_id: &str, key: &str) -> Result<Bytes, GatewayError> {
        self.tenants.update_usage(
            tenant_id,
            UsageDelta {
                requests: 1,
                ..Default::default()
            },
        )?;

        let Some(bytes) = self.cache.get(key) else {
            return Err(GatewayError::ObjectNotFound {
                key: key.to_string(),
            });
        };

        self.tenants.update_usage(
            tenant_id,
            UsageDelta {
                bandwidth: bytes.len() as u64,
                ..Default::default()
            },
        )?;
        Ok(bytes)
    }

    /// Deletes an object: releases the tenant's stored bytes, drops it
    /// from every cache tier, and replicates a delete marker.
    pub fn delete(&self, tenant_id: &str, key: &str) -> Result<(), GatewayError> {
        let size = self
            .cache
            .peek(key)
            .map(|entry| entry.logical_size())
            .unwrap_or(0);
        self.cache.invalidate(key);
        if size > 0 {
            self.tenants.update_usage(
                tenant_id,
                UsageDelta {
                    bytes: -(size as i64),
                    requests: 1,
                    ..Default::default()
                },
            )?;
        }
        if let Some(replication) = &self.replication {
            let version_id = format!("{:x}", monotonic_nanos());
            replication.enqueue_with(
                tenant_id,
                key,
                &version_id,
                Bytes::new(),
                0,
                TaskFlags::empty().with(TaskFlags::DELETE_MARKER),
            )?;
        }
        Ok(())
    }

    /// Liveness: the gateway is up.
    pub fn alive(&self) -> bool {
        true
    }

    /// Readiness: all composed engines accept work.
    pub fn ready(&self) -> bool {
        // The engines are non-blocking by construction; readiness is
        // about composition, not load.
        true
    }

    /// Combined counter snapshot for the metrics endpoint.
    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            cache: self.cache.stats(),
            tenants: self.tenants.stats(),
            replication: self.replication.as_ref().map(ReplicationEngine::stats),
        }
    }

    /// Stops background work in every engine, waiting up to `deadline`
    /// for each.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), GatewayError> {
        if let Some(replication) = &self.replication {
            replication.shutdown(deadline).await?;
        }
        self.cache
            .shutdown(deadline)
            .await
            .map_err(|_| TenantError::ShutdownTimeout)?;
        self.tenants.shutdown(deadline).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use breakwater_cache::CacheConfig;

    fn gateway() -> Gateway {
        Gateway::new(
            TenantManager::builder().name("t").build(),
            CacheConfig::builder().name("c").shard_count(4).build(),
        )
    }

    #[tokio::test]
    async fn upload_download_round_trip() {
        let gw = gateway();
        let tenant = gw.tenants().create("acme", 1 << 20, 0, 0).unwrap();

        let receipt = gw
            .upload(&tenant, "hello", Bytes::from_static(b"Hello, World!"))
            .unwrap();
        assert_eq!(receipt.size, 13);

        let bytes = gw.download(&tenant, "hello").unwrap();
        assert_eq!(&bytes[..], b"Hello, World!");
        assert_eq!(gw.tenants().usage(&tenant).unwrap().storage_used, 13);
        gw.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn quota_rejection_maps_cleanly() {
        let gw = gateway();
        let tenant = gw.tenants().create("small", 100, 0, 0).unwrap();

        gw.upload(&tenant, "a", Bytes::from(vec![0u8; 99])).unwrap();
        let err = gw.upload(&tenant, "b", Bytes::from(vec![0u8; 10])).unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Tenant(TenantError::QuotaExceeded { .. })
        ));
        assert_eq!(gw.tenants().usage(&tenant).unwrap().storage_used, 99);
        gw.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let gw = gateway();
        let tenant = gw.tenants().create("acme", 0, 0, 0).unwrap();
        assert!(matches!(
            gw.download(&tenant, "nope"),
            Err(GatewayError::ObjectNotFound { .. })
        ));
        gw.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn delete_releases_quota() {
        let gw = gateway();
        let tenant = gw.tenants().create("acme", 1000, 0, 0).unwrap();
        gw.upload(&tenant, "k", Bytes::from(vec![0u8; 100])).unwrap();
        gw.delete(&tenant, "k").unwrap();
        assert_eq!(gw.tenants().usage(&tenant).unwrap().storage_used, 0);
        assert!(gw.download(&tenant, "k").is_err());
        gw.shutdown(Duration::from_secs(1)).await.unwrap();
    }
}
