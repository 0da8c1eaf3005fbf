//! End-to-end scenarios across the composed engines.

use async_trait::async_trait;
use breakwater::{
    CacheConfig, Gateway, GatewayError, RegionConfig, RegionTransport, ReplicationEngine,
    TenantError, TenantManager,
};
use breakwater_replication::{PutRequest, TransportError};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// In-memory region fleet: every put lands in a per-region map.
#[derive(Default)]
struct MemoryRegions {
    objects: Mutex<HashMap<(String, String, String), usize>>,
}

#[async_trait]
impl RegionTransport for MemoryRegions {
    async fn put_object(&self, request: PutRequest<'_>) -> Result<(), TransportError> {
        self.objects.lock().unwrap().insert(
            (
                request.region.to_string(),
                request.bucket.to_string(),
                request.key.to_string(),
            ),
            request.payload.len(),
        );
        Ok(())
    }
}

fn gateway_with_replication(transport: Arc<MemoryRegions>) -> Gateway {
    let replication = ReplicationEngine::builder()
        .name("e2e")
        .region(RegionConfig::new("us-east-1", "http://use1.invalid"))
        .region(RegionConfig::new("eu-west-1", "http://euw1.invalid"))
        .transport(transport)
        .queue_capacity(1024)
        .worker_min(2)
        .worker_max(4)
        .batch_size(4)
        .batch_timeout(Duration::from_millis(5))
        .build();
    replication.start().unwrap();

    Gateway::new(
        TenantManager::builder().name("tenants").build(),
        CacheConfig::builder().name("objects").shard_count(16).build(),
    )
    .with_replication(replication)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_object_round_trip() {
    let regions = Arc::new(MemoryRegions::default());
    let gateway = gateway_with_replication(Arc::clone(&regions));
    let tenant = gateway.tenants().create("round-trip", 1 << 20, 0, 0).unwrap();

    let receipt = gateway
        .upload(&tenant, "hello", Bytes::from_static(b"Hello, World!"))
        .unwrap();
    assert_eq!(receipt.size, 13);

    let bytes = gateway.download(&tenant, "hello").unwrap();
    assert_eq!(&bytes[..], b"Hello, World!");
    assert_eq!(gateway.tenants().usage(&tenant).unwrap().storage_used, 13);

    // Replication is asynchronous relative to the acknowledgement; both
    // regions converge shortly after.
    for _ in 0..200 {
        if regions.objects.lock().unwrap().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let objects = regions.objects.lock().unwrap();
    assert_eq!(objects.len(), 2);
    for region in ["us-east-1", "eu-west-1"] {
        let size = objects
            .get(&(region.to_string(), tenant.to_string(), "hello".to_string()))
            .copied();
        assert_eq!(size, Some(13), "replica missing in {region}");
    }
    drop(objects);
    gateway.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn quota_rejection_leaves_usage_consistent() {
    let gateway = Gateway::new(
        TenantManager::builder().build(),
        CacheConfig::builder().shard_count(4).build(),
    );
    let tenant = gateway.tenants().create("quota", 100, 0, 0).unwrap();

    gateway
        .upload(&tenant, "first", Bytes::from(vec![1u8; 99]))
        .unwrap();
    let err = gateway
        .upload(&tenant, "second", Bytes::from(vec![2u8; 10]))
        .unwrap_err();
    assert!(matches!(
        err,
        GatewayError::Tenant(TenantError::QuotaExceeded { .. })
    ));

    // The rejected call rolled its reservation back.
    assert_eq!(gateway.tenants().usage(&tenant).unwrap().storage_used, 99);
    // The first object is unaffected.
    assert_eq!(gateway.download(&tenant, "first").unwrap().len(), 99);
    gateway.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn unknown_tenant_cannot_upload() {
    let gateway = Gateway::new(
        TenantManager::builder().build(),
        CacheConfig::builder().shard_count(4).build(),
    );
    let err = gateway
        .upload("tenant-unknown", "k", Bytes::from_static(b"x"))
        .unwrap_err();
    assert!(matches!(
        err,
        GatewayError::Tenant(TenantError::NotFound(_))
    ));
    gateway.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn metrics_snapshot_aggregates_all_engines() {
    let regions = Arc::new(MemoryRegions::default());
    let gateway = gateway_with_replication(regions);
    let tenant = gateway.tenants().create("stats", 0, 0, 0).unwrap();

    gateway.upload(&tenant, "a", Bytes::from_static(b"aa")).unwrap();
    gateway.download(&tenant, "a").unwrap();
    let _ = gateway.download(&tenant, "missing");

    let stats = gateway.stats();
    assert_eq!(stats.cache.puts, 1);
    assert_eq!(stats.cache.l1_hits, 1);
    assert_eq!(stats.cache.misses, 1);
    assert_eq!(stats.tenants.tenants, 1);
    let replication = stats.replication.expect("replication configured");
    assert_eq!(replication.enqueued, 1);
    gateway.shutdown(Duration::from_secs(5)).await.unwrap();
}
