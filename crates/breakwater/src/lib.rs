//! Multi-tenant object-storage front end.
//!
//! breakwater sits in front of a durable object store and absorbs the
//! request load: a sharded multi-tier cache serves read-mostly object
//! bytes, a tenant manager enforces storage/bandwidth/rate quotas with
//! lock-free accounting, and a replication engine fans writes out to
//! remote regions off the request path.
//!
//! Each core is its own crate and usable on its own:
//!
//! - [`breakwater_cache`]: the L1/L2/L3 cache engine
//! - [`breakwater_tenant`]: tenant configs, quotas, durability flush
//! - [`breakwater_replication`]: cross-region fan-out
//! - [`breakwater_circuitbreaker`]: the per-destination failure gate
//! - [`breakwater_core`]: shared primitives (sharded map, MPMC queue,
//!   worker pool, events)
//!
//! This crate re-exports them and adds [`Gateway`], the composition the
//! external HTTP layer calls: quota reservation → cache put → replication
//! enqueue on writes, tier walk plus bandwidth accounting on reads.
//!
//! ## Example
//!
//! ```rust
//! use breakwater::{CacheConfig, Gateway, TenantManager};
//! use bytes::Bytes;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let gateway = Gateway::new(
//!     TenantManager::builder().name("tenants").build(),
//!     CacheConfig::builder().name("objects").shard_count(64).build(),
//! );
//!
//! let tenant = gateway.tenants().create("acme", 1024 * 1024, 0, 0).unwrap();
//! gateway.upload(&tenant, "greeting", Bytes::from_static(b"hello")).unwrap();
//! assert_eq!(&gateway.download(&tenant, "greeting").unwrap()[..], b"hello");
//! gateway.shutdown(Duration::from_secs(1)).await.unwrap();
//! # }
//! ```
//!
//! ## Feature Flags
//! - `metrics`: Prometheus counters/gauges across all engines
//! - `tracing`: structured logging across all engines

pub use gateway::{Gateway, GatewayError, GatewayStats, UploadReceipt};

pub use breakwater_cache::{
    CacheConfig, CacheEngine, CacheError, CacheStats, Codec, EvictionPolicy, Prefetcher, TierLevel,
};
pub use breakwater_circuitbreaker::{BreakerState, BreakerSnapshot, CircuitBreaker};
pub use breakwater_core::{BoundedQueue, EventSink, ShardedMap, WorkerPool};
pub use breakwater_replication::{
    ConflictStrategy, RegionConfig, RegionTransport, ReplicationEngine, ReplicationError,
    ReplicationStats, RetryPolicy, TaskFlags,
};
pub use breakwater_tenant::{
    DurabilityWriter, TenantConfig, TenantError, TenantManager, TenantStats, UsageDelta,
    UsageSnapshot,
};

mod gateway;
