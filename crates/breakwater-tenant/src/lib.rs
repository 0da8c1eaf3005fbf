//! Tenant configuration store and lock-free quota accounting.
//!
//! The tenant manager is the authoritative in-memory view of per-tenant
//! quota state:
//! - **Config store**: immutable config snapshots in a sharded map, with
//!   RCU replacement on admin updates and a short-TTL cache in front for
//!   hot lookups.
//! - **Quota accounting**: atomic increment-then-check with compensating
//!   rollback; multi-dimension updates roll back in reverse order on the
//!   first rejection. Rate and bandwidth quotas enforce on one-second
//!   windows.
//! - **Durability flush**: dirty entries are queued once (flag CAS),
//!   coalesced into batches, and written off the request path with
//!   exponential-backoff retries. A full queue drops the durability write
//!   (never the in-memory update) and counts the loss.
//!
//! ## Example
//!
//! ```rust
//! use breakwater_tenant::{TenantManager, UsageDelta};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let manager = TenantManager::builder().name("tenants").build();
//!
//! let id = manager.create("acme", 1024 * 1024, 0, 0).unwrap();
//! manager.update_usage(&id, UsageDelta { bytes: 13, requests: 1, bandwidth: 13 }).unwrap();
//! assert_eq!(manager.usage(&id).unwrap().storage_used, 13);
//!
//! manager.shutdown(Duration::from_secs(1)).await.unwrap();
//! # }
//! ```
//!
//! ## Feature Flags
//! - `metrics`: enables metrics collection using the `metrics` crate
//! - `tracing`: enables logging and tracing using the `tracing` crate

pub use config::{NoopWriter, TenantManagerConfig, TenantManagerConfigBuilder};
pub use error::{QuotaDimension, TenantError};
pub use events::TenantEvent;
pub use flush::{DurabilityWriter, UsageRecord, WriteError};
pub use id::{derive_tenant_id, MAX_TENANT_ID_BYTES, TENANT_ID_PREFIX};
pub use manager::{TenantManager, TenantStats};
pub use tenant::{TenantConfig, TenantFeatures, TenantUpdate, UsageDelta};
pub use usage::{TenantUsage, UsageSnapshot};

mod config;
mod error;
mod events;
mod flush;
mod id;
mod manager;
mod tenant;
mod ttl_cache;
mod usage;
