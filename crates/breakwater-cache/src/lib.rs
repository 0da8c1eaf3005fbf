//! Sharded multi-tier object cache.
//!
//! A three-tier (L1/L2/L3) look-through cache for opaque byte objects:
//! - **Sharding**: each tier is split into a power-of-two number of
//!   independent shards selected by key hash; the shard is the contention
//!   boundary and the unit of capacity accounting.
//! - **Placement**: writes land in a tier by payload size and cascade to
//!   slower tiers when a tier refuses; eviction demotes victims one tier
//!   down rather than dropping them.
//! - **Promotion**: lower-tier hits schedule an asynchronous,
//!   single-flighted promotion back up the hierarchy.
//! - **Compression**: payloads above a threshold are recompressed off the
//!   request path and republished when the savings clear 10%.
//!
//! ## Example
//!
//! ```rust
//! use breakwater_cache::{CacheConfig, Codec, EvictionPolicy, TierLevel};
//! use bytes::Bytes;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let cache = CacheConfig::builder()
//!     .name("objects")
//!     .shard_count(64)
//!     .tier_max_bytes(TierLevel::L1, 256 * 1024 * 1024)
//!     .compression_codec(Codec::Zstd(3))
//!     .eviction_policy(EvictionPolicy::Lru)
//!     .build();
//!
//! cache.put("bucket/key", Bytes::from_static(b"object bytes"), None).unwrap();
//! assert!(cache.get("bucket/key").is_some());
//!
//! let stats = cache.stats();
//! assert_eq!(stats.l1_hits, 1);
//! cache.shutdown(Duration::from_secs(1)).await.unwrap();
//! # }
//! ```
//!
//! ## Feature Flags
//! - `metrics`: enables metrics collection using the `metrics` crate
//! - `tracing`: enables logging and tracing using the `tracing` crate

pub use compression::{Codec, CorruptPayload};
pub use config::{CacheConfig, CacheConfigBuilder, Prefetcher, MAX_KEY_BYTES};
pub use engine::CacheEngine;
pub use entry::{CacheEntry, Payload, TierLevel};
pub use error::CacheError;
pub use events::CacheEvent;
pub use eviction::EvictionPolicy;
pub use stats::{CacheStats, TierStats};

mod compression;
mod config;
mod engine;
mod entry;
mod error;
mod events;
mod eviction;
mod shard;
mod stats;
mod tier;
