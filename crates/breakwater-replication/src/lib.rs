//! Asynchronous cross-region replication fan-out.
//!
//! The replication engine accepts per-object tasks and dispatches copies
//! to every configured destination region, off the request path:
//!
//! - **Zero-copy enqueue**: tasks share the caller's payload bytes by
//!   refcount; a full queue refuses immediately.
//! - **Scalable workers**: the worker pool doubles when queue depth runs
//!   ahead of it and halves when idle, between configured bounds, with
//!   two-tick hysteresis against oscillation.
//! - **Per-region batching**: tasks targeting the same region coalesce up
//!   to a size or timeout, then flush as one multi-object call when the
//!   transport supports it and parallel singletons otherwise.
//! - **Failure isolation**: each region owns a circuit breaker; dispatch
//!   to an unhealthy region is refused without touching the transport.
//!   Failures retry per (task, region) with jittered exponential backoff.
//! - **Conflict resolution**: destinations that already hold an object
//!   surface its timestamp; last-writer-wins by source timestamp decides
//!   unless an application resolver is installed.
//!
//! Delivery is at-least-once and unordered relative to client
//! acknowledgements.
//!
//! ## Example
//!
//! ```rust,no_run
//! use breakwater_replication::{RegionConfig, ReplicationEngine};
//! use bytes::Bytes;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let engine = ReplicationEngine::builder()
//!     .name("replication")
//!     .region(RegionConfig::new("us-east-1", "https://objects.use1.example.com"))
//!     .region(RegionConfig::new("eu-west-1", "https://objects.euw1.example.com"))
//!     .build();
//!
//! engine.start().unwrap();
//! engine.enqueue("photos", "cat.jpg", "v1", Bytes::from_static(b"...")).unwrap();
//! engine.shutdown(Duration::from_secs(5)).await.unwrap();
//! # }
//! ```
//!
//! ## Feature Flags
//! - `metrics`: enables metrics collection using the `metrics` crate
//! - `tracing`: enables logging and tracing using the `tracing` crate

pub use config::{RegionConfig, ReplicationConfig, ReplicationConfigBuilder};
pub use engine::ReplicationEngine;
pub use error::ReplicationError;
pub use events::ReplicationEvent;
pub use resolver::{ConflictResolver, ConflictStrategy, Resolution};
pub use retry::RetryPolicy;
pub use stats::ReplicationStats;
pub use task::{ReplicationTask, TaskFlags};
pub use transport::{
    HttpTransport, PutRequest, RegionTransport, TransportError, EXISTING_TIMESTAMP_HEADER,
    FORCE_HEADER, TIMESTAMP_HEADER,
};

mod config;
mod engine;
mod error;
mod events;
mod region;
mod resolver;
mod retry;
mod stats;
mod task;
mod transport;
