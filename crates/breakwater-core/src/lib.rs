//! Core infrastructure for breakwater.
//!
//! This crate provides the shared primitives used across the breakwater
//! engines:
//! - Event hooks for observability
//! - Sharded concurrent map with copy-on-write publication
//! - Bounded lock-free MPMC queue
//! - Bounded worker pool with non-blocking submission
//! - Monotonic clock and hashing helpers

pub mod events;
pub mod pool;
pub mod queue;
pub mod sharded;
pub mod time;

pub use events::{EngineEvent, EventSink};
pub use pool::{PoolError, WorkerPool};
pub use queue::{BoundedQueue, QueueFull};
pub use sharded::ShardedMap;
pub use time::{hash64, monotonic_nanos};
