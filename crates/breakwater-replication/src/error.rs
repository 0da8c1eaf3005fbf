//! Replication engine error types.

use thiserror::Error;

/// Errors surfaced by the replication engine.
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// The task queue refused the enqueue. The caller decides whether to
    /// retry or drop; the engine has taken no ownership of the payload.
    #[error("replication queue is full")]
    QueueFull,

    /// `start` was called on an engine that is already running.
    #[error("replication engine is already running")]
    AlreadyRunning,

    /// Shutdown did not drain the pipeline before its deadline; the
    /// remaining tasks were dropped.
    #[error("shutdown exceeded its deadline; {dropped} tasks dropped")]
    DeadlineExceeded {
        /// Tasks abandoned undelivered.
        dropped: u64,
    },
}
