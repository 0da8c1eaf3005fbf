//! Conflict resolution for objects that already exist at a destination.

use crate::task::ReplicationTask;
use std::sync::Arc;

/// What to do with a conflicting (bucket, key) at a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Overwrite the remote copy with the source copy.
    Overwrite,
    /// Keep the remote copy; the (task, region) pair is recorded as a
    /// failed replication.
    Skip,
}

/// Decides between the source copy and an existing remote copy.
pub trait ConflictResolver: Send + Sync {
    /// Called when a destination reports an existing object; returns what
    /// the engine should do.
    fn resolve(&self, task: &ReplicationTask, existing_timestamp_nanos: u64) -> Resolution;
}

/// The configured resolution strategy.
#[derive(Clone)]
pub enum ConflictStrategy {
    /// Newest source timestamp wins (the default).
    LastWriterWins,
    /// Application-supplied resolver.
    Application(Arc<dyn ConflictResolver>),
}

impl std::fmt::Debug for ConflictStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictStrategy::LastWriterWins => f.write_str("LastWriterWins"),
            ConflictStrategy::Application(_) => f.write_str("Application(..)"),
        }
    }
}

impl ConflictStrategy {
    pub(crate) fn resolve(
        &self,
        task: &ReplicationTask,
        existing_timestamp_nanos: u64,
    ) -> Resolution {
        match self {
            ConflictStrategy::LastWriterWins => {
                if task.source_timestamp_nanos >= existing_timestamp_nanos {
                    Resolution::Overwrite
                } else {
                    Resolution::Skip
                }
            }
            ConflictStrategy::Application(resolver) => {
                resolver.resolve(task, existing_timestamp_nanos)
            }
        }
    }
}
