//! Lock-free per-tenant usage accounting.
//!
//! The quota protocol is increment-then-check with a compensating
//! decrement: the counter is bumped first, compared against the quota, and
//! rolled back before the operation returns if it overshot. An external
//! observer can read the overshoot for the duration of one fetch-add;
//! enforcement is on the operation's return value, not the transient
//! counter. The order is load-bearing: check-then-increment would admit
//! two racing writers past the same remaining headroom.

use breakwater_core::monotonic_nanos;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

/// Enforcement window for rate and bandwidth quotas.
pub(crate) const QUOTA_WINDOW: Duration = Duration::from_secs(1);

/// Live usage counters for one tenant.
///
/// Shared-mutable via atomics; every public operation is lock-free.
/// Storage is signed: negative deltas (deletes, admin credits) apply
/// unclamped, so the counter is always the exact sum of applied deltas.
#[derive(Debug)]
pub struct TenantUsage {
    storage_used: AtomicI64,
    bandwidth_used: AtomicU64,
    request_count: AtomicU64,
    last_updated_nanos: AtomicU64,
    /// 1 while the entry has unflushed modifications.
    dirty: AtomicU8,
    window_start_nanos: AtomicU64,
    window_requests: AtomicU64,
    window_bandwidth: AtomicU64,
}

impl TenantUsage {
    pub(crate) fn new() -> Self {
        Self {
            storage_used: AtomicI64::new(0),
            bandwidth_used: AtomicU64::new(0),
            request_count: AtomicU64::new(0),
            last_updated_nanos: AtomicU64::new(monotonic_nanos()),
            dirty: AtomicU8::new(0),
            window_start_nanos: AtomicU64::new(monotonic_nanos()),
            window_requests: AtomicU64::new(0),
            window_bandwidth: AtomicU64::new(0),
        }
    }

    /// Current stored bytes. May be transiently above quota inside a
    /// racing `update_usage`; never above quota once that call returned.
    pub fn storage_used(&self) -> i64 {
        self.storage_used.load(Ordering::Acquire)
    }

    /// Cumulative bytes transferred.
    pub fn bandwidth_used(&self) -> u64 {
        self.bandwidth_used.load(Ordering::Relaxed)
    }

    /// Cumulative operations recorded.
    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Attempts to reserve `delta` bytes of storage against `quota`
    /// (0 = unlimited). Fetch-add, compare, compensating sub, in that
    /// order.
    pub(crate) fn try_reserve_storage(&self, delta: i64, quota: u64) -> bool {
        let new_used = self.storage_used.fetch_add(delta, Ordering::AcqRel) + delta;
        if delta > 0 && quota > 0 && new_used > quota as i64 {
            self.storage_used.fetch_sub(delta, Ordering::AcqRel);
            return false;
        }
        true
    }

    /// Rolls back a storage reservation (reverse-order multi-dimension
    /// rollback).
    pub(crate) fn unreserve_storage(&self, delta: i64) {
        self.storage_used.fetch_sub(delta, Ordering::AcqRel);
    }

    /// Reserves operations in the current one-second window.
    pub(crate) fn try_reserve_requests(&self, delta: u64, quota: u64) -> bool {
        self.roll_window();
        if !try_reserve_window(&self.window_requests, delta, quota) {
            return false;
        }
        self.request_count.fetch_add(delta, Ordering::Relaxed);
        true
    }

    pub(crate) fn unreserve_requests(&self, delta: u64) {
        self.window_requests.fetch_sub(delta, Ordering::AcqRel);
        self.request_count.fetch_sub(delta, Ordering::Relaxed);
    }

    /// Reserves transferred bytes in the current one-second window.
    pub(crate) fn try_reserve_bandwidth(&self, delta: u64, quota: u64) -> bool {
        self.roll_window();
        if !try_reserve_window(&self.window_bandwidth, delta, quota) {
            return false;
        }
        self.bandwidth_used.fetch_add(delta, Ordering::Relaxed);
        true
    }

    pub(crate) fn unreserve_bandwidth(&self, delta: u64) {
        self.window_bandwidth.fetch_sub(delta, Ordering::AcqRel);
        self.bandwidth_used.fetch_sub(delta, Ordering::Relaxed);
    }

    /// Opens a fresh window once the previous one has aged out. The
    /// rollover CAS admits at most one resetter; a request racing the
    /// reset may land in either window, which is within the tolerance of
    /// per-second quotas.
    fn roll_window(&self) {
        let now = monotonic_nanos();
        let start = self.window_start_nanos.load(Ordering::Acquire);
        if now.saturating_sub(start) >= QUOTA_WINDOW.as_nanos() as u64
            && self
                .window_start_nanos
                .compare_exchange(start, now, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
        {
            self.window_requests.store(0, Ordering::Release);
            self.window_bandwidth.store(0, Ordering::Release);
        }
    }

    pub(crate) fn stamp_updated(&self) {
        self.last_updated_nanos
            .store(monotonic_nanos(), Ordering::Relaxed);
    }

    /// CAS 0→1. True when this caller owns the enqueue.
    pub(crate) fn mark_dirty(&self) -> bool {
        self.dirty
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// CAS 1→0 ahead of a flush snapshot. A concurrent redirty after this
    /// point re-enqueues the entry, so nothing is lost.
    pub(crate) fn clear_dirty(&self) -> bool {
        self.dirty
            .compare_exchange(1, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Re-marks dirty after a failed flush.
    pub(crate) fn force_dirty(&self) {
        self.dirty.store(1, Ordering::Release);
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire) == 1
    }

    /// Consistent-enough copy of the counters for flushing or reporting.
    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            storage_used: self.storage_used.load(Ordering::Acquire),
            bandwidth_used: self.bandwidth_used.load(Ordering::Relaxed),
            request_count: self.request_count.load(Ordering::Relaxed),
            last_updated_nanos: self.last_updated_nanos.load(Ordering::Relaxed),
        }
    }
}

fn try_reserve_window(counter: &AtomicU64, delta: u64, quota: u64) -> bool {
    let new_used = counter.fetch_add(delta, Ordering::AcqRel) + delta;
    if quota > 0 && new_used > quota {
        counter.fetch_sub(delta, Ordering::AcqRel);
        return false;
    }
    true
}

/// Point-in-time copy of a tenant's usage counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    /// Stored bytes (signed: credits can push it negative).
    pub storage_used: i64,
    /// Cumulative bytes transferred.
    pub bandwidth_used: u64,
    /// Cumulative operations.
    pub request_count: u64,
    /// Monotonic nanos of the last successful update.
    pub last_updated_nanos: u64,
}
