//! Lock-free circuit breaker for per-destination failure isolation.
//!
//! A circuit breaker stops sending requests to a failing downstream after a
//! threshold of consecutive failures, then probes for recovery after a
//! timeout.
//!
//! ## States
//! - **Closed**: requests allowed; consecutive failures are counted and a
//!   success resets the count. Reaching the failure threshold opens the
//!   circuit.
//! - **Open**: requests refused. Once the recovery timeout elapses the next
//!   caller transitions the circuit to half-open.
//! - **Half-Open**: a limited number of probe requests are admitted. Enough
//!   consecutive successes close the circuit; any failure reopens it.
//!
//! All state lives in atomics and transitions are CAS-driven, so `allow()`
//! is safe to call from any number of dispatch workers without a lock and
//! is read-only in the common (Closed) path.
//!
//! ## Example
//!
//! ```rust
//! use breakwater_circuitbreaker::{BreakerState, CircuitBreaker};
//! use std::time::Duration;
//!
//! let breaker = CircuitBreaker::builder()
//!     .failure_threshold(3)
//!     .recovery_timeout(Duration::from_millis(200))
//!     .name("us-east-1")
//!     .build();
//!
//! for _ in 0..3 {
//!     assert!(breaker.allow());
//!     breaker.record_failure();
//! }
//! assert_eq!(breaker.state(), BreakerState::Open);
//! assert!(!breaker.allow());
//! ```

use breakwater_core::monotonic_nanos;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

pub use config::{BreakerConfig, BreakerConfigBuilder};
pub use events::BreakerEvent;

mod config;
mod events;

/// Represents the state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BreakerState {
    /// The circuit is closed and calls are allowed.
    Closed = 0,
    /// The circuit is open and calls are refused.
    Open = 1,
    /// The circuit is half-open and a limited number of probes are allowed.
    HalfOpen = 2,
}

impl BreakerState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => BreakerState::Open,
            2 => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }

    pub(crate) fn as_label(self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

/// Point-in-time view of a breaker's counters for observability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerSnapshot {
    /// Current state.
    pub state: BreakerState,
    /// Consecutive failures observed in the Closed state.
    pub consecutive_failures: u32,
    /// Consecutive successes observed in the Half-Open state.
    pub consecutive_successes: u32,
    /// Total calls refused while Open or probe-exhausted.
    pub rejected_calls: u64,
    /// Nanoseconds since the last state transition.
    pub nanos_since_transition: u64,
}

/// A lock-free three-state failure gate.
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    consecutive_successes: AtomicU32,
    /// Probes admitted during the current Half-Open episode.
    probes_admitted: AtomicU32,
    last_failure_nanos: AtomicU64,
    last_transition_nanos: AtomicU64,
    rejected_calls: AtomicU64,
}

impl CircuitBreaker {
    /// Returns a new builder with default thresholds.
    pub fn builder() -> BreakerConfigBuilder {
        BreakerConfigBuilder::new()
    }

    pub(crate) fn from_config(config: BreakerConfig) -> Self {
        Self {
            config,
            state: AtomicU8::new(BreakerState::Closed as u8),
            consecutive_failures: AtomicU32::new(0),
            consecutive_successes: AtomicU32::new(0),
            probes_admitted: AtomicU32::new(0),
            last_failure_nanos: AtomicU64::new(0),
            last_transition_nanos: AtomicU64::new(monotonic_nanos()),
            rejected_calls: AtomicU64::new(0),
        }
    }

    /// Returns the breaker's configured name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Returns the current state.
    pub fn state(&self) -> BreakerState {
        BreakerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Decides whether a request may proceed.
    ///
    /// Read-only in the Closed fast path. In the Open state the first
    /// caller past the recovery timeout performs the Open→Half-Open
    /// transition and is admitted as a probe.
    pub fn allow(&self) -> bool {
        match self.state() {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let since = monotonic_nanos()
                    .saturating_sub(self.last_transition_nanos.load(Ordering::Acquire));
                if since < self.config.recovery_timeout.as_nanos() as u64 {
                    self.reject();
                    return false;
                }
                if self.transition(BreakerState::Open, BreakerState::HalfOpen) {
                    // This caller won the transition and takes the first probe.
                    self.probes_admitted.store(1, Ordering::Release);
                    true
                } else {
                    // Someone else transitioned first; contend for a probe slot.
                    self.try_admit_probe()
                }
            }
            BreakerState::HalfOpen => self.try_admit_probe(),
        }
    }

    /// Records a successful call.
    pub fn record_success(&self) {
        match self.state() {
            BreakerState::Closed => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
            }
            BreakerState::HalfOpen => {
                let successes = self.consecutive_successes.fetch_add(1, Ordering::AcqRel) + 1;
                if successes >= self.config.success_threshold {
                    self.transition(BreakerState::HalfOpen, BreakerState::Closed);
                }
            }
            // A late result from before the circuit opened; nothing to do.
            BreakerState::Open => {}
        }
    }

    /// Records a failed call.
    pub fn record_failure(&self) {
        self.last_failure_nanos
            .store(monotonic_nanos(), Ordering::Relaxed);
        match self.state() {
            BreakerState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.config.failure_threshold {
                    self.transition(BreakerState::Closed, BreakerState::Open);
                }
            }
            BreakerState::HalfOpen => {
                self.transition(BreakerState::HalfOpen, BreakerState::Open);
            }
            BreakerState::Open => {}
        }
    }

    /// Forces the circuit into the open state.
    pub fn force_open(&self) {
        let from = self.state();
        if from != BreakerState::Open {
            self.transition(from, BreakerState::Open);
        }
    }

    /// Resets the circuit to closed and clears all counters.
    pub fn reset(&self) {
        let from = self.state();
        if from != BreakerState::Closed {
            self.transition(from, BreakerState::Closed);
        } else {
            self.consecutive_failures.store(0, Ordering::Relaxed);
            self.consecutive_successes.store(0, Ordering::Relaxed);
        }
    }

    /// Returns a consistent-enough snapshot of the breaker counters.
    pub fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            state: self.state(),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            consecutive_successes: self.consecutive_successes.load(Ordering::Relaxed),
            rejected_calls: self.rejected_calls.load(Ordering::Relaxed),
            nanos_since_transition: monotonic_nanos()
                .saturating_sub(self.last_transition_nanos.load(Ordering::Relaxed)),
        }
    }

    fn try_admit_probe(&self) -> bool {
        let mut admitted = self.probes_admitted.load(Ordering::Acquire);
        loop {
            if admitted >= self.config.success_threshold {
                self.reject();
                return false;
            }
            match self.probes_admitted.compare_exchange_weak(
                admitted,
                admitted + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(current) => admitted = current,
            }
        }
    }

    fn reject(&self) {
        self.rejected_calls.fetch_add(1, Ordering::Relaxed);
        self.config.events.emit(&BreakerEvent::CallRejected {
            name: self.config.name.clone(),
            timestamp: std::time::Instant::now(),
        });
        #[cfg(feature = "metrics")]
        metrics::counter!(
            "breaker_rejections_total",
            "breaker" => self.config.name.clone()
        )
        .increment(1);
    }

    /// CAS transition. Returns true if this caller performed it.
    fn transition(&self, from: BreakerState, to: BreakerState) -> bool {
        if self
            .state
            .compare_exchange(
                from as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return false;
        }

        self.last_transition_nanos
            .store(monotonic_nanos(), Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.consecutive_successes.store(0, Ordering::Relaxed);
        if to != BreakerState::HalfOpen {
            self.probes_admitted.store(0, Ordering::Relaxed);
        }

        self.config
            .events
            .emit(&BreakerEvent::StateTransition {
                name: self.config.name.clone(),
                timestamp: std::time::Instant::now(),
                from_state: from,
                to_state: to,
            });

        #[cfg(feature = "tracing")]
        tracing::info!(breaker = %self.config.name, from = ?from, to = ?to, "circuit state transition");

        #[cfg(feature = "metrics")]
        metrics::counter!(
            "breaker_transitions_total",
            "breaker" => self.config.name.clone(),
            "from" => from.as_label(),
            "to" => to.as_label()
        )
        .increment(1);

        true
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.config.name)
            .field("state", &self.state())
            .finish()
    }
}
