//! Events emitted by the circuit breaker.

use crate::BreakerState;
use breakwater_core::events::EngineEvent;
use std::time::Instant;

/// Events emitted by a [`crate::CircuitBreaker`].
#[derive(Debug, Clone)]
pub enum BreakerEvent {
    /// The circuit changed state.
    StateTransition {
        /// Breaker name.
        name: String,
        /// When the transition happened.
        timestamp: Instant,
        /// State before the transition.
        from_state: BreakerState,
        /// State after the transition.
        to_state: BreakerState,
    },
    /// A call was refused while the circuit was open or probe-exhausted.
    CallRejected {
        /// Breaker name.
        name: String,
        /// When the rejection happened.
        timestamp: Instant,
    },
}

impl EngineEvent for BreakerEvent {
    fn kind(&self) -> &'static str {
        match self {
            BreakerEvent::StateTransition { .. } => "state_transition",
            BreakerEvent::CallRejected { .. } => "call_rejected",
        }
    }

    fn source(&self) -> &str {
        match self {
            BreakerEvent::StateTransition { name, .. }
            | BreakerEvent::CallRejected { name, .. } => name,
        }
    }
}
