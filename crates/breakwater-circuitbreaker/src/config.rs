use crate::events::BreakerEvent;
use crate::{BreakerState, CircuitBreaker};
use breakwater_core::events::EventSink;
use std::time::Duration;

/// Configuration for a circuit breaker instance.
pub struct BreakerConfig {
    pub(crate) failure_threshold: u32,
    pub(crate) recovery_timeout: Duration,
    pub(crate) success_threshold: u32,
    pub(crate) events: EventSink<BreakerEvent>,
    pub(crate) name: String,
}

impl BreakerConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> BreakerConfigBuilder {
        BreakerConfigBuilder::new()
    }
}

/// Builder for configuring and constructing a [`CircuitBreaker`].
pub struct BreakerConfigBuilder {
    failure_threshold: u32,
    recovery_timeout: Duration,
    success_threshold: u32,
    events: EventSink<BreakerEvent>,
    name: String,
}

impl BreakerConfigBuilder {
    /// Creates a new builder with default values.
    pub fn new() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 1,
            events: EventSink::none(),
            name: String::from("<unnamed>"),
        }
    }

    /// Consecutive failures that open the circuit.
    ///
    /// Default: 5
    pub fn failure_threshold(mut self, n: u32) -> Self {
        self.failure_threshold = n;
        self
    }

    /// How long the circuit stays open before admitting recovery probes.
    ///
    /// Default: 30 seconds
    pub fn recovery_timeout(mut self, duration: Duration) -> Self {
        self.recovery_timeout = duration;
        self
    }

    /// Consecutive half-open successes required to close the circuit.
    /// Also bounds how many probes a half-open episode admits.
    ///
    /// Default: 1
    pub fn success_threshold(mut self, n: u32) -> Self {
        self.success_threshold = n;
        self
    }

    /// Give this breaker a human-readable name for observability.
    ///
    /// Default: `<unnamed>`
    pub fn name<N: Into<String>>(mut self, n: N) -> Self {
        self.name = n.into();
        self
    }

    /// Register a callback for state transition events.
    pub fn on_state_transition<F>(mut self, f: F) -> Self
    where
        F: Fn(BreakerState, BreakerState) + Send + Sync + 'static,
    {
        self.events.hook(move |event: &BreakerEvent| {
            if let BreakerEvent::StateTransition {
                from_state,
                to_state,
                ..
            } = event
            {
                f(*from_state, *to_state);
            }
        });
        self
    }

    /// Register a callback for call rejected events.
    pub fn on_call_rejected<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.events.hook(move |event: &BreakerEvent| {
            if matches!(event, BreakerEvent::CallRejected { .. }) {
                f();
            }
        });
        self
    }

    /// Builds the breaker.
    ///
    /// # Panics
    ///
    /// Panics if either threshold is zero.
    pub fn build(self) -> CircuitBreaker {
        assert!(self.failure_threshold > 0, "failure_threshold must be > 0");
        assert!(self.success_threshold > 0, "success_threshold must be > 0");

        CircuitBreaker::from_config(BreakerConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: self.recovery_timeout,
            success_threshold: self.success_threshold,
            events: self.events,
            name: self.name,
        })
    }
}

impl Default for BreakerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
