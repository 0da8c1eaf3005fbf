//! Retry policy with exponential backoff and jitter.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff policy for failed (task, region) dispatches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt. 0 disables retrying.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial: Duration,
    /// Cap on the computed delay.
    pub max: Duration,
    /// Growth factor per retry.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial: Duration::from_millis(100),
            max: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `attempt` (1-based), with ±10% jitter so a
    /// burst of failures does not retry in lockstep.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exp = self.initial.as_secs_f64() * self.multiplier.powi((attempt - 1) as i32);
        let capped = exp.min(self.max.as_secs_f64());
        let jitter: f64 = rand::rng().random_range(0.9..1.1);
        Duration::from_secs_f64((capped * jitter).min(self.max.as_secs_f64()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_and_cap() {
        let policy = RetryPolicy::default();
        let d1 = policy.delay_for(1);
        let d3 = policy.delay_for(3);
        assert!(d1 >= Duration::from_millis(90) && d1 <= Duration::from_millis(110));
        assert!(d3 >= Duration::from_millis(360) && d3 <= Duration::from_millis(440));
        assert!(policy.delay_for(20) <= Duration::from_secs(5));
    }

    #[test]
    fn attempt_zero_has_no_delay() {
        assert_eq!(RetryPolicy::default().delay_for(0), Duration::ZERO);
    }
}
