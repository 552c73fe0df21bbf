//! Exponential backoff strategy for retry policies.

use std::time::Duration;

/// Jitter fraction applied when a policy enables jitter.
pub const DEFAULT_JITTER: f64 = 0.25;

#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    factor: f64,
    jitter: f64,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration, factor: f64) -> Self {
        Self {
            initial,
            max,
            factor,
            jitter: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before retry number `attempt` (1-based). A factor of zero keeps
    /// the delay constant at the initial value. Jitter is applied before the
    /// cap, so the result never exceeds the max delay.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let initial = self.initial.as_millis() as f64;
        let base = if self.factor == 0.0 {
            initial
        } else {
            initial * self.factor.powi(attempt.saturating_sub(1) as i32)
        };

        let jittered = if self.jitter > 0.0 {
            let jitter_range = base * self.jitter;
            base + rand::random::<f64>() * jitter_range * 2.0 - jitter_range
        } else {
            base
        };
        let clamped = jittered.clamp(0.0, self.max.as_millis() as f64);

        Duration::from_millis(clamped as u64)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(1000),
            max: Duration::from_secs(60),
            factor: 2.0,
            jitter: DEFAULT_JITTER,
        }
    }
}
