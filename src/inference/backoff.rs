// src/inference/backoff.rs
use std::time::Duration;

/// Exponential backoff: `base * factor^(attempt-1)`, capped at `max_delay`,
/// for at most `max_attempts` calls in total.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub factor: f64,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            factor: 2.0,
            max_delay: Duration::from_secs(30),
            max_attempts: 4,
        }
    }
}

impl BackoffPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    /// Non-decreasing in `attempt` and never above `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = if self.factor.is_finite() && self.factor >= 1.0 {
            self.factor
        } else {
            1.0
        };
        let ms = self.base.as_millis() as f64 * factor.powi(exp);
        let cap_ms = self.max_delay.as_millis() as f64;
        if !ms.is_finite() || ms >= cap_ms {
            self.max_delay
        } else {
            Duration::from_millis(ms as u64)
        }
    }

    /// Sum of all waits a caller goes through when every attempt fails.
    pub fn total_budget(&self) -> Duration {
        (1..self.max_attempts.max(1)).map(|a| self.delay_for(a)).sum()
    }
}
