//! Exponential backoff between failed connection attempts.

use std::time::Duration;

use dvrelay_core::BackoffPolicy;

/// Deterministic exponential backoff: attempt `k` waits `min * factor^k`,
/// capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Delay for the current attempt, without advancing.
    pub fn current(&self) -> Duration {
        let min = self.policy.min_ms as f64;
        let max = self.policy.max_ms as f64;
        let exp = i32::try_from(self.attempt).unwrap_or(i32::MAX);
        let ms = min * self.policy.factor.powi(exp);
        if !ms.is_finite() || ms >= max {
            return self.policy.max();
        }
        Duration::from_millis(ms.round() as u64)
    }

    /// Returns the delay to sleep now and advances to the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current();
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Back to `min` after a successful connect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Failed attempts since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }
}
