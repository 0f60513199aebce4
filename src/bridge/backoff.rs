//! Reconnection delays.

use std::time::Duration;

use rand::Rng;

/// Growth factor between backoff steps.
const BACKOFF_FACTOR: f64 = 1.5;

/// Largest exponent drawn for a jittered delay.
const MAX_EXPONENT: u32 = 4;

/// How the connection task retries a lost connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Base delay, also the fixed retry delay after a failed connect.
    pub base_interval: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Consecutive failures tolerated before giving up; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(2000),
            max_delay: Duration::from_millis(30_000),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// `min(max_delay, base_interval * 1.5^exponent)`.
    #[must_use]
    pub fn delay_for(&self, exponent: u32) -> Duration {
        let factor = BACKOFF_FACTOR.powi(i32::try_from(exponent).unwrap_or(i32::MAX));
        let delay = self.base_interval.mul_f64(factor);
        delay.min(self.max_delay)
    }

    /// Delay after a close, with a random exponent in `0..=4`.
    #[must_use]
    pub fn jittered_delay(&self) -> Duration {
        self.delay_for(random_exponent())
    }
}

fn random_exponent() -> u32 {
    rand::rng().random_range(0..=MAX_EXPONENT)
}

/// Counts consecutive failed connection attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconnectState {
    attempts: u32,
}

impl ReconnectState {
    /// Attempts since the last successful open.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Records a failure; returns `false` once the policy's ceiling is hit.
    pub fn record_failure(&mut self, policy: &ReconnectPolicy) -> bool {
        self.attempts = self.attempts.saturating_add(1);
        policy.max_attempts.map_or(true, |max| self.attempts <= max)
    }

    /// Clears the counter after a successful open.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}
