//! Exponential backoff state machine with jitter.
//!
//! Pure state — the caller owns the sleeps — so reconnect and retry logic
//! can be tested without timers.

use rand::Rng;
use std::time::Duration;

/// Backoff parameters: base delay, doubling per attempt, capped at `max`,
/// giving up after `max_attempts`.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub base: Duration,
    pub max: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(60),
            max_attempts: 5,
        }
    }
}

/// Tracks the attempt count and yields the next jittered delay.
///
/// Jitter is sampled uniformly from `[delay/2, delay]` to spread out
/// simultaneous reconnects.
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Attempts consumed so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Start over after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Delay to sleep before the next attempt, or `None` once the attempt
    /// budget is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.config.max_attempts {
            return None;
        }

        let base_ms = self.config.base.as_millis() as u64;
        let max_ms = self.config.max.as_millis() as u64;
        let shift = self.attempt.min(20);
        let raw_ms = base_ms.saturating_mul(1u64 << shift).min(max_ms);

        self.attempt += 1;

        let jittered_ms = if raw_ms <= 1 {
            raw_ms
        } else {
            rand::thread_rng().gen_range(raw_ms / 2..=raw_ms)
        };
        Some(Duration::from_millis(jittered_ms))
    }
}
