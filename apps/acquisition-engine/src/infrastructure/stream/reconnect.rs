//! Reconnection Backoff
//!
//! Exponential backoff with jitter between push feed reconnection attempts.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::StreamSettings;

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 0,
        }
    }
}

impl ReconnectConfig {
    /// Backoff parameters from the stream settings.
    #[must_use]
    pub fn from_stream_settings(settings: &StreamSettings) -> Self {
        Self {
            initial_delay: settings.reconnect_delay_initial,
            max_delay: settings.reconnect_delay_max,
            multiplier: settings.reconnect_delay_multiplier,
            max_attempts: settings.max_reconnect_attempts,
            ..Self::default()
        }
    }
}

/// Stateful backoff sequence for one connection.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    next: Duration,
    attempts: u32,
}

impl ReconnectPolicy {
    /// Start a fresh sequence.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        let next = config.initial_delay;
        Self {
            config,
            next,
            attempts: 0,
        }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.exhausted() {
            return None;
        }
        self.attempts += 1;

        let delay = jittered(self.next, self.config.jitter_factor);
        let grown = if self.config.multiplier.is_finite() && self.config.multiplier > 0.0 {
            self.next.mul_f64(self.config.multiplier)
        } else {
            self.next
        };
        self.next = grown.min(self.config.max_delay);

        Some(delay)
    }

    /// Restart the sequence after a successful connection.
    pub const fn reset(&mut self) {
        self.next = self.config.initial_delay;
        self.attempts = 0;
    }

    /// Attempts made since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempts
    }

    const fn exhausted(&self) -> bool {
        self.config.max_attempts > 0 && self.attempts >= self.config.max_attempts
    }
}

fn jittered(delay: Duration, factor: f64) -> Duration {
    if factor <= 0.0 || delay.is_zero() {
        return delay;
    }
    let spread = factor.min(1.0);
    let scale = rand::rng().random_range((1.0 - spread)..=(1.0 + spread));
    delay.mul_f64(scale).max(Duration::from_millis(1))
}
