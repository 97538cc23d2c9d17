//! Heartbeat Tracking
//!
//! Decides, on each heartbeat tick, whether to ping the push feed or treat
//! the connection as dead. Any inbound frame counts as proof of life.

use std::time::Duration;

use tokio::time::Instant;

use crate::infrastructure::config::StreamSettings;

/// Heartbeat timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between pings.
    pub ping_interval: Duration,
    /// Silence after a ping before the connection is considered dead.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(60),
        }
    }
}

impl HeartbeatConfig {
    /// Heartbeat timing from the stream settings.
    #[must_use]
    pub const fn from_stream_settings(settings: &StreamSettings) -> Self {
        Self {
            ping_interval: settings.heartbeat_interval,
            pong_timeout: settings.heartbeat_timeout,
        }
    }
}

/// What the connection loop should do on a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a ping frame.
    SendPing,
    /// No answer within the timeout; drop the connection.
    TimedOut,
}

/// Per-connection heartbeat state.
#[derive(Debug)]
pub struct Heartbeat {
    config: HeartbeatConfig,
    last_seen: Instant,
    awaiting_pong: bool,
}

impl Heartbeat {
    /// Start tracking a connection opened at `now`.
    #[must_use]
    pub const fn new(config: HeartbeatConfig, now: Instant) -> Self {
        Self {
            config,
            last_seen: now,
            awaiting_pong: false,
        }
    }

    /// Record inbound traffic.
    pub const fn record_activity(&mut self, now: Instant) {
        self.last_seen = now;
        self.awaiting_pong = false;
    }

    /// Evaluate a tick at `now`.
    pub fn on_tick(&mut self, now: Instant) -> HeartbeatAction {
        let silence = now.saturating_duration_since(self.last_seen);
        if self.awaiting_pong && silence > self.config.pong_timeout {
            tracing::warn!(
                silence_secs = silence.as_secs(),
                timeout_secs = self.config.pong_timeout.as_secs(),
                "Push feed heartbeat timeout"
            );
            return HeartbeatAction::TimedOut;
        }
        self.awaiting_pong = true;
        HeartbeatAction::SendPing
    }

    /// Ping interval.
    #[must_use]
    pub const fn ping_interval(&self) -> Duration {
        self.config.ping_interval
    }
}
