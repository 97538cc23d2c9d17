//! Acquisition Mode Types
//!
//! The polling/streaming state, trigger identifiers and the rule that picks
//! a single trigger from a market snapshot.
//!
//! # State Machine
//!
//! ```text
//! POLLING → STREAMING (trigger holds, activate() succeeded)
//! STREAMING → POLLING (revert timer elapsed, or explicit deactivation)
//! ```

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Default time spent in streaming mode before reverting to polling.
pub const DEFAULT_REVERT_AFTER: Duration = Duration::from_secs(30 * 60);

/// How market data is currently acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Low-frequency periodic polling.
    #[default]
    Polling,
    /// High-frequency push feed.
    Streaming,
}

impl Mode {
    /// Mode name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Polling => "polling",
            Self::Streaming => "streaming",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Market condition that switched acquisition into streaming mode.
///
/// Variants are declared in evaluation priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// An externally flagged high-impact event.
    MajorEvent,
    /// Volatility above the configured threshold.
    HighVolatility,
    /// Volume ratio above the configured threshold.
    VolumeSpike,
    /// Explicit user activation.
    Manual,
}

impl Trigger {
    /// Trigger id as recorded in mode state and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MajorEvent => "major_event",
            Self::HighVolatility => "high_volatility",
            Self::VolumeSpike => "volume_spike",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Market conditions sampled by the snapshot provider.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSnapshot {
    /// Current volatility measure.
    pub volatility: f64,
    /// Current volume relative to its baseline.
    pub volume_spike: f64,
    /// Whether a high-impact event is flagged.
    pub major_event: bool,
}

impl MarketSnapshot {
    /// Snapshot with only volatility set.
    #[must_use]
    pub const fn with_volatility(volatility: f64) -> Self {
        Self {
            volatility,
            volume_spike: 0.0,
            major_event: false,
        }
    }
}

/// Thresholds above which a snapshot triggers streaming.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerThresholds {
    /// Volatility threshold (strictly greater than triggers).
    pub volatility: f64,
    /// Volume ratio threshold (strictly greater than triggers).
    pub volume_spike: f64,
}

impl Default for TriggerThresholds {
    fn default() -> Self {
        Self {
            volatility: 3.0,
            volume_spike: 2.0,
        }
    }
}

impl TriggerThresholds {
    /// Validate that both thresholds are finite.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidThreshold`] for NaN or infinite values.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !self.volatility.is_finite() {
            return Err(ConfigurationError::InvalidThreshold {
                setting: "volatility threshold",
                value: self.volatility,
            });
        }
        if !self.volume_spike.is_finite() {
            return Err(ConfigurationError::InvalidThreshold {
                setting: "volume spike threshold",
                value: self.volume_spike,
            });
        }
        Ok(())
    }

    /// Pick the single trigger recorded for a snapshot.
    ///
    /// Order: major event, volatility, volume spike, manual. The first
    /// condition that holds wins.
    #[must_use]
    pub fn select(&self, snapshot: &MarketSnapshot, manual: bool) -> Option<Trigger> {
        if snapshot.major_event {
            Some(Trigger::MajorEvent)
        } else if snapshot.volatility > self.volatility {
            Some(Trigger::HighVolatility)
        } else if snapshot.volume_spike > self.volume_spike {
            Some(Trigger::VolumeSpike)
        } else if manual {
            Some(Trigger::Manual)
        } else {
            None
        }
    }
}

/// Observable acquisition state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcquisitionMode {
    /// Current mode.
    pub mode: Mode,
    /// Trigger that caused the current streaming period.
    pub active_trigger: Option<Trigger>,
    /// When the current streaming period started.
    pub activated_at: Option<DateTime<Utc>>,
    /// How long a streaming period lasts.
    #[serde(with = "duration_secs")]
    pub revert_after: Duration,
}

impl AcquisitionMode {
    /// Initial polling state.
    #[must_use]
    pub const fn polling(revert_after: Duration) -> Self {
        Self {
            mode: Mode::Polling,
            active_trigger: None,
            activated_at: None,
            revert_after,
        }
    }

    /// Streaming state started at `at` by `trigger`.
    #[must_use]
    pub const fn streaming(trigger: Trigger, at: DateTime<Utc>, revert_after: Duration) -> Self {
        Self {
            mode: Mode::Streaming,
            active_trigger: Some(trigger),
            activated_at: Some(at),
            revert_after,
        }
    }

    /// Whether the push feed is active.
    #[must_use]
    pub const fn is_streaming(&self) -> bool {
        matches!(self.mode, Mode::Streaming)
    }

    /// Scheduled reversion time, if streaming.
    #[must_use]
    pub fn reverts_at(&self) -> Option<DateTime<Utc>> {
        let at = self.activated_at?;
        let revert = chrono::Duration::from_std(self.revert_after).ok()?;
        Some(at + revert)
    }
}

impl Default for AcquisitionMode {
    fn default() -> Self {
        Self::polling(DEFAULT_REVERT_AFTER)
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn snapshot(volatility: f64, volume_spike: f64, major_event: bool) -> MarketSnapshot {
        MarketSnapshot {
            volatility,
            volume_spike,
            major_event,
        }
    }

    #[test_case(snapshot(5.0, 5.0, true), true => Some(Trigger::MajorEvent); "major event beats everything")]
    #[test_case(snapshot(5.0, 5.0, false), true => Some(Trigger::HighVolatility); "volatility beats volume and manual")]
    #[test_case(snapshot(1.0, 5.0, false), true => Some(Trigger::VolumeSpike); "volume beats manual")]
    #[test_case(snapshot(1.0, 1.0, false), true => Some(Trigger::Manual); "manual when nothing else holds")]
    #[test_case(snapshot(1.0, 1.0, false), false => None; "no trigger")]
    #[test_case(snapshot(3.0, 2.0, false), false => None; "thresholds are exclusive")]
    fn trigger_priority(snap: MarketSnapshot, manual: bool) -> Option<Trigger> {
        TriggerThresholds::default().select(&snap, manual)
    }

    #[test]
    fn trigger_ids() {
        assert_eq!(Trigger::MajorEvent.as_str(), "major_event");
        assert_eq!(Trigger::HighVolatility.as_str(), "high_volatility");
        assert_eq!(Trigger::VolumeSpike.as_str(), "volume_spike");
        assert_eq!(Trigger::Manual.as_str(), "manual");
    }

    #[test]
    fn nan_threshold_is_rejected() {
        let thresholds = TriggerThresholds {
            volatility: f64::NAN,
            volume_spike: 2.0,
        };
        assert!(thresholds.validate().is_err());
    }

    #[test]
    fn snapshot_deserializes_camel_case() {
        let snap: MarketSnapshot =
            serde_json::from_str(r#"{"volatility":4.2,"volumeSpike":1.1,"majorEvent":true}"#)
                .unwrap();
        assert!(snap.major_event);
        assert!((snap.volatility - 4.2).abs() < f64::EPSILON);
    }

    #[test]
    fn reverts_at_adds_duration() {
        let at = Utc::now();
        let mode = AcquisitionMode::streaming(Trigger::Manual, at, Duration::from_secs(60));
        assert_eq!(mode.reverts_at(), Some(at + chrono::Duration::seconds(60)));
        assert_eq!(AcquisitionMode::default().reverts_at(), None);
    }
}
