//! Session State
//!
//! The snapshot saved on state changes and restored on startup. Two copies
//! may exist (local and remote) and they are never merged: a restore picks
//! one complete snapshot.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Schema version written by this build.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Schema versions this build can read.
pub const SUPPORTED_SCHEMA_VERSIONS: &[u32] = &[CURRENT_SCHEMA_VERSION];

/// Position direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    /// Long exposure.
    Long,
    /// Short exposure.
    Short,
}

/// An open position tracked by the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    /// Asset symbol (e.g. `BTC`).
    pub symbol: String,
    /// Direction.
    pub side: PositionSide,
    /// Size in asset units.
    pub quantity: Decimal,
    /// Average entry price in quote currency.
    pub entry_price: Decimal,
    /// When the position was opened.
    pub opened_at: DateTime<Utc>,
}

/// A single portfolio holding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holding {
    /// Asset symbol.
    pub symbol: String,
    /// Amount held.
    pub amount: Decimal,
    /// Average cost basis per unit.
    pub cost_basis: Decimal,
}

/// Portfolio snapshot at save time.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioSnapshot {
    /// Total portfolio value in quote currency.
    pub total_value: Decimal,
    /// Uninvested cash.
    pub cash_balance: Decimal,
    /// Holdings by asset.
    pub holdings: Vec<Holding>,
}

/// Persisted session state for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    /// Owner of the session.
    pub user_id: String,
    /// Portfolio at save time.
    pub portfolio_snapshot: PortfolioSnapshot,
    /// Open positions at save time.
    pub active_positions: Vec<Position>,
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
    /// Record layout version.
    pub schema_version: u32,
}

impl SessionState {
    /// New snapshot stamped now with the current schema version.
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        portfolio_snapshot: PortfolioSnapshot,
        active_positions: Vec<Position>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            portfolio_snapshot,
            active_positions,
            timestamp: Utc::now(),
            schema_version: CURRENT_SCHEMA_VERSION,
        }
    }

    /// Override the snapshot time.
    #[must_use]
    pub const fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Age relative to `now`. Future timestamps count as zero age.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.timestamp).max(Duration::zero())
    }

    /// Whether the snapshot is older than `threshold` at `now`.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.age(now) > threshold
    }

    /// Whether this build understands the record layout.
    #[must_use]
    pub fn has_supported_schema(&self) -> bool {
        SUPPORTED_SCHEMA_VERSIONS.contains(&self.schema_version)
    }

    /// Whether the record belongs to `user_id` and can be interpreted.
    #[must_use]
    pub fn is_usable_for(&self, user_id: &str) -> bool {
        self.user_id == user_id && self.has_supported_schema()
    }
}

/// Versioned envelope stored by both backends.
///
/// The envelope layout is stable across schema versions; only `state` changes
/// shape. Records with an unsupported version are never decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Owner of the session (remote primary key).
    pub user_id: String,
    /// Layout version of `state`.
    pub schema_version: u32,
    /// Snapshot time, copied from the state.
    pub updated_at: DateTime<Utc>,
    /// Encoded [`SessionState`].
    pub state: serde_json::Value,
}

impl SessionRecord {
    /// Wrap a state for storage.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if the state cannot be encoded.
    pub fn encode(state: &SessionState) -> Result<Self, serde_json::Error> {
        Ok(Self {
            user_id: state.user_id.clone(),
            schema_version: state.schema_version,
            updated_at: state.timestamp,
            state: serde_json::to_value(state)?,
        })
    }

    /// Decode the state if this build understands it and it belongs to `user_id`.
    ///
    /// Anything else (foreign owner, unknown version, malformed payload) is
    /// "no usable state".
    #[must_use]
    pub fn decode_for(&self, user_id: &str) -> Option<SessionState> {
        if self.user_id != user_id || !SUPPORTED_SCHEMA_VERSIONS.contains(&self.schema_version) {
            return None;
        }
        match serde_json::from_value::<SessionState>(self.state.clone()) {
            Ok(state) if state.is_usable_for(user_id) => Some(state),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Discarding malformed session record");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> SessionState {
        SessionState::new(
            "user-1",
            PortfolioSnapshot {
                total_value: Decimal::from(12_500),
                cash_balance: Decimal::from(2_500),
                holdings: vec![Holding {
                    symbol: "BTC".to_string(),
                    amount: Decimal::new(15, 2),
                    cost_basis: Decimal::from(60_000),
                }],
            },
            vec![],
        )
    }

    #[test]
    fn new_state_uses_current_schema() {
        let s = state();
        assert_eq!(s.schema_version, CURRENT_SCHEMA_VERSION);
        assert!(s.has_supported_schema());
    }

    #[test]
    fn staleness_is_strictly_greater_than_threshold() {
        let now = Utc::now();
        let s = state().at(now - Duration::hours(24));
        assert!(!s.is_stale(now, Duration::hours(24)));
        assert!(s.is_stale(now + Duration::seconds(1), Duration::hours(24)));
    }

    #[test]
    fn future_timestamp_has_zero_age() {
        let now = Utc::now();
        let s = state().at(now + Duration::hours(1));
        assert_eq!(s.age(now), Duration::zero());
    }

    #[test]
    fn usability_checks_owner_and_schema() {
        let mut s = state();
        assert!(s.is_usable_for("user-1"));
        assert!(!s.is_usable_for("user-2"));

        s.schema_version = 99;
        assert!(!s.is_usable_for("user-1"));
    }

    #[test]
    fn record_decodes_for_owner_only() {
        let record = SessionRecord::encode(&state()).unwrap();
        assert_eq!(record.decode_for("user-1"), Some(state_with_ts(record.updated_at)));
        assert_eq!(record.decode_for("someone-else"), None);
    }

    #[test]
    fn record_with_unknown_version_is_not_decoded() {
        let mut record = SessionRecord::encode(&state()).unwrap();
        record.schema_version = 7;
        assert_eq!(record.decode_for("user-1"), None);
    }

    #[test]
    fn record_with_malformed_payload_is_not_decoded() {
        let mut record = SessionRecord::encode(&state()).unwrap();
        record.state = serde_json::json!({ "unexpected": true });
        assert_eq!(record.decode_for("user-1"), None);
    }

    fn state_with_ts(ts: DateTime<Utc>) -> SessionState {
        state().at(ts)
    }

    #[test]
    fn serializes_camel_case_with_decimal_strings() {
        let json = serde_json::to_value(state()).unwrap();
        assert_eq!(json["userId"], "user-1");
        assert_eq!(json["schemaVersion"], 1);
        assert_eq!(json["portfolioSnapshot"]["totalValue"], "12500");
    }
}
