//! State Persistence
//!
//! Saves session state to a fast local store and a durable remote store, and
//! picks one complete copy on restore.
//!
//! # Restore precedence
//!
//! 1. Local copy, if usable and no older than the staleness threshold.
//! 2. Otherwise the newer of the usable remote copy and the stale local copy.
//! 3. Nothing usable anywhere: no state (the caller starts a fresh session).
//!
//! Copies are never merged. "Usable" means the record belongs to the
//! requested user and carries a supported schema version.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::application::ports::{LocalStore, RemoteStore};
use crate::domain::session::{SessionRecord, SessionState};
use crate::error::{ConfigurationError, PersistenceError};
use crate::infrastructure::metrics::{self, Backend, StoreOperation};

/// Default age beyond which a local copy is no longer preferred.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// Which backends accepted a save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveReport {
    /// Local write succeeded.
    pub local: bool,
    /// Remote upsert succeeded.
    pub remote: bool,
}

impl SaveReport {
    /// Whether no backend accepted the write.
    #[must_use]
    pub const fn is_lost(&self) -> bool {
        !self.local && !self.remote
    }
}

/// Backend a restored copy came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreSource {
    /// Fresh local copy.
    Local,
    /// Remote copy.
    Remote,
    /// Local copy past the staleness threshold, used because nothing newer exists.
    StaleLocal,
}

/// A restored session and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoredSession {
    /// Restored state.
    pub state: SessionState,
    /// Origin of the copy.
    pub source: RestoreSource,
}

/// Local-first, remote-durable session persistence.
#[derive(Clone)]
pub struct StatePersistence {
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    stale_after: chrono::Duration,
}

impl std::fmt::Debug for StatePersistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatePersistence")
            .field("stale_after", &self.stale_after)
            .finish_non_exhaustive()
    }
}

/// Outcome of reading one backend.
enum Read {
    Usable(SessionState),
    Unusable,
    Failed(String),
}

impl StatePersistence {
    /// Create a persistence service over the two stores.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] if `stale_after` is zero or too large.
    pub fn new(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        stale_after: Duration,
    ) -> Result<Self, ConfigurationError> {
        let stale_after = chrono::Duration::from_std(stale_after)
            .ok()
            .filter(|d| *d > chrono::Duration::zero())
            .ok_or(ConfigurationError::NonPositiveDuration {
                setting: "session stale_after",
            })?;

        Ok(Self {
            local,
            remote,
            stale_after,
        })
    }

    /// Local store key for `user_id`.
    #[must_use]
    pub fn local_key(user_id: &str) -> String {
        format!("session:{user_id}")
    }

    /// Save `user_id`'s `state` locally, then remotely.
    ///
    /// Neither store failure is raised. A remote failure does not undo the
    /// local write.
    ///
    /// # Errors
    ///
    /// Nothing is written when either of these is returned:
    /// - [`PersistenceError::OwnerMismatch`] if `state` belongs to another user.
    /// - [`PersistenceError::Serialization`] if the state cannot be encoded.
    pub async fn save(&self, user_id: &str, state: &SessionState) -> Result<SaveReport, PersistenceError> {
        if state.user_id != user_id {
            return Err(PersistenceError::OwnerMismatch {
                expected: user_id.to_string(),
                found: state.user_id.clone(),
            });
        }
        let record = SessionRecord::encode(state)?;
        let encoded = serde_json::to_string(&record)?;

        let local = match self.local.set(&Self::local_key(user_id), &encoded) {
            Ok(()) => true,
            Err(e) => {
                metrics::record_persistence_failure(Backend::Local, StoreOperation::Save);
                tracing::warn!(user_id, error = %e, "Local session save failed");
                false
            }
        };

        let remote = match self.remote.upsert(&record).await {
            Ok(()) => true,
            Err(e) => {
                metrics::record_persistence_failure(Backend::Remote, StoreOperation::Save);
                tracing::warn!(user_id, error = %e, "Remote session save failed");
                false
            }
        };

        let report = SaveReport { local, remote };
        if report.is_lost() {
            tracing::error!(user_id, "Session state not persisted to any backend");
        } else {
            tracing::debug!(user_id, local, remote, "Session state saved");
        }
        Ok(report)
    }

    /// Restore the best available copy for `user_id`.
    ///
    /// Returns `Ok(None)` when no usable copy exists.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::AllBackendsUnavailable`] when both stores
    /// failed to answer.
    pub async fn restore(&self, user_id: &str) -> Result<Option<RestoredSession>, PersistenceError> {
        let now = Utc::now();

        let local = self.read_local(user_id);
        if let Read::Usable(state) = &local
            && !state.is_stale(now, self.stale_after)
        {
            tracing::info!(user_id, "Restored session from local store");
            return Ok(Some(RestoredSession {
                state: state.clone(),
                source: RestoreSource::Local,
            }));
        }

        let remote = self.read_remote(user_id).await;

        match (local, remote) {
            (Read::Failed(local), Read::Failed(remote)) => {
                tracing::error!(user_id, local = %local, remote = %remote, "No session backend reachable");
                Err(PersistenceError::AllBackendsUnavailable { local, remote })
            }
            (Read::Usable(stale), Read::Usable(remote)) => {
                if stale.timestamp > remote.timestamp {
                    tracing::info!(user_id, "Stale local session is newer than remote copy");
                    Ok(Some(RestoredSession {
                        state: stale,
                        source: RestoreSource::StaleLocal,
                    }))
                } else {
                    tracing::info!(user_id, "Restored session from remote store");
                    Ok(Some(RestoredSession {
                        state: remote,
                        source: RestoreSource::Remote,
                    }))
                }
            }
            (_, Read::Usable(remote)) => {
                tracing::info!(user_id, "Restored session from remote store");
                Ok(Some(RestoredSession {
                    state: remote,
                    source: RestoreSource::Remote,
                }))
            }
            (Read::Usable(stale), _) => {
                tracing::info!(user_id, "Restored stale local session, no remote copy available");
                Ok(Some(RestoredSession {
                    state: stale,
                    source: RestoreSource::StaleLocal,
                }))
            }
            _ => {
                tracing::info!(user_id, "No usable session state");
                Ok(None)
            }
        }
    }

    fn read_local(&self, user_id: &str) -> Read {
        let raw = match self.local.get(&Self::local_key(user_id)) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Read::Unusable,
            Err(e) => {
                metrics::record_persistence_failure(Backend::Local, StoreOperation::Restore);
                tracing::warn!(user_id, error = %e, "Local session read failed");
                return Read::Failed(e.to_string());
            }
        };

        match serde_json::from_str::<SessionRecord>(&raw) {
            Ok(record) => record.decode_for(user_id).map_or(Read::Unusable, Read::Usable),
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Discarding unreadable local session");
                Read::Unusable
            }
        }
    }

    async fn read_remote(&self, user_id: &str) -> Read {
        match self.remote.select(user_id).await {
            Ok(Some(record)) => record.decode_for(user_id).map_or(Read::Unusable, Read::Usable),
            Ok(None) => Read::Unusable,
            Err(e) => {
                metrics::record_persistence_failure(Backend::Remote, StoreOperation::Restore);
                tracing::warn!(user_id, error = %e, "Remote session read failed");
                Read::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration as ChronoDuration};

    use super::*;
    use crate::application::ports::{MockLocalStore, MockRemoteStore};
    use crate::domain::session::PortfolioSnapshot;

    fn state(user_id: &str, at: DateTime<Utc>) -> SessionState {
        SessionState::new(user_id, PortfolioSnapshot::default(), vec![]).at(at)
    }

    fn encoded(state: &SessionState) -> String {
        serde_json::to_string(&SessionRecord::encode(state).unwrap()).unwrap()
    }

    fn local_with(value: Option<String>) -> MockLocalStore {
        let mut local = MockLocalStore::new();
        local.expect_get().returning(move |_| Ok(value.clone()));
        local
    }

    fn remote_with(state: Option<SessionState>) -> MockRemoteStore {
        let mut remote = MockRemoteStore::new();
        remote
            .expect_select()
            .returning(move |_| Ok(state.as_ref().map(|s| SessionRecord::encode(s).unwrap())));
        remote
    }

    fn persistence(local: MockLocalStore, remote: MockRemoteStore) -> StatePersistence {
        StatePersistence::new(Arc::new(local), Arc::new(remote), DEFAULT_STALE_AFTER).unwrap()
    }

    #[tokio::test]
    async fn fresh_local_copy_wins_without_remote_read() {
        let now = Utc::now();
        let local_state = state("u1", now - ChronoDuration::hours(1));
        let mut remote = MockRemoteStore::new();
        remote.expect_select().never();

        let restored = persistence(local_with(Some(encoded(&local_state))), remote)
            .restore("u1")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(restored.source, RestoreSource::Local);
        assert_eq!(restored.state, local_state);
    }

    #[tokio::test]
    async fn stale_local_copy_defers_to_remote() {
        let now = Utc::now();
        let local_state = state("u1", now - ChronoDuration::hours(25));
        let remote_state = state("u1", now - ChronoDuration::hours(2));

        let restored = persistence(
            local_with(Some(encoded(&local_state))),
            remote_with(Some(remote_state.clone())),
        )
        .restore("u1")
        .await
        .unwrap()
        .unwrap();

        assert_eq!(restored.source, RestoreSource::Remote);
        assert_eq!(restored.state, remote_state);
    }

    #[tokio::test]
    async fn stale_local_copy_is_used_when_remote_is_empty() {
        let local_state = state("u1", Utc::now() - ChronoDuration::hours(30));

        let restored = persistence(local_with(Some(encoded(&local_state))), remote_with(None))
            .restore("u1")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(restored.source, RestoreSource::StaleLocal);
    }

    #[tokio::test]
    async fn stale_local_copy_newer_than_remote_wins() {
        let now = Utc::now();
        let local_state = state("u1", now - ChronoDuration::hours(25));
        let remote_state = state("u1", now - ChronoDuration::hours(48));

        let restored = persistence(
            local_with(Some(encoded(&local_state))),
            remote_with(Some(remote_state)),
        )
        .restore("u1")
        .await
        .unwrap()
        .unwrap();

        assert_eq!(restored.source, RestoreSource::StaleLocal);
        assert_eq!(restored.state, local_state);
    }

    #[tokio::test]
    async fn foreign_or_unknown_schema_copies_are_ignored() {
        let now = Utc::now();
        let foreign = state("someone-else", now);
        let mut future_schema = state("u1", now);
        future_schema.schema_version = 42;

        let restored = persistence(
            local_with(Some(encoded(&foreign))),
            remote_with(Some(future_schema)),
        )
        .restore("u1")
        .await
        .unwrap();

        assert!(restored.is_none());
    }

    #[tokio::test]
    async fn garbage_local_value_falls_through_to_remote() {
        let remote_state = state("u1", Utc::now());

        let restored = persistence(
            local_with(Some("{not json".to_string())),
            remote_with(Some(remote_state.clone())),
        )
        .restore("u1")
        .await
        .unwrap()
        .unwrap();

        assert_eq!(restored.state, remote_state);
    }

    #[tokio::test]
    async fn both_backends_failing_is_reported() {
        let mut local = MockLocalStore::new();
        local
            .expect_get()
            .returning(|_| Err(PersistenceError::Local("disk full".to_string())));
        let mut remote = MockRemoteStore::new();
        remote
            .expect_select()
            .returning(|_| Err(PersistenceError::Remote("timeout".to_string())));

        let err = persistence(local, remote).restore("u1").await.unwrap_err();
        assert!(matches!(err, PersistenceError::AllBackendsUnavailable { .. }));
    }

    #[tokio::test]
    async fn missing_everywhere_is_no_state() {
        let restored = persistence(local_with(None), remote_with(None))
            .restore("u1")
            .await
            .unwrap();
        assert!(restored.is_none());
    }

    #[tokio::test]
    async fn save_writes_local_then_remote() {
        let state = state("u1", Utc::now());
        let mut local = MockLocalStore::new();
        local
            .expect_set()
            .withf(|key, _| key.to_string() == "session:u1")
            .times(1)
            .returning(|_, _| Ok(()));
        let mut remote = MockRemoteStore::new();
        remote
            .expect_upsert()
            .withf(|record| record.user_id == "u1")
            .times(1)
            .returning(|_| Ok(()));

        let report = persistence(local, remote).save("u1", &state).await.unwrap();
        assert_eq!(
            report,
            SaveReport {
                local: true,
                remote: true
            }
        );
    }

    #[tokio::test]
    async fn save_tolerates_failing_backends() {
        let state = state("u1", Utc::now());
        let mut local = MockLocalStore::new();
        local
            .expect_set()
            .returning(|_, _| Err(PersistenceError::Local("quota exceeded".to_string())));
        let mut remote = MockRemoteStore::new();
        remote
            .expect_upsert()
            .times(1)
            .returning(|_| Err(PersistenceError::Remote("503".to_string())));

        let report = persistence(local, remote).save("u1", &state).await.unwrap();
        assert!(report.is_lost());
    }

    #[tokio::test]
    async fn save_for_another_user_writes_nothing() {
        let state = state("u1", Utc::now());
        let mut local = MockLocalStore::new();
        local.expect_set().never();
        let mut remote = MockRemoteStore::new();
        remote.expect_upsert().never();

        let err = persistence(local, remote).save("u2", &state).await.unwrap_err();
        assert_eq!(
            err,
            PersistenceError::OwnerMismatch {
                expected: "u2".to_string(),
                found: "u1".to_string(),
            }
        );
    }

    #[test]
    fn zero_stale_threshold_is_rejected() {
        let result = StatePersistence::new(
            Arc::new(MockLocalStore::new()),
            Arc::new(MockRemoteStore::new()),
            Duration::ZERO,
        );
        assert!(result.is_err());
    }
}
