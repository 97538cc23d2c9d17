//! Session Recovery Integration Tests
//!
//! Save and restore across the file-backed local store and an in-memory
//! remote store, including backend outages and stale local copies.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;

use acquisition_engine::infrastructure::stores::{FileLocalStore, InMemoryRemoteStore};
use acquisition_engine::{
    LocalStore, PortfolioSnapshot, RestoreSource, SessionState, StatePersistence,
};

const STALE_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

fn state(user_id: &str, total: i64) -> SessionState {
    SessionState::new(
        user_id,
        PortfolioSnapshot {
            total_value: Decimal::from(total),
            cash_balance: Decimal::ZERO,
            holdings: vec![],
        },
        vec![],
    )
}

struct Harness {
    _dir: tempfile::TempDir,
    local: Arc<FileLocalStore>,
    remote: Arc<InMemoryRemoteStore>,
    persistence: StatePersistence,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let local = Arc::new(FileLocalStore::open(dir.path()).unwrap());
    let remote = Arc::new(InMemoryRemoteStore::new());
    let persistence =
        StatePersistence::new(local.clone(), remote.clone(), STALE_AFTER).unwrap();
    Harness {
        _dir: dir,
        local,
        remote,
        persistence,
    }
}

#[tokio::test]
async fn saved_state_survives_a_restart() {
    let h = harness();
    let saved = state("user-1", 10_000);
    h.persistence.save("user-1", &saved).await.unwrap();

    // A new service over the same directory and remote sees the same state.
    let restarted =
        StatePersistence::new(h.local.clone(), h.remote.clone(), STALE_AFTER).unwrap();
    let restored = restarted.restore("user-1").await.unwrap().unwrap();

    assert_eq!(restored.state, saved);
    assert_eq!(restored.source, RestoreSource::Local);
}

#[tokio::test]
async fn remote_copy_recovers_a_wiped_local_store() {
    let h = harness();
    let saved = state("user-1", 10_000);
    h.persistence.save("user-1", &saved).await.unwrap();

    let empty_dir = tempfile::tempdir().unwrap();
    let fresh_local = Arc::new(FileLocalStore::open(empty_dir.path()).unwrap());
    let persistence = StatePersistence::new(fresh_local, h.remote.clone(), STALE_AFTER).unwrap();

    let restored = persistence.restore("user-1").await.unwrap().unwrap();
    assert_eq!(restored.source, RestoreSource::Remote);
    assert_eq!(restored.state, saved);
}

#[tokio::test]
async fn remote_outage_keeps_the_local_write() {
    let h = harness();
    h.remote.set_available(false);

    let report = h.persistence.save("user-1", &state("user-1", 5)).await.unwrap();

    assert!(report.local);
    assert!(!report.remote);
    assert!(!report.is_lost());
    assert!(h.remote.raw("user-1").is_none());
    assert!(h.persistence.restore("user-1").await.unwrap().is_some());
}

#[tokio::test]
async fn stale_local_copy_loses_to_newer_remote() {
    let h = harness();
    let old = state("user-1", 1).at(Utc::now() - chrono::Duration::days(3));
    h.persistence.save("user-1", &old).await.unwrap();

    // Another device writes a newer copy to the shared remote.
    let newer = state("user-1", 2).at(Utc::now() - chrono::Duration::days(2));
    let other_dir = tempfile::tempdir().unwrap();
    let side = StatePersistence::new(
        Arc::new(FileLocalStore::open(other_dir.path()).unwrap()),
        h.remote.clone(),
        STALE_AFTER,
    )
    .unwrap();
    side.save("user-1", &newer).await.unwrap();

    let restored = h.persistence.restore("user-1").await.unwrap().unwrap();
    assert_eq!(restored.source, RestoreSource::Remote);
    assert_eq!(restored.state.portfolio_snapshot.total_value, Decimal::from(2));
}

#[tokio::test]
async fn unknown_user_starts_fresh() {
    let h = harness();
    h.persistence.save("user-1", &state("user-1", 1)).await.unwrap();

    assert!(h.persistence.restore("user-2").await.unwrap().is_none());
}

#[tokio::test]
async fn corrupt_local_file_falls_back_to_remote() {
    let h = harness();
    let saved = state("user-1", 7);
    h.persistence.save("user-1", &saved).await.unwrap();

    h.local
        .set(&StatePersistence::local_key("user-1"), "{not json")
        .unwrap();

    let restored = h.persistence.restore("user-1").await.unwrap().unwrap();
    assert_eq!(restored.source, RestoreSource::Remote);
    assert_eq!(restored.state, saved);
}

#[tokio::test]
async fn remote_outage_with_empty_local_reports_nothing_to_restore() {
    let h = harness();
    h.remote.set_available(false);

    let restored = h.persistence.restore("user-1").await.unwrap();

    assert!(restored.is_none());
}
