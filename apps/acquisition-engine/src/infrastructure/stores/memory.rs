//! In-memory session stores.
//!
//! Used by integration tests and as the local store when no session
//! directory is writable. Both stores can be switched offline to simulate a
//! backend outage.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::application::ports::{LocalStore, RemoteStore};
use crate::domain::session::SessionRecord;
use crate::error::PersistenceError;

/// Map-backed [`LocalStore`].
#[derive(Debug)]
pub struct InMemoryLocalStore {
    values: RwLock<HashMap<String, String>>,
    available: AtomicBool,
}

impl Default for InMemoryLocalStore {
    fn default() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }
}

impl InMemoryLocalStore {
    /// Empty, available store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage (`false`) or recovery (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Raw stored value, bypassing availability.
    #[must_use]
    pub fn raw(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    fn check(&self) -> Result<(), PersistenceError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PersistenceError::Local("store offline".to_string()))
        }
    }
}

impl LocalStore for InMemoryLocalStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        self.check()?;
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        self.check()?;
        self.values.write().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Map-backed [`RemoteStore`] keyed by user.
#[derive(Debug)]
pub struct InMemoryRemoteStore {
    records: RwLock<HashMap<String, SessionRecord>>,
    available: AtomicBool,
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }
}

impl InMemoryRemoteStore {
    /// Empty, available store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage (`false`) or recovery (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Stored record, bypassing availability.
    #[must_use]
    pub fn raw(&self, user_id: &str) -> Option<SessionRecord> {
        self.records.read().get(user_id).cloned()
    }

    fn check(&self) -> Result<(), PersistenceError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PersistenceError::Remote("store offline".to_string()))
        }
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn upsert(&self, record: &SessionRecord) -> Result<(), PersistenceError> {
        self.check()?;
        self.records
            .write()
            .insert(record.user_id.clone(), record.clone());
        Ok(())
    }

    async fn select(&self, user_id: &str) -> Result<Option<SessionRecord>, PersistenceError> {
        self.check()?;
        Ok(self.records.read().get(user_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_store_round_trips_until_offline() {
        let store = InMemoryLocalStore::new();
        store.set("session:u1", "{}").unwrap();
        assert_eq!(store.get("session:u1").unwrap().as_deref(), Some("{}"));

        store.set_available(false);
        assert!(matches!(store.get("session:u1"), Err(PersistenceError::Local(_))));
        assert!(store.set("session:u1", "[]").is_err());
        assert_eq!(store.raw("session:u1").as_deref(), Some("{}"));
    }

    #[tokio::test]
    async fn remote_store_upsert_replaces_by_user() {
        let store = InMemoryRemoteStore::new();
        let record = |v: u32| SessionRecord {
            user_id: "u1".to_string(),
            schema_version: v,
            updated_at: chrono::Utc::now(),
            state: serde_json::Value::Null,
        };

        store.upsert(&record(1)).await.unwrap();
        store.upsert(&record(2)).await.unwrap();

        assert_eq!(store.select("u1").await.unwrap().unwrap().schema_version, 2);
        assert!(store.select("u2").await.unwrap().is_none());

        store.set_available(false);
        assert!(matches!(store.select("u1").await, Err(PersistenceError::Remote(_))));
    }
}
