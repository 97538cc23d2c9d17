//! Port Interfaces
//!
//! Contracts for the collaborators the acquisition layer calls out to,
//! following the Hexagonal Architecture pattern. Infrastructure adapters
//! implement these; tests substitute mocks.
//!
//! ## Driven Ports (Outbound)
//!
//! - `MarketSnapshotProvider`: market conditions for mode evaluation
//! - `StreamingTransport`: push feed activation hooks
//! - `LocalStore`: fast key/value session store
//! - `RemoteStore`: durable session store

use async_trait::async_trait;

use crate::domain::mode::MarketSnapshot;
use crate::domain::session::SessionRecord;
use crate::error::{PersistenceError, TransportError};

/// Snapshot provider failure. Treated as "no trigger this cycle".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotError {
    /// The provider could not produce a snapshot.
    #[error("market snapshot unavailable: {0}")]
    Unavailable(String),
}

/// Source of market conditions for mode evaluation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketSnapshotProvider: Send + Sync {
    /// Sample current market conditions.
    async fn snapshot(&self) -> Result<MarketSnapshot, SnapshotError>;
}

/// Activation hooks of the push transport.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StreamingTransport: Send + Sync {
    /// Open the push connection.
    async fn activate(&self) -> Result<(), TransportError>;

    /// Tear the push connection down. Must not fail.
    fn deactivate(&self);
}

/// Fast local key/value store.
///
/// Synchronous: saves hit it before the remote write is attempted.
#[cfg_attr(test, mockall::automock)]
pub trait LocalStore: Send + Sync {
    /// Read the value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError>;
}

/// Durable remote store keyed by user.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Insert or replace the record for `record.user_id`.
    async fn upsert(&self, record: &SessionRecord) -> Result<(), PersistenceError>;

    /// Fetch the record for `user_id`.
    async fn select(&self, user_id: &str) -> Result<Option<SessionRecord>, PersistenceError>;
}
