//! Error taxonomy for the acquisition layer.
//!
//! | Error | Severity | Recovery |
//! |-------|----------|----------|
//! | [`ConfigurationError`] | Fatal | Fails at construction |
//! | [`UpstreamError`] | Recoverable | Stale cache fallback when a prior entry exists |
//! | [`TransportError`] | Surfaced | Mode stays `Polling`, next evaluation may retry |
//! | [`PersistenceError`] | Degraded | Alternate backend, or a fresh session |
//!
//! Failures with a safe fallback are absorbed by the owning component and
//! reported as a degraded result. Failures without one propagate as
//! [`AcquisitionError`].

use std::time::Duration;

use thiserror::Error;

/// Invalid component parameters. Raised at construction, never at runtime.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    /// A rate limiter was configured with zero capacity.
    #[error("rate limiter '{name}' requires max_requests > 0")]
    ZeroCapacity {
        /// Limiter name.
        name: String,
    },

    /// A rate limiter was configured with an empty window.
    #[error("rate limiter '{name}' requires a non-zero window (got {window:?})")]
    ZeroWindow {
        /// Limiter name.
        name: String,
        /// Configured window.
        window: Duration,
    },

    /// A duration setting must be positive.
    #[error("{setting} must be greater than zero")]
    NonPositiveDuration {
        /// Setting name.
        setting: &'static str,
    },

    /// A threshold setting is not a finite number.
    #[error("{setting} must be a finite number (got {value})")]
    InvalidThreshold {
        /// Setting name.
        setting: &'static str,
        /// Configured value.
        value: f64,
    },
}

/// A fetch function failed to produce a value.
///
/// `Clone` so that a single in-flight fetch can hand the same outcome to
/// every caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    /// The request never produced a response.
    #[error("upstream request failed: {0}")]
    Request(String),

    /// The upstream answered with a non-success status.
    #[error("upstream returned HTTP {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// The response body could not be decoded.
    #[error("malformed upstream payload: {0}")]
    Decode(String),

    /// The upstream told us to slow down.
    #[error("upstream rate limited the request")]
    RateLimited,

    /// The caller cancelled while waiting for admission.
    #[error("request cancelled before admission")]
    Cancelled,
}

/// The streaming transport could not be started.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection to the push feed failed.
    #[error("push feed connection failed: {0}")]
    ConnectionFailed(String),

    /// No push feed endpoint is configured.
    #[error("push feed endpoint not configured")]
    NotConfigured,
}

/// A session store could not be read or written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    /// The local store failed.
    #[error("local store unavailable: {0}")]
    Local(String),

    /// The remote store failed.
    #[error("remote store unavailable: {0}")]
    Remote(String),

    /// A stored record could not be encoded or decoded.
    #[error("session record serialization failed: {0}")]
    Serialization(String),

    /// The state being saved belongs to a different user.
    #[error("session state for '{found}' cannot be saved as '{expected}'")]
    OwnerMismatch {
        /// User the save was requested for.
        expected: String,
        /// Owner recorded in the state.
        found: String,
    },

    /// Neither backend could be reached during restore.
    #[error("all persistence backends unavailable (local: {local}; remote: {remote})")]
    AllBackendsUnavailable {
        /// Local failure.
        local: String,
        /// Remote failure.
        remote: String,
    },
}

impl From<serde_json::Error> for PersistenceError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Umbrella error for the acquisition facade.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AcquisitionError {
    /// Invalid configuration.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// First-ever fetch for a key failed and no fallback exists.
    #[error("no cached value for '{key}': {source}")]
    Upstream {
        /// Cache key.
        key: String,
        /// Underlying fetch failure.
        #[source]
        source: UpstreamError,
    },

    /// Streaming could not be activated.
    #[error("transport activation failed: {0}")]
    TransportActivation(#[from] TransportError),

    /// Session persistence failed on every backend.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// The requested upstream has no registered rate limiter.
    #[error("unknown upstream: {0}")]
    UnknownUpstream(String),
}
