#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Acquisition Engine - Adaptive Market Data Acquisition
//!
//! Keeps a market dashboard supplied with data from rate-limited third-party
//! APIs. Requests are admitted through per-upstream sliding windows, results
//! are cached with per-class TTLs and stale fallback, acquisition switches
//! between polling and a push feed during volatile markets, and session state
//! survives restarts through a local and a remote store.
//!
//! # Layers (inside to outside)
//!
//! - **Domain**: Pure types and rules
//!   - `rate_window`: sliding-window admission bookkeeping
//!   - `cache`: TTL classes, cache entries, freshness
//!   - `mode`: acquisition modes, triggers, market snapshots
//!   - `session`: persisted session state and its envelope
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: snapshot provider, push transport, session stores
//!   - `services`: rate limiter, tiered cache, mode controller,
//!     state persistence, acquisition facade
//!
//! - **Infrastructure**: Adapters and runtime plumbing
//!   - `upstream`: HTTP clients for market data APIs
//!   - `stream`: WebSocket push feed
//!   - `stores`: file, in-memory and REST session stores
//!   - `config`, `telemetry`, `metrics`, `health`
//!
//! # Data Flow
//!
//! ```text
//!                  miss          admit
//! caller ──► TieredCache ──► RateLimiter ──► HTTP upstream
//!                ▲
//!                │ push updates (streaming mode only)
//!            WebSocket feed ◄── activate/deactivate ── ModeController
//! ```
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use acquisition_engine::RateLimiter;
//!
//! # tokio_test::block_on(async {
//! let limiter = RateLimiter::new("coingecko", 30, Duration::from_secs(60)).unwrap();
//! let value = limiter.execute(|| async { 42 }).await;
//! assert_eq!(value, 42);
//! # });
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core acquisition types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

/// Error types shared across layers.
pub mod error;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::cache::{CacheOutcome, Freshness, TtlClass, TtlPolicy};
pub use domain::mode::{AcquisitionMode, MarketSnapshot, Mode, Trigger, TriggerThresholds};
pub use domain::session::{PortfolioSnapshot, Position, SessionRecord, SessionState};

// Errors
pub use error::{
    AcquisitionError, ConfigurationError, PersistenceError, TransportError, UpstreamError,
};

// Ports
pub use application::ports::{
    LocalStore, MarketSnapshotProvider, RemoteStore, SnapshotError, StreamingTransport,
};

// Services
pub use application::services::{
    AcquisitionService, CacheStats, ModeController, ModeControllerConfig, RateLimiter,
    RateLimiterStats, RestoreSource, RestoredSession, SaveReport, StatePersistence, TieredCache,
};

// Infrastructure config
pub use infrastructure::config::{AcquisitionConfig, ConfigError};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
