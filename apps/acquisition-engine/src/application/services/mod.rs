//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `RateLimiter`: FIFO sliding-window admission per upstream
//! - `TieredCache`: TTL cache with stale fallback and single-flight fetches
//! - `ModeController`: polling/streaming state machine with timed reversion
//! - `StatePersistence`: local-first, remote-durable session save/restore
//! - `AcquisitionService`: limiter + cache facade used by consumers

mod acquisition;
mod mode_controller;
mod rate_limiter;
mod state_persistence;
mod tiered_cache;

pub use acquisition::AcquisitionService;
pub use mode_controller::{ModeController, ModeControllerConfig};
pub use rate_limiter::{RateLimiter, RateLimiterStats};
pub use state_persistence::{
    DEFAULT_STALE_AFTER, RestoreSource, RestoredSession, SaveReport, StatePersistence,
};
pub use tiered_cache::{CacheStats, TieredCache};
