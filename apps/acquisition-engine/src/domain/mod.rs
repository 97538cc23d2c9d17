//! Domain Layer - Core acquisition types and rules.
//!
//! Pure types with no I/O: rate window bookkeeping, cache entries and TTL
//! classes, acquisition modes and triggers, and persisted session state.

/// Sliding-window admission bookkeeping.
pub mod rate_window;

/// Cache entries, TTL classes and freshness.
pub mod cache;

/// Acquisition modes, triggers and market snapshots.
pub mod mode;

/// Persisted session state.
pub mod session;
