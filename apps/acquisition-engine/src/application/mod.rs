//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (snapshot feed, push transport, stores).
pub mod ports;

/// Application services: rate limiting, caching, mode control and persistence.
pub mod services;
