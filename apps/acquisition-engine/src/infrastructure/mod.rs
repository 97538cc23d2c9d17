//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application ports plus the ambient
//! runtime pieces (configuration, telemetry, metrics, health endpoint).

/// Environment-driven configuration.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Local and remote session stores.
pub mod stores;

/// WebSocket push feed transport.
pub mod stream;

/// OpenTelemetry tracing integration.
pub mod telemetry;

/// HTTP upstream clients.
pub mod upstream;
