//! Health Check and Metrics Endpoint
//!
//! # Endpoints
//!
//! - `GET /health` - JSON status: mode, cache, limiters, push feed
//! - `GET /healthz` - liveness probe
//! - `GET /readyz` - readiness probe
//! - `GET /metrics` - Prometheus text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{AcquisitionService, CacheStats, RateLimiterStats};
use crate::domain::mode::AcquisitionMode;
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::stream::{StreamStatus, StreamStatusSnapshot};

// =============================================================================
// Health Response Types
// =============================================================================

/// `/health` body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Build version.
    pub version: String,
    /// Seconds since startup.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Acquisition mode.
    pub mode: AcquisitionMode,
    /// Cache counters.
    pub cache: CacheStats,
    /// Per-upstream limiter state.
    pub upstreams: Vec<RateLimiterStats>,
    /// Push feed status, when a feed is configured.
    pub stream: Option<StreamStatusSnapshot>,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Serving normally.
    Healthy,
    /// Serving, but streaming mode is active without a live feed.
    Degraded,
    /// Every upstream fetch so far has failed.
    Unhealthy,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    acquisition: AcquisitionService<Value>,
    stream: Option<Arc<StreamStatus>>,
}

impl HealthServerState {
    /// State reporting on `acquisition` and, if present, the push feed.
    #[must_use]
    pub fn new(
        version: String,
        acquisition: AcquisitionService<Value>,
        stream: Option<Arc<StreamStatus>>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            acquisition,
            stream,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the server stops with an error.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if build_health_response(&state).status == HealthStatus::Unhealthy {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    } else {
        (StatusCode::OK, "READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let mode = state.acquisition.current_mode();
    let cache = state.acquisition.cache_stats();
    let stream = state.stream.as_ref().map(|s| s.snapshot());

    HealthResponse {
        status: determine_health_status(&mode, &cache, stream.as_ref()),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        mode,
        cache,
        upstreams: state.acquisition.limiter_stats(),
        stream,
    }
}

fn determine_health_status(
    mode: &AcquisitionMode,
    cache: &CacheStats,
    stream: Option<&StreamStatusSnapshot>,
) -> HealthStatus {
    if cache.fetches > 0 && cache.failures >= cache.fetches {
        return HealthStatus::Unhealthy;
    }
    if mode.is_streaming() && !stream.is_some_and(|s| s.connected) {
        return HealthStatus::Degraded;
    }
    HealthStatus::Healthy
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
