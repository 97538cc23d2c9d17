//! Prometheus Metrics Module
//!
//! Exposes acquisition metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Cache**: Lookups by outcome, fetch failures, background refreshes
//! - **Rate limiting**: Admissions and time spent throttled per upstream
//! - **Mode**: Transitions between polling and streaming
//! - **Persistence**: Backend failures on save and restore
//! - **Push feed**: Streamed updates and reconnects
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! functions are no-ops until [`init_metrics`] installs the recorder, so
//! library code and tests can call them unconditionally.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::cache::Freshness;
use crate::domain::mode::{Mode, Trigger};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "acquisition_cache_lookups_total",
        "Cache lookups by outcome (cached, fetched, stale)"
    );
    describe_counter!(
        "acquisition_cache_fetch_failures_total",
        "Fetch function failures by whether a stale fallback was available"
    );
    describe_counter!(
        "acquisition_cache_background_refreshes_total",
        "Background refreshes by result"
    );

    describe_counter!(
        "acquisition_rate_limit_admissions_total",
        "Calls admitted by each upstream rate limiter"
    );
    describe_histogram!(
        "acquisition_rate_limit_wait_seconds",
        "Time callers spent waiting for rate limiter admission"
    );

    describe_counter!(
        "acquisition_mode_transitions_total",
        "Transitions between polling and streaming"
    );
    describe_gauge!(
        "acquisition_mode_streaming",
        "1 while the push feed is active, 0 while polling"
    );
    describe_counter!(
        "acquisition_transport_activation_failures_total",
        "Failed attempts to start the push feed"
    );

    describe_counter!(
        "acquisition_persistence_failures_total",
        "Session store failures by backend and operation"
    );

    describe_counter!(
        "acquisition_stream_updates_total",
        "Updates received from the push feed"
    );
    describe_counter!(
        "acquisition_stream_reconnects_total",
        "Push feed reconnection attempts"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Session store backend label.
#[derive(Debug, Clone, Copy)]
pub enum Backend {
    /// Local store.
    Local,
    /// Remote store.
    Remote,
}

impl Backend {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

/// Session store operation label.
#[derive(Debug, Clone, Copy)]
pub enum StoreOperation {
    /// Save path.
    Save,
    /// Restore path.
    Restore,
}

impl StoreOperation {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Save => "save",
            Self::Restore => "restore",
        }
    }
}

/// Record a cache lookup outcome.
pub fn record_cache_lookup(freshness: Freshness) {
    counter!(
        "acquisition_cache_lookups_total",
        "outcome" => freshness.as_str()
    )
    .increment(1);
}

/// Record a fetch failure.
pub fn record_fetch_failure(had_fallback: bool) {
    counter!(
        "acquisition_cache_fetch_failures_total",
        "fallback" => if had_fallback { "stale" } else { "none" }
    )
    .increment(1);
}

/// Record the result of a background refresh.
pub fn record_background_refresh(success: bool) {
    counter!(
        "acquisition_cache_background_refreshes_total",
        "result" => if success { "ok" } else { "error" }
    )
    .increment(1);
}

/// Record a rate limiter admission and how long it waited.
pub fn record_admission(upstream: &str, waited: Duration) {
    counter!(
        "acquisition_rate_limit_admissions_total",
        "upstream" => upstream.to_string()
    )
    .increment(1);
    if !waited.is_zero() {
        histogram!(
            "acquisition_rate_limit_wait_seconds",
            "upstream" => upstream.to_string()
        )
        .record(waited.as_secs_f64());
    }
}

/// Record a mode transition.
pub fn record_mode_transition(to: Mode, trigger: Option<Trigger>) {
    counter!(
        "acquisition_mode_transitions_total",
        "to" => to.as_str(),
        "trigger" => trigger.map_or("none", Trigger::as_str)
    )
    .increment(1);
    gauge!("acquisition_mode_streaming").set(match to {
        Mode::Streaming => 1.0,
        Mode::Polling => 0.0,
    });
}

/// Record a failed push feed activation.
pub fn record_activation_failure() {
    counter!("acquisition_transport_activation_failures_total").increment(1);
}

/// Record a session store failure.
pub fn record_persistence_failure(backend: Backend, operation: StoreOperation) {
    counter!(
        "acquisition_persistence_failures_total",
        "backend" => backend.as_str(),
        "operation" => operation.as_str()
    )
    .increment(1);
}

/// Record an update received from the push feed.
pub fn record_stream_update() {
    counter!("acquisition_stream_updates_total").increment(1);
}

/// Record a push feed reconnection attempt.
pub fn record_stream_reconnect() {
    counter!("acquisition_stream_reconnects_total").increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_as_str() {
        assert_eq!(Backend::Local.as_str(), "local");
        assert_eq!(Backend::Remote.as_str(), "remote");
    }

    #[test]
    fn operation_as_str() {
        assert_eq!(StoreOperation::Save.as_str(), "save");
        assert_eq!(StoreOperation::Restore.as_str(), "restore");
    }

    #[test]
    fn recording_without_recorder_is_a_no_op() {
        record_cache_lookup(Freshness::Stale);
        record_admission("coingecko", Duration::from_millis(5));
        record_mode_transition(Mode::Streaming, Some(Trigger::Manual));
    }
}
