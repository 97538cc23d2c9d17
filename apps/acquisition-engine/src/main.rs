//! Acquisition Engine Binary
//!
//! Wires the acquisition layer to its adapters and serves health and metrics
//! until shutdown.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin acquisition-engine
//! ```
//!
//! # Environment Variables
//!
//! All optional. See `AcquisitionConfig::from_env` for the full list.
//!
//! - `ACQ_UPSTREAMS`: comma-separated upstream names (default: coingecko,binance,feargreed)
//! - `ACQ_MODE_SNAPSHOT_URL`: market conditions endpoint (manual-only streaming when unset)
//! - `ACQ_STREAM_URL`: WebSocket push feed (streaming disabled when unset)
//! - `ACQ_SESSION_DIR`: local session directory (default: .acquisition/sessions)
//! - `ACQ_SESSION_REMOTE_URL`: remote session store (in-memory when unset)
//! - `ACQ_SESSION_USER_ID`: user whose session is restored at startup
//! - `ACQ_HEALTH_PORT`: health and metrics HTTP port (default: 8082)
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`
//! - `RUST_LOG`: log filter

use std::sync::Arc;
use std::time::Duration;

use acquisition_engine::application::ports::{
    LocalStore, MarketSnapshotProvider, RemoteStore, StreamingTransport,
};
use acquisition_engine::infrastructure::config::{AcquisitionConfig, PersistenceSettings};
use acquisition_engine::infrastructure::health::{HealthServer, HealthServerState};
use acquisition_engine::infrastructure::stores::{
    FileLocalStore, InMemoryLocalStore, InMemoryRemoteStore, RestRemoteStore,
};
use acquisition_engine::infrastructure::stream::{
    StreamUpdate, WebSocketConfig, WebSocketTransport, forward_updates,
};
use acquisition_engine::infrastructure::telemetry;
use acquisition_engine::infrastructure::upstream::{
    CalmMarketProvider, HttpSnapshotProvider, HttpUpstream,
};
use acquisition_engine::{
    AcquisitionService, ModeController, RateLimiter, StatePersistence, TieredCache, init_metrics,
};
use anyhow::Context;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Buffered push updates between the feed and the cache.
const STREAM_CHANNEL_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting acquisition engine");

    let _metrics_handle = init_metrics();

    let config = AcquisitionConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Push feed: transport writes into a channel, drained into the cache below
    let (update_tx, update_rx) = mpsc::channel::<StreamUpdate>(STREAM_CHANNEL_CAPACITY);
    let transport = Arc::new(WebSocketTransport::new(
        WebSocketConfig::from_stream_settings(&config.stream),
        Arc::new(update_tx),
    ));
    let stream_status = config.stream.url.as_ref().map(|_| transport.status());

    let provider = snapshot_provider(&config)?;
    let transport_port: Arc<dyn StreamingTransport> = transport;
    let controller =
        ModeController::new(provider, transport_port, config.mode.to_controller_config())?;

    let mut acquisition =
        AcquisitionService::new(TieredCache::new(config.cache.to_policy()), controller.subscribe());
    for upstream in &config.upstreams {
        let limiter = RateLimiter::new(upstream.name.clone(), upstream.max_requests, upstream.window)?;
        acquisition = acquisition.with_limiter(Arc::new(limiter));
    }
    for prefix in &config.stream.prefixes {
        acquisition = acquisition.with_streaming_prefix(prefix.clone());
    }

    tokio::spawn(forward_updates(update_rx, acquisition.clone()));

    let mode_controller = controller.clone();
    let mode_cancel = shutdown_token.child_token();
    let mode_task = tokio::spawn(async move { mode_controller.run(mode_cancel).await });

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        acquisition.clone(),
        stream_status,
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Session recovery
    let persistence = build_persistence(&config.persistence)?;
    if let Some(user_id) = &config.persistence.user_id {
        match persistence.restore(user_id).await {
            Ok(Some(restored)) => tracing::info!(
                user_id,
                source = ?restored.source,
                saved_at = %restored.state.timestamp,
                positions = restored.state.active_positions.len(),
                "Session restored"
            ),
            Ok(None) => tracing::info!(user_id, "No saved session, starting fresh"),
            Err(e) => tracing::warn!(user_id, error = %e, "Session restore failed, starting fresh"),
        }
    }

    tracing::info!("Acquisition engine ready");

    await_shutdown(shutdown_token).await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, mode_task).await.is_err() {
        tracing::warn!("Mode controller did not stop in time");
    }

    tracing::info!("Acquisition engine stopped");
    Ok(())
}

fn snapshot_provider(config: &AcquisitionConfig) -> anyhow::Result<Arc<dyn MarketSnapshotProvider>> {
    match &config.mode.snapshot_url {
        Some(url) => {
            let upstream = HttpUpstream::new(url.clone()).context("snapshot client")?;
            Ok(Arc::new(HttpSnapshotProvider::new(upstream, "")))
        }
        None => {
            tracing::warn!("No market snapshot endpoint configured, streaming only on manual activation");
            Ok(Arc::new(CalmMarketProvider))
        }
    }
}

fn build_persistence(settings: &PersistenceSettings) -> anyhow::Result<StatePersistence> {
    let local: Arc<dyn LocalStore> = match FileLocalStore::open(&settings.local_dir) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::warn!(error = %e, "Local session directory unusable, keeping sessions in memory");
            Arc::new(InMemoryLocalStore::new())
        }
    };

    let remote: Arc<dyn RemoteStore> = match &settings.remote_url {
        Some(url) => Arc::new(RestRemoteStore::new(
            url,
            &settings.remote_table,
            settings.remote_api_key.clone(),
        )?),
        None => {
            tracing::warn!("No remote session store configured, remote copy kept in memory");
            Arc::new(InMemoryRemoteStore::new())
        }
    };

    Ok(StatePersistence::new(local, remote, settings.stale_after)?)
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        for dir in cwd.ancestors().skip(1) {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &AcquisitionConfig) {
    for upstream in &config.upstreams {
        tracing::info!(
            upstream = %upstream.name,
            max_requests = upstream.max_requests,
            window_secs = upstream.window.as_secs(),
            "Upstream configured"
        );
    }
    tracing::info!(
        streaming = config.stream.url.is_some(),
        prefixes = ?config.stream.prefixes,
        revert_after_secs = config.mode.revert_after.as_secs(),
        health_port = config.server.health_port,
        "Configuration loaded"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
