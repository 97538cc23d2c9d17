//! WebSocket Push Transport
//!
//! [`StreamingTransport`] adapter over a JSON WebSocket feed. `activate()`
//! performs the first connection inline so the mode controller sees a
//! failure immediately; after that a background task keeps the connection
//! alive (heartbeat, reconnect with backoff) and forwards every update to a
//! [`StreamSink`] until `deactivate()` cancels it.
//!
//! # Protocol
//!
//! Text frames carry one update or an array of updates:
//!
//! ```json
//! {"key": "ticker:btc", "value": {"price": 64000.5}, "class": "ticker"}
//! ```
//!
//! `class` is optional and defaults to `ticker`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::heartbeat::{Heartbeat, HeartbeatAction, HeartbeatConfig};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::StreamingTransport;
use crate::application::services::AcquisitionService;
use crate::domain::cache::TtlClass;
use crate::error::TransportError;
use crate::infrastructure::config::StreamSettings;
use crate::infrastructure::metrics;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Updates
// =============================================================================

/// One update pushed by the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamUpdate {
    /// Cache key.
    pub key: String,
    /// New value.
    pub value: serde_json::Value,
    /// TTL class name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
}

impl StreamUpdate {
    /// TTL class for the update.
    #[must_use]
    pub fn ttl_class(&self) -> TtlClass {
        self.class
            .as_deref()
            .map_or(TtlClass::TICKER, |name| TtlClass::new(name))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Frame {
    Batch(Vec<StreamUpdate>),
    Single(StreamUpdate),
}

/// Decode a text frame into updates.
///
/// # Errors
///
/// Returns the JSON error for frames that are neither an update nor an array of updates.
pub fn decode_frame(text: &str) -> Result<Vec<StreamUpdate>, serde_json::Error> {
    Ok(match serde_json::from_str::<Frame>(text)? {
        Frame::Batch(updates) => updates,
        Frame::Single(update) => vec![update],
    })
}

/// Destination for pushed updates.
pub trait StreamSink: Send + Sync {
    /// Deliver one update.
    fn publish(&self, update: StreamUpdate);
}

impl<S: StreamSink + ?Sized> StreamSink for Arc<S> {
    fn publish(&self, update: StreamUpdate) {
        (**self).publish(update);
    }
}

impl StreamSink for AcquisitionService<serde_json::Value> {
    fn publish(&self, update: StreamUpdate) {
        let class = update.ttl_class();
        self.publish_streamed(&update.key, update.value, class);
    }
}

/// Hands updates to a consumer task. Updates are dropped while the channel is full.
impl StreamSink for mpsc::Sender<StreamUpdate> {
    fn publish(&self, update: StreamUpdate) {
        match self.try_send(update) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(update)) => {
                tracing::warn!(key = %update.key, "Push update channel full, dropping update");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Push update consumer gone");
            }
        }
    }
}

/// Drain `updates` into `sink` until every sender is dropped.
pub async fn forward_updates(mut updates: mpsc::Receiver<StreamUpdate>, sink: impl StreamSink) {
    while let Some(update) = updates.recv().await {
        sink.publish(update);
    }
}

// =============================================================================
// Status
// =============================================================================

/// Live connection status, shared with the health endpoint.
#[derive(Debug, Default)]
pub struct StreamStatus {
    active: AtomicBool,
    connected: AtomicBool,
    updates_received: AtomicU64,
    reconnect_attempts: AtomicU32,
}

/// Serializable copy of [`StreamStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StreamStatusSnapshot {
    /// Transport activated by the mode controller.
    pub active: bool,
    /// Socket currently open.
    pub connected: bool,
    /// Updates received since startup.
    pub updates_received: u64,
    /// Reconnect attempts since the last successful connection.
    pub reconnect_attempts: u32,
}

impl StreamStatus {
    /// Current values.
    #[must_use]
    pub fn snapshot(&self) -> StreamStatusSnapshot {
        StreamStatusSnapshot {
            active: self.active.load(Ordering::Relaxed),
            connected: self.connected.load(Ordering::Relaxed),
            updates_received: self.updates_received.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
        }
    }

    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }
}

// =============================================================================
// Transport
// =============================================================================

/// Connection parameters.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Feed URL; activation fails with `NotConfigured` when unset.
    pub url: Option<String>,
    /// Reconnection backoff.
    pub reconnect: ReconnectConfig,
    /// Heartbeat timing.
    pub heartbeat: HeartbeatConfig,
}

impl WebSocketConfig {
    /// Connection parameters from the stream settings.
    #[must_use]
    pub fn from_stream_settings(settings: &StreamSettings) -> Self {
        Self {
            url: settings.url.clone(),
            reconnect: ReconnectConfig::from_stream_settings(settings),
            heartbeat: HeartbeatConfig::from_stream_settings(settings),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum SessionError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("heartbeat timeout")]
    HeartbeatTimeout,
    #[error("connection closed")]
    Closed,
}

/// WebSocket implementation of the push transport.
pub struct WebSocketTransport {
    config: WebSocketConfig,
    sink: Arc<dyn StreamSink>,
    status: Arc<StreamStatus>,
    session: parking_lot::Mutex<Option<CancellationToken>>,
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("config", &self.config)
            .field("status", &self.status.snapshot())
            .finish_non_exhaustive()
    }
}

impl WebSocketTransport {
    /// Create an inactive transport delivering into `sink`.
    #[must_use]
    pub fn new(config: WebSocketConfig, sink: Arc<dyn StreamSink>) -> Self {
        Self {
            config,
            sink,
            status: Arc::new(StreamStatus::default()),
            session: parking_lot::Mutex::new(None),
        }
    }

    /// Shared status handle.
    #[must_use]
    pub fn status(&self) -> Arc<StreamStatus> {
        Arc::clone(&self.status)
    }

    async fn connect(url: &str) -> Result<WsStream, TransportError> {
        tracing::info!(url, "Connecting to push feed");
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        Ok(stream)
    }
}

#[async_trait]
impl StreamingTransport for WebSocketTransport {
    async fn activate(&self) -> Result<(), TransportError> {
        let url = self.config.url.clone().ok_or(TransportError::NotConfigured)?;

        if self.session.lock().is_some() {
            tracing::debug!("Push feed already active");
            return Ok(());
        }

        let stream = Self::connect(&url).await?;

        let cancel = CancellationToken::new();
        {
            let mut session = self.session.lock();
            if session.is_some() {
                return Ok(());
            }
            *session = Some(cancel.clone());
        }
        self.status.active.store(true, Ordering::Relaxed);

        let connection = Connection {
            url,
            reconnect: self.config.reconnect.clone(),
            heartbeat: self.config.heartbeat,
            sink: Arc::clone(&self.sink),
            status: Arc::clone(&self.status),
            cancel,
        };
        tokio::spawn(connection.run(stream));
        Ok(())
    }

    fn deactivate(&self) {
        if let Some(cancel) = self.session.lock().take() {
            cancel.cancel();
            tracing::info!("Push feed deactivated");
        }
        self.status.active.store(false, Ordering::Relaxed);
        self.status.set_connected(false);
    }
}

// =============================================================================
// Connection Loop
// =============================================================================

struct Connection {
    url: String,
    reconnect: ReconnectConfig,
    heartbeat: HeartbeatConfig,
    sink: Arc<dyn StreamSink>,
    status: Arc<StreamStatus>,
    cancel: CancellationToken,
}

impl Connection {
    async fn run(self, first: WsStream) {
        let mut policy = ReconnectPolicy::new(self.reconnect.clone());
        let mut pending = Some(first);

        loop {
            let stream = match pending.take() {
                Some(stream) => Ok(stream),
                None => WebSocketTransport::connect(&self.url).await,
            };

            match stream {
                Ok(stream) => {
                    policy.reset();
                    self.status.reconnect_attempts.store(0, Ordering::Relaxed);
                    self.status.set_connected(true);
                    tracing::info!("Push feed connected");

                    let outcome = self.pump(stream).await;
                    self.status.set_connected(false);

                    match outcome {
                        Ok(()) => {
                            tracing::info!("Push feed connection closed");
                            return;
                        }
                        Err(e) => tracing::warn!(error = %e, "Push feed connection lost"),
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Push feed reconnect failed"),
            }

            let Some(delay) = policy.next_delay() else {
                tracing::error!(
                    attempts = policy.attempt_count(),
                    "Push feed reconnect attempts exhausted"
                );
                return;
            };
            self.status
                .reconnect_attempts
                .store(policy.attempt_count(), Ordering::Relaxed);
            metrics::record_stream_reconnect();
            tracing::info!(
                attempt = policy.attempt_count(),
                delay_ms = delay.as_millis(),
                "Reconnecting to push feed"
            );

            tokio::select! {
                () = self.cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Forward frames until cancelled (`Ok`) or the connection fails (`Err`).
    async fn pump(&self, stream: WsStream) -> Result<(), SessionError> {
        let (mut write, mut read) = stream.split();
        let mut heartbeat = Heartbeat::new(self.heartbeat, Instant::now());
        let period = heartbeat.ping_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                _ = ticker.tick() => {
                    match heartbeat.on_tick(Instant::now()) {
                        HeartbeatAction::SendPing => {
                            write.send(Message::Ping(Vec::new().into())).await?;
                        }
                        HeartbeatAction::TimedOut => return Err(SessionError::HeartbeatTimeout),
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            heartbeat.record_activity(Instant::now());
                            self.handle_text(text.as_str());
                        }
                        Some(Ok(Message::Pong(_))) => heartbeat.record_activity(Instant::now()),
                        Some(Ok(Message::Ping(data))) => {
                            heartbeat.record_activity(Instant::now());
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => return Err(SessionError::Closed),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                    }
                }
            }
        }
    }

    fn handle_text(&self, text: &str) {
        match decode_frame(text) {
            Ok(updates) => {
                for update in updates {
                    self.status.updates_received.fetch_add(1, Ordering::Relaxed);
                    self.sink.publish(update);
                }
            }
            Err(e) => tracing::warn!(error = %e, "Ignoring malformed push frame"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::net::TcpListener;

    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        updates: parking_lot::Mutex<Vec<StreamUpdate>>,
    }

    impl StreamSink for RecordingSink {
        fn publish(&self, update: StreamUpdate) {
            self.updates.lock().push(update);
        }
    }

    fn config(url: Option<String>) -> WebSocketConfig {
        WebSocketConfig {
            url,
            reconnect: ReconnectConfig {
                max_attempts: 1,
                ..ReconnectConfig::default()
            },
            heartbeat: HeartbeatConfig::default(),
        }
    }

    #[test]
    fn decodes_single_and_batched_frames() {
        let single = decode_frame(r#"{"key":"ticker:btc","value":1}"#).unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].ttl_class(), TtlClass::TICKER);

        let batch = decode_frame(
            r#"[{"key":"ticker:btc","value":1},{"key":"news:top","value":[],"class":"news"}]"#,
        )
        .unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1].ttl_class(), TtlClass::NEWS);
    }

    #[tokio::test]
    async fn channel_sink_forwards_to_consumer() {
        let (tx, rx) = mpsc::channel(4);
        let sink = Arc::new(RecordingSink::default());
        let consumer = tokio::spawn(forward_updates(rx, Arc::clone(&sink)));

        tx.publish(StreamUpdate {
            key: "ticker:sol".to_string(),
            value: serde_json::json!(150),
            class: None,
        });
        drop(tx);
        consumer.await.unwrap();

        assert_eq!(sink.updates.lock()[0].key, "ticker:sol");
    }

    #[test]
    fn full_channel_drops_updates() {
        let (tx, mut rx) = mpsc::channel(1);
        let update = |key: &str| StreamUpdate {
            key: key.to_string(),
            value: serde_json::Value::Null,
            class: None,
        };

        tx.publish(update("ticker:a"));
        tx.publish(update("ticker:b"));

        assert_eq!(rx.try_recv().unwrap().key, "ticker:a");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn rejects_frames_without_key() {
        assert!(decode_frame(r#"{"value":1}"#).is_err());
        assert!(decode_frame("not json").is_err());
    }

    #[tokio::test]
    async fn activation_without_url_is_not_configured() {
        let transport = WebSocketTransport::new(config(None), Arc::new(RecordingSink::default()));
        assert_eq!(transport.activate().await, Err(TransportError::NotConfigured));
    }

    #[tokio::test]
    async fn activation_against_closed_port_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = WebSocketTransport::new(
            config(Some(format!("ws://{addr}"))),
            Arc::new(RecordingSink::default()),
        );
        let result = transport.activate().await;

        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
        assert!(!transport.status().snapshot().active);
    }

    #[tokio::test]
    async fn forwards_pushed_updates_until_deactivated() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            ws.send(Message::Text(
                r#"[{"key":"ticker:btc","value":64000},{"key":"ticker:eth","value":3100}]"#.into(),
            ))
            .await
            .unwrap();
            ws.send(Message::Text("garbage".into())).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_close() {
                    break;
                }
            }
        });

        let sink = Arc::new(RecordingSink::default());
        let transport =
            WebSocketTransport::new(config(Some(format!("ws://{addr}"))), sink.clone());
        transport.activate().await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while sink.updates.lock().len() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let keys: Vec<_> = sink.updates.lock().iter().map(|u| u.key.clone()).collect();
        assert_eq!(keys, vec!["ticker:btc", "ticker:eth"]);
        assert_eq!(transport.status().snapshot().updates_received, 2);

        transport.deactivate();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert!(!transport.status().snapshot().active);
    }
}
