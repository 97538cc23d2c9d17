//! Mode Switching Integration Tests
//!
//! The mode controller driving a transport: trigger evaluation, automatic
//! reversion, and the WebSocket feed writing into the cache while streaming.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use acquisition_engine::infrastructure::stream::{
    HeartbeatConfig, ReconnectConfig, WebSocketConfig, WebSocketTransport, forward_updates,
};
use acquisition_engine::{
    AcquisitionError, AcquisitionService, MarketSnapshot, MarketSnapshotProvider, Mode,
    ModeController, ModeControllerConfig, SnapshotError, StreamingTransport, TieredCache,
    TransportError, Trigger, TtlPolicy,
};

#[derive(Default)]
struct ScriptedMarket {
    snapshot: Mutex<MarketSnapshot>,
}

impl ScriptedMarket {
    fn set(&self, snapshot: MarketSnapshot) {
        *self.snapshot.lock() = snapshot;
    }
}

#[async_trait]
impl MarketSnapshotProvider for ScriptedMarket {
    async fn snapshot(&self) -> Result<MarketSnapshot, SnapshotError> {
        Ok(*self.snapshot.lock())
    }
}

#[derive(Default)]
struct CountingTransport {
    activations: AtomicUsize,
    deactivations: AtomicUsize,
    fail: AtomicBool,
}

#[async_trait]
impl StreamingTransport for CountingTransport {
    async fn activate(&self) -> Result<(), TransportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed("refused".to_string()));
        }
        self.activations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn deactivate(&self) {
        self.deactivations.fetch_add(1, Ordering::SeqCst);
    }
}

fn config() -> ModeControllerConfig {
    ModeControllerConfig {
        revert_after: Duration::from_secs(30 * 60),
        evaluation_interval: Duration::from_secs(60),
        ..ModeControllerConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn volatility_spike_streams_for_one_period() {
    let market = Arc::new(ScriptedMarket::default());
    let transport = Arc::new(CountingTransport::default());
    let controller = ModeController::new(market.clone(), transport.clone(), config()).unwrap();
    let mut modes = controller.subscribe();

    let cancel = CancellationToken::new();
    let runner = {
        let controller = controller.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { controller.run(cancel).await })
    };

    tokio::time::sleep(Duration::from_secs(90)).await;
    assert_eq!(controller.current().mode, Mode::Polling);

    market.set(MarketSnapshot::with_volatility(4.5));
    modes.changed().await.unwrap();
    let streaming = modes.borrow_and_update().clone();
    assert_eq!(streaming.mode, Mode::Streaming);
    assert_eq!(streaming.active_trigger, Some(Trigger::HighVolatility));

    // Calm markets do not end the period early.
    market.set(MarketSnapshot::default());
    tokio::time::sleep(Duration::from_secs(29 * 60)).await;
    assert!(controller.current().is_streaming());

    modes.changed().await.unwrap();
    assert_eq!(modes.borrow().mode, Mode::Polling);
    assert_eq!(transport.activations.load(Ordering::SeqCst), 1);
    assert_eq!(transport.deactivations.load(Ordering::SeqCst), 1);

    cancel.cancel();
    runner.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn failed_activation_keeps_polling_and_retries_next_cycle() {
    let market = Arc::new(ScriptedMarket::default());
    market.set(MarketSnapshot {
        major_event: true,
        ..MarketSnapshot::default()
    });
    let transport = Arc::new(CountingTransport::default());
    transport.fail.store(true, Ordering::SeqCst);
    let controller = ModeController::new(market.clone(), transport.clone(), config()).unwrap();

    let err = controller.evaluate().await.unwrap_err();
    assert!(matches!(err, AcquisitionError::TransportActivation(_)));
    assert_eq!(controller.current().mode, Mode::Polling);

    transport.fail.store(false, Ordering::SeqCst);
    assert_eq!(controller.evaluate().await.unwrap(), Mode::Streaming);
    assert_eq!(controller.current().active_trigger, Some(Trigger::MajorEvent));
}

#[tokio::test(start_paused = true)]
async fn shutdown_returns_to_polling() {
    let market = Arc::new(ScriptedMarket::default());
    let transport = Arc::new(CountingTransport::default());
    let controller = ModeController::new(market, transport.clone(), config()).unwrap();

    controller.activate_manual().await.unwrap();
    controller.shutdown().await;

    assert_eq!(controller.current().mode, Mode::Polling);
    assert_eq!(transport.deactivations.load(Ordering::SeqCst), 1);

    // The disarmed timer never fires a second deactivation.
    tokio::time::sleep(Duration::from_secs(60 * 60)).await;
    assert_eq!(transport.deactivations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn manual_streaming_fills_the_cache_from_the_feed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let feed = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
        ws.send(Message::Text(
            r#"{"key":"ticker:btc","value":{"price":64000}}"#.into(),
        ))
        .await
        .unwrap();
        ws.send(Message::Text(r#"{"key":"news:top","value":[]}"#.into()))
            .await
            .unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            if msg.is_close() {
                break;
            }
        }
    });

    let (tx, rx) = mpsc::channel(16);
    let transport = Arc::new(WebSocketTransport::new(
        WebSocketConfig {
            url: Some(format!("ws://{addr}")),
            reconnect: ReconnectConfig {
                max_attempts: 1,
                ..ReconnectConfig::default()
            },
            heartbeat: HeartbeatConfig::default(),
        },
        Arc::new(tx),
    ));
    let controller = ModeController::new(
        Arc::new(ScriptedMarket::default()),
        transport.clone(),
        config(),
    )
    .unwrap();
    let service: AcquisitionService<Value> =
        AcquisitionService::new(TieredCache::new(TtlPolicy::default()), controller.subscribe())
            .with_streaming_prefix("ticker:");
    tokio::spawn(forward_updates(rx, service.clone()));

    controller.activate_manual().await.unwrap();
    assert!(service.is_served_by_stream("ticker:btc"));

    tokio::time::timeout(Duration::from_secs(5), async {
        while service.cache().peek("ticker:btc").is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(
        service.cache().peek("ticker:btc").unwrap().value,
        json!({"price": 64000})
    );
    assert!(service.cache().peek("news:top").is_none());

    assert!(controller.deactivate().await);
    assert!(!transport.status().snapshot().active);
    tokio::time::timeout(Duration::from_secs(5), feed)
        .await
        .unwrap()
        .unwrap();
}
