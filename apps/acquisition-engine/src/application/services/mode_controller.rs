//! Mode Controller
//!
//! Switches acquisition between polling and streaming based on periodic
//! market snapshots, and reverts to polling after a fixed streaming period.
//!
//! Transitions are serialized on an async mutex so `activate()` on the
//! transport never races a concurrent reversion. The reversion timer is a
//! spawned task tagged with an arm generation; a timer whose generation no
//! longer matches (because the controller was deactivated or re-armed since)
//! does nothing when it fires.
//!
//! Observers call [`ModeController::subscribe`] and receive every state
//! change through a `watch` channel. Dropping the receiver unsubscribes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{MarketSnapshotProvider, StreamingTransport};
use crate::domain::mode::{
    AcquisitionMode, DEFAULT_REVERT_AFTER, MarketSnapshot, Mode, Trigger, TriggerThresholds,
};
use crate::error::{AcquisitionError, ConfigurationError};
use crate::infrastructure::metrics;

/// Controller parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModeControllerConfig {
    /// Trigger thresholds.
    pub thresholds: TriggerThresholds,
    /// Length of a streaming period.
    pub revert_after: Duration,
    /// Interval between snapshot evaluations in [`ModeController::run`].
    pub evaluation_interval: Duration,
}

impl Default for ModeControllerConfig {
    fn default() -> Self {
        Self {
            thresholds: TriggerThresholds::default(),
            revert_after: DEFAULT_REVERT_AFTER,
            evaluation_interval: Duration::from_secs(60),
        }
    }
}

impl ModeControllerConfig {
    /// Validate durations and thresholds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] for zero durations or non-finite thresholds.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.revert_after.is_zero() {
            return Err(ConfigurationError::NonPositiveDuration {
                setting: "revert_after",
            });
        }
        if self.evaluation_interval.is_zero() {
            return Err(ConfigurationError::NonPositiveDuration {
                setting: "evaluation_interval",
            });
        }
        self.thresholds.validate()
    }
}

struct Inner {
    provider: Arc<dyn MarketSnapshotProvider>,
    transport: Arc<dyn StreamingTransport>,
    config: ModeControllerConfig,
    transition: Mutex<()>,
    state: watch::Sender<AcquisitionMode>,
    arm_generation: AtomicU64,
    timer: parking_lot::Mutex<Option<CancellationToken>>,
    timers: CancellationToken,
}

/// Polling/streaming state machine.
///
/// Cloning is cheap and yields a handle to the same controller.
#[derive(Clone)]
pub struct ModeController {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ModeController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModeController")
            .field("config", &self.inner.config)
            .field("state", &*self.inner.state.borrow())
            .finish_non_exhaustive()
    }
}

impl ModeController {
    /// Create a controller in `Polling` mode.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] if `config` is invalid.
    pub fn new(
        provider: Arc<dyn MarketSnapshotProvider>,
        transport: Arc<dyn StreamingTransport>,
        config: ModeControllerConfig,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;
        let (state, _) = watch::channel(AcquisitionMode::polling(config.revert_after));

        Ok(Self {
            inner: Arc::new(Inner {
                provider,
                transport,
                config,
                transition: Mutex::new(()),
                state,
                arm_generation: AtomicU64::new(0),
                timer: parking_lot::Mutex::new(None),
                timers: CancellationToken::new(),
            }),
        })
    }

    /// Current state.
    #[must_use]
    pub fn current(&self) -> AcquisitionMode {
        self.inner.state.borrow().clone()
    }

    /// Observe state changes. Drop the receiver to unsubscribe.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AcquisitionMode> {
        self.inner.state.subscribe()
    }

    /// Sample the snapshot provider and evaluate triggers.
    ///
    /// A provider failure counts as "no trigger this cycle".
    ///
    /// # Errors
    ///
    /// Returns [`AcquisitionError::TransportActivation`] if a trigger held but
    /// the push feed could not be started.
    pub async fn evaluate(&self) -> Result<Mode, AcquisitionError> {
        let snapshot = match self.inner.provider.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::debug!(error = %e, "Snapshot unavailable, skipping evaluation");
                return Ok(self.current().mode);
            }
        };
        self.evaluate_snapshot(&snapshot).await
    }

    /// Evaluate triggers against a given snapshot.
    ///
    /// Only acts while polling; re-evaluation during a streaming period does
    /// not extend it.
    ///
    /// # Errors
    ///
    /// Returns [`AcquisitionError::TransportActivation`] if activation failed.
    pub async fn evaluate_snapshot(&self, snapshot: &MarketSnapshot) -> Result<Mode, AcquisitionError> {
        let _guard = self.inner.transition.lock().await;

        if self.inner.state.borrow().is_streaming() {
            return Ok(Mode::Streaming);
        }

        match self.inner.config.thresholds.select(snapshot, false) {
            Some(trigger) => {
                self.activate_locked(trigger).await?;
                Ok(Mode::Streaming)
            }
            None => Ok(Mode::Polling),
        }
    }

    /// Explicit user activation.
    ///
    /// While polling this starts a streaming period. While streaming it
    /// restarts the period from now and records `manual` as the trigger.
    ///
    /// # Errors
    ///
    /// Returns [`AcquisitionError::TransportActivation`] if activation failed.
    pub async fn activate_manual(&self) -> Result<(), AcquisitionError> {
        let _guard = self.inner.transition.lock().await;

        if self.inner.state.borrow().is_streaming() {
            let state = AcquisitionMode::streaming(
                Trigger::Manual,
                Utc::now(),
                self.inner.config.revert_after,
            );
            self.inner.state.send_replace(state);
            self.arm_timer();
            tracing::info!("Streaming period restarted by user");
            return Ok(());
        }

        self.activate_locked(Trigger::Manual).await
    }

    /// Explicit deactivation. Returns `false` if already polling.
    pub async fn deactivate(&self) -> bool {
        let _guard = self.inner.transition.lock().await;

        if !self.inner.state.borrow().is_streaming() {
            return false;
        }
        self.revert_locked("explicit");
        true
    }

    /// Evaluate on a fixed interval until `cancel` fires, then shut down.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.inner.config.evaluation_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            interval_secs = self.inner.config.evaluation_interval.as_secs(),
            "Mode evaluation started"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.evaluate().await {
                        tracing::warn!(error = %e, "Mode evaluation failed");
                    }
                }
            }
        }

        self.shutdown().await;
        tracing::info!("Mode evaluation stopped");
    }

    /// Disarm timers and return to polling.
    pub async fn shutdown(&self) {
        self.inner.timers.cancel();
        self.deactivate().await;
    }

    async fn activate_locked(&self, trigger: Trigger) -> Result<(), AcquisitionError> {
        if let Err(e) = self.inner.transport.activate().await {
            metrics::record_activation_failure();
            tracing::warn!(trigger = %trigger, error = %e, "Push feed activation failed, staying in polling");
            return Err(AcquisitionError::TransportActivation(e));
        }

        let state = AcquisitionMode::streaming(trigger, Utc::now(), self.inner.config.revert_after);
        self.inner.state.send_replace(state);
        self.arm_timer();

        metrics::record_mode_transition(Mode::Streaming, Some(trigger));
        tracing::info!(
            trigger = %trigger,
            revert_after_secs = self.inner.config.revert_after.as_secs(),
            "Switched to streaming"
        );
        Ok(())
    }

    fn revert_locked(&self, reason: &'static str) {
        self.disarm_timer();
        self.inner.transport.deactivate();
        self.inner
            .state
            .send_replace(AcquisitionMode::polling(self.inner.config.revert_after));

        metrics::record_mode_transition(Mode::Polling, None);
        tracing::info!(reason, "Switched to polling");
    }

    fn arm_timer(&self) {
        let generation = self.inner.arm_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = self.inner.timers.child_token();
        if let Some(previous) = self.inner.timer.lock().replace(token.clone()) {
            previous.cancel();
        }

        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        let deadline = Instant::now() + self.inner.config.revert_after;

        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep_until(deadline) => {
                    if let Some(inner) = inner.upgrade() {
                        Self { inner }.revert_if_current(generation).await;
                    }
                }
            }
        });
    }

    fn disarm_timer(&self) {
        self.inner.arm_generation.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = self.inner.timer.lock().take() {
            token.cancel();
        }
    }

    async fn revert_if_current(&self, generation: u64) {
        let _guard = self.inner.transition.lock().await;

        if self.inner.arm_generation.load(Ordering::SeqCst) != generation {
            tracing::trace!(generation, "Ignoring superseded reversion timer");
            return;
        }
        if self.inner.state.borrow().is_streaming() {
            self.revert_locked("timer");
        }
    }
}
