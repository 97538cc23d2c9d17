//! Sliding-window rate limiter for one upstream source.
//!
//! Admission is a FIFO queue against a shared [`RateWindow`]: callers line up
//! on an async mutex (Tokio's mutex is fair), and the caller at the head
//! sleeps until the oldest timestamp slides out of the window. Timestamps
//! are recorded at admission, so a slow call does not free capacity early.
//!
//! # Example
//!
//! ```rust
//! use acquisition_engine::RateLimiter;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let limiter = RateLimiter::new("coingecko", 30, Duration::from_secs(60))?;
//! let body = limiter.execute(|| async { "response" }).await;
//! assert_eq!(body, "response");
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::domain::rate_window::RateWindow;
use crate::error::{ConfigurationError, UpstreamError};
use crate::infrastructure::metrics;

/// Point-in-time limiter statistics for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStats {
    /// Upstream name.
    pub name: String,
    /// Maximum admissions per window.
    pub max_requests: usize,
    /// Window length in milliseconds.
    pub window_ms: u64,
    /// Admissions currently in the window; `None` while a caller holds the queue.
    pub in_window: Option<usize>,
    /// Total admissions.
    pub admitted: u64,
    /// Admissions that had to wait for capacity.
    pub throttled: u64,
}

/// Rate limiter bounding calls to one upstream.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    max_requests: usize,
    window_len: Duration,
    window: Mutex<RateWindow>,
    admitted: AtomicU64,
    throttled: AtomicU64,
}

impl RateLimiter {
    /// Create a limiter allowing `max_requests` calls per `window`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] if `max_requests` is zero or the window
    /// is empty.
    pub fn new(
        name: impl Into<String>,
        max_requests: usize,
        window: Duration,
    ) -> Result<Self, ConfigurationError> {
        let name = name.into();
        let rate_window = RateWindow::new(&name, max_requests, window)?;

        Ok(Self {
            name,
            max_requests,
            window_len: window,
            window: Mutex::new(rate_window),
            admitted: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
        })
    }

    /// Upstream name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait until a call may be issued, then record the admission.
    ///
    /// Callers are admitted in the order they called `admit`.
    pub async fn admit(&self) {
        let requested_at = Instant::now();
        let mut window = self.window.lock().await;
        let mut waited = false;

        loop {
            match window.try_admit(Instant::now()) {
                Ok(()) => break,
                Err(wait) => {
                    if !waited {
                        self.throttled.fetch_add(1, Ordering::Relaxed);
                        waited = true;
                    }
                    tracing::debug!(
                        upstream = %self.name,
                        wait_ms = wait.as_millis(),
                        "Rate window full, waiting for capacity"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
        drop(window);

        self.admitted.fetch_add(1, Ordering::Relaxed);
        metrics::record_admission(&self.name, requested_at.elapsed());
    }

    /// Like [`admit`](Self::admit), but gives up when `cancel` fires.
    ///
    /// A cancelled waiter records nothing, so the window is exactly as it
    /// would have been had the caller never asked.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::Cancelled`] if the token fires first.
    pub async fn admit_with_cancel(&self, cancel: &CancellationToken) -> Result<(), UpstreamError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!(upstream = %self.name, "Admission wait cancelled");
                Err(UpstreamError::Cancelled)
            }
            () = self.admit() => Ok(()),
        }
    }

    /// Admit, then run `call` and return its output unchanged.
    ///
    /// Failures of `call` are not interpreted or retried.
    pub async fn execute<F, Fut>(&self, call: F) -> Fut::Output
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        self.admit().await;
        call().await
    }

    /// Cancellable variant of [`execute`](Self::execute).
    ///
    /// Only the admission wait is cancellable; once admitted, `call` runs to
    /// completion.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::Cancelled`] if the token fires before admission.
    pub async fn execute_with_cancel<F, Fut>(
        &self,
        cancel: &CancellationToken,
        call: F,
    ) -> Result<Fut::Output, UpstreamError>
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        self.admit_with_cancel(cancel).await?;
        Ok(call().await)
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> RateLimiterStats {
        let in_window = self
            .window
            .try_lock()
            .ok()
            .map(|mut w| w.in_window(Instant::now()));

        RateLimiterStats {
            name: self.name.clone(),
            max_requests: self.max_requests,
            window_ms: u64::try_from(self.window_len.as_millis()).unwrap_or(u64::MAX),
            in_window,
            admitted: self.admitted.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
        }
    }
}
