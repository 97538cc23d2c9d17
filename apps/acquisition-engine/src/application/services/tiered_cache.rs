//! Tiered Cache
//!
//! Key → last fetched value with a per-class TTL. Expired entries are kept as
//! stale fallback material; only [`TieredCache::clear`] removes them.
//!
//! Fetches are single-flight per key. The first caller to miss creates a
//! shared fetch; later callers for the same key (foreground `get` or
//! `refresh_in_background`) join it instead of calling upstream again.
//!
//! Each fetch runs on a spawned task and lands its own result, so a caller
//! that stops waiting never strands the fetch or the limiter slot it holds.
//! A fetched value never overwrites an entry written after the fetch started.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::time::Instant;

use crate::domain::cache::{CacheEntry, CacheOutcome, Freshness, TtlClass, TtlPolicy};
use crate::error::UpstreamError;
use crate::infrastructure::metrics;

type Flight<V> = Shared<BoxFuture<'static, Result<V, UpstreamError>>>;

/// Cache counters for health reporting.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    /// Entries currently held (fresh or expired).
    pub entries: usize,
    /// Keys with a fetch outstanding.
    pub in_flight: usize,
    /// Lookups served from a fresh entry.
    pub hits: u64,
    /// Upstream fetches started.
    pub fetches: u64,
    /// Lookups answered with a stale fallback.
    pub stale_served: u64,
    /// Fetches that failed.
    pub failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    fetches: AtomicU64,
    stale_served: AtomicU64,
    failures: AtomicU64,
}

struct Inner<V> {
    policy: TtlPolicy,
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
    in_flight: Mutex<HashMap<String, Flight<V>>>,
    counters: Counters,
}

impl<V: Clone> Inner<V> {
    fn store(&self, key: &str, value: V, class: TtlClass) {
        let ttl = self.policy.ttl_for(&class);
        let entry = CacheEntry::new(key, value, class, ttl, Instant::now());
        self.entries.write().insert(key.to_string(), entry);
    }

    /// Store a fetched value unless a newer entry arrived while it was in flight.
    fn store_fetched(&self, key: &str, value: V, class: TtlClass, started: Instant) {
        let now = Instant::now();
        let mut entries = self.entries.write();
        if entries.get(key).is_some_and(|entry| entry.fetched_at > started) {
            tracing::debug!(key, "Discarding fetched value older than cached entry");
            return;
        }
        let ttl = self.policy.ttl_for(&class);
        entries.insert(key.to_string(), CacheEntry::new(key, value, class, ttl, now));
    }

    fn fresh(&self, key: &str) -> Option<V> {
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        entry.is_fresh(Instant::now()).then(|| entry.value.clone())
    }

    fn any(&self, key: &str) -> Option<V> {
        self.entries.read().get(key).map(|entry| entry.value.clone())
    }
}

/// TTL cache with stale fallback and single-flight refreshes.
///
/// Cloning is cheap and yields a handle to the same cache.
pub struct TieredCache<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for TieredCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> std::fmt::Debug for TieredCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("policy", &self.inner.policy)
            .field("entries", &self.inner.entries.read().len())
            .finish_non_exhaustive()
    }
}

impl<V> TieredCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create an empty cache using `policy` for expiry.
    #[must_use]
    pub fn new(policy: TtlPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                policy,
                entries: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                counters: Counters::default(),
            }),
        }
    }

    /// TTL policy in use.
    #[must_use]
    pub fn policy(&self) -> &TtlPolicy {
        &self.inner.policy
    }

    /// Return the value for `key`, fetching it if missing or expired.
    ///
    /// A fresh entry is returned without I/O. Otherwise `fetch` runs (or an
    /// outstanding fetch for the key is joined). If the fetch fails and an
    /// earlier value exists, that value is returned as [`Freshness::Stale`].
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns the fetch error when no earlier value exists for `key`.
    pub async fn get<F, Fut>(
        &self,
        key: &str,
        class: &TtlClass,
        fetch: F,
    ) -> Result<CacheOutcome<V>, UpstreamError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, UpstreamError>> + Send + 'static,
    {
        if let Some(value) = self.inner.fresh(key) {
            self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
            metrics::record_cache_lookup(Freshness::Cached);
            return Ok(CacheOutcome {
                value,
                freshness: Freshness::Cached,
            });
        }

        let (flight, started) = self.flight(key, class, fetch);
        if !started {
            tracing::trace!(key, "Joining in-flight fetch");
        }

        match flight.await {
            Ok(value) => {
                metrics::record_cache_lookup(Freshness::Fetched);
                Ok(CacheOutcome {
                    value,
                    freshness: Freshness::Fetched,
                })
            }
            Err(error) => {
                let fallback = self.inner.any(key);
                metrics::record_fetch_failure(fallback.is_some());

                let Some(value) = fallback else {
                    tracing::warn!(key, error = %error, "Fetch failed with no cached fallback");
                    return Err(error);
                };

                tracing::warn!(key, error = %error, "Fetch failed, serving stale value");
                self.inner
                    .counters
                    .stale_served
                    .fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_lookup(Freshness::Stale);
                Ok(CacheOutcome {
                    value,
                    freshness: Freshness::Stale,
                })
            }
        }
    }

    /// Refresh `key` without blocking any reader.
    ///
    /// Returns `false` (and does nothing) when a fetch for `key` is already
    /// outstanding. Failures are logged and leave the entry untouched.
    /// Must be called from within a Tokio runtime.
    pub fn refresh_in_background<F, Fut>(&self, key: &str, class: &TtlClass, fetch: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, UpstreamError>> + Send + 'static,
    {
        let (flight, started) = self.flight(key, class, fetch);
        if !started {
            tracing::debug!(key, "Refresh already in flight, skipping");
            return false;
        }

        let key = key.to_string();
        tokio::spawn(async move {
            match flight.await {
                Ok(_) => {
                    tracing::debug!(key, "Background refresh completed");
                    metrics::record_background_refresh(true);
                }
                Err(error) => {
                    tracing::warn!(key, error = %error, "Background refresh failed");
                    metrics::record_background_refresh(false);
                }
            }
        });
        true
    }

    /// Write a fresh entry supplied by a push source.
    pub fn insert(&self, key: &str, value: V, class: TtlClass) {
        self.inner.store(key, value, class);
    }

    /// Read the entry for `key` without fetching.
    ///
    /// Expired entries are reported as [`Freshness::Stale`].
    #[must_use]
    pub fn peek(&self, key: &str) -> Option<CacheOutcome<V>> {
        let entries = self.inner.entries.read();
        let entry = entries.get(key)?;
        let freshness = if entry.is_fresh(Instant::now()) {
            Freshness::Cached
        } else {
            Freshness::Stale
        };
        Some(CacheOutcome {
            value: entry.value.clone(),
            freshness,
        })
    }

    /// Remove one entry, or all of them when `key` is `None`.
    ///
    /// A fetch already in flight still stores its result when it completes.
    pub fn clear(&self, key: Option<&str>) {
        let mut entries = self.inner.entries.write();
        match key {
            Some(key) => {
                entries.remove(key);
            }
            None => entries.clear(),
        }
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let counters = &self.inner.counters;
        CacheStats {
            entries: self.inner.entries.read().len(),
            in_flight: self.inner.in_flight.lock().len(),
            hits: counters.hits.load(Ordering::Relaxed),
            fetches: counters.fetches.load(Ordering::Relaxed),
            stale_served: counters.stale_served.load(Ordering::Relaxed),
            failures: counters.failures.load(Ordering::Relaxed),
        }
    }

    /// Join the outstanding fetch for `key` or start a new one.
    ///
    /// The fetch runs on its own task, so it completes and releases whatever
    /// it holds (a limiter slot, a queued permit) even when every waiter has
    /// gone away. The boolean is `true` when this call created the flight.
    fn flight<F, Fut>(&self, key: &str, class: &TtlClass, fetch: F) -> (Flight<V>, bool)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, UpstreamError>> + Send + 'static,
    {
        // Held until the entry is inserted; the task removes it under the same lock.
        let mut in_flight = self.inner.in_flight.lock();
        if let Some(existing) = in_flight.get(key) {
            return (existing.clone(), false);
        }

        let landing = FlightLanding {
            inner: Arc::downgrade(&self.inner),
            key: key.to_string(),
            completed: false,
        };
        let class = class.clone();
        let started = Instant::now();
        self.inner.counters.fetches.fetch_add(1, Ordering::Relaxed);

        let task = tokio::spawn(async move {
            let mut landing = landing;
            let result = fetch().await;
            landing.complete(&result, class, started);
            result
        });

        let flight = async move {
            task.await.unwrap_or_else(|e| {
                tracing::error!(error = %e, "Fetch task did not complete");
                Err(UpstreamError::Request(format!("fetch task aborted: {e}")))
            })
        }
        .boxed()
        .shared();

        in_flight.insert(key.to_string(), flight.clone());
        (flight, true)
    }
}

/// Lands a flight's result and releases its `in_flight` slot.
///
/// Dropping it without [`complete`](Self::complete) (the fetch panicked or
/// its task was aborted) still releases the slot and counts a failure, so the
/// next lookup starts a new fetch.
struct FlightLanding<V> {
    inner: Weak<Inner<V>>,
    key: String,
    completed: bool,
}

impl<V: Clone> FlightLanding<V> {
    fn complete(&mut self, result: &Result<V, UpstreamError>, class: TtlClass, started: Instant) {
        self.completed = true;
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        match result {
            Ok(value) => inner.store_fetched(&self.key, value.clone(), class, started),
            Err(_) => {
                inner.counters.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl<V> Drop for FlightLanding<V> {
    fn drop(&mut self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        if !self.completed {
            inner.counters.failures.fetch_add(1, Ordering::Relaxed);
        }
        inner.in_flight.lock().remove(&self.key);
    }
}
