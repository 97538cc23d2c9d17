//! Acquisition Service
//!
//! Facade composing the per-upstream [`RateLimiter`]s with the
//! [`TieredCache`]: "get data for this key, refreshing through this fetch
//! function under this upstream's rate limit". Cache hits never touch a
//! limiter.
//!
//! The service also carries routing information for consumers: which keys
//! the push feed covers, and the current acquisition mode.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use super::rate_limiter::{RateLimiter, RateLimiterStats};
use super::tiered_cache::{CacheStats, TieredCache};
use crate::domain::cache::{CacheOutcome, TtlClass};
use crate::domain::mode::AcquisitionMode;
use crate::error::{AcquisitionError, UpstreamError};
use crate::infrastructure::metrics;

/// Rate-limited, cached market data access.
#[derive(Debug, Clone)]
pub struct AcquisitionService<V> {
    limiters: HashMap<String, Arc<RateLimiter>>,
    cache: TieredCache<V>,
    mode: watch::Receiver<AcquisitionMode>,
    streaming_prefixes: Vec<String>,
}

impl<V> AcquisitionService<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a service over `cache`, observing mode changes through `mode`.
    #[must_use]
    pub fn new(cache: TieredCache<V>, mode: watch::Receiver<AcquisitionMode>) -> Self {
        Self {
            limiters: HashMap::new(),
            cache,
            mode,
            streaming_prefixes: Vec::new(),
        }
    }

    /// Register a limiter under its name.
    #[must_use]
    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiters.insert(limiter.name().to_string(), limiter);
        self
    }

    /// Mark keys starting with `prefix` as covered by the push feed.
    #[must_use]
    pub fn with_streaming_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.streaming_prefixes.push(prefix.into());
        self
    }

    /// Return the value for `key`, fetching through `upstream`'s limiter on a miss.
    ///
    /// # Errors
    ///
    /// - [`AcquisitionError::UnknownUpstream`] if no limiter is registered
    ///   under `upstream`.
    /// - [`AcquisitionError::Upstream`] if the fetch failed and the cache has
    ///   no earlier value for `key`.
    pub async fn get<F, Fut>(
        &self,
        key: &str,
        upstream: &str,
        class: &TtlClass,
        fetch: F,
    ) -> Result<CacheOutcome<V>, AcquisitionError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, UpstreamError>> + Send + 'static,
    {
        let limiter = self.limiter(upstream)?;

        self.cache
            .get(key, class, move || async move { limiter.execute(fetch).await })
            .await
            .map_err(|source| AcquisitionError::Upstream {
                key: key.to_string(),
                source,
            })
    }

    /// Schedule a rate-limited refresh of `key` without waiting for it.
    ///
    /// Returns `Ok(false)` when a refresh for `key` is already outstanding.
    ///
    /// # Errors
    ///
    /// Returns [`AcquisitionError::UnknownUpstream`] for an unregistered upstream.
    pub fn refresh_in_background<F, Fut>(
        &self,
        key: &str,
        upstream: &str,
        class: &TtlClass,
        fetch: F,
    ) -> Result<bool, AcquisitionError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, UpstreamError>> + Send + 'static,
    {
        let limiter = self.limiter(upstream)?;
        Ok(self
            .cache
            .refresh_in_background(key, class, move || async move {
                limiter.execute(fetch).await
            }))
    }

    /// Write an update received from the push feed.
    ///
    /// Updates for keys outside the streaming prefixes are dropped and
    /// `false` is returned.
    pub fn publish_streamed(&self, key: &str, value: V, class: TtlClass) -> bool {
        if !self.is_streaming_eligible(key) {
            tracing::debug!(key, "Dropping push update for non-streaming key");
            return false;
        }
        self.cache.insert(key, value, class);
        metrics::record_stream_update();
        true
    }

    /// Whether the push feed covers `key`.
    #[must_use]
    pub fn is_streaming_eligible(&self, key: &str) -> bool {
        self.streaming_prefixes
            .iter()
            .any(|prefix| key.starts_with(prefix.as_str()))
    }

    /// Whether `key` is currently being kept fresh by the push feed.
    #[must_use]
    pub fn is_served_by_stream(&self, key: &str) -> bool {
        self.mode.borrow().is_streaming() && self.is_streaming_eligible(key)
    }

    /// Current acquisition mode.
    #[must_use]
    pub fn current_mode(&self) -> AcquisitionMode {
        self.mode.borrow().clone()
    }

    /// Underlying cache.
    #[must_use]
    pub const fn cache(&self) -> &TieredCache<V> {
        &self.cache
    }

    /// Cache counters.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Limiter statistics, sorted by upstream name.
    #[must_use]
    pub fn limiter_stats(&self) -> Vec<RateLimiterStats> {
        let mut stats: Vec<_> = self.limiters.values().map(|l| l.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    fn limiter(&self, upstream: &str) -> Result<Arc<RateLimiter>, AcquisitionError> {
        self.limiters
            .get(upstream)
            .cloned()
            .ok_or_else(|| AcquisitionError::UnknownUpstream(upstream.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;
    use crate::domain::cache::{Freshness, TtlPolicy};
    use crate::domain::mode::Trigger;

    fn service() -> (AcquisitionService<u32>, watch::Sender<AcquisitionMode>) {
        let (tx, rx) = watch::channel(AcquisitionMode::default());
        let limiter = Arc::new(RateLimiter::new("coingecko", 1, Duration::from_secs(1)).unwrap());
        let service = AcquisitionService::new(TieredCache::new(TtlPolicy::default()), rx)
            .with_limiter(limiter)
            .with_streaming_prefix("ticker:");
        (service, tx)
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_upstream_is_rejected() {
        let (service, _tx) = service();
        let err = service
            .get("ticker:btc", "binance", &TtlClass::TICKER, || async { Ok(1) })
            .await
            .unwrap_err();
        assert_eq!(err, AcquisitionError::UnknownUpstream("binance".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn misses_are_rate_limited_and_hits_are_not() {
        let (service, _tx) = service();
        let start = Instant::now();

        service
            .get("global", "coingecko", &TtlClass::MARKET, || async { Ok(1) })
            .await
            .unwrap();
        service
            .get("trending", "coingecko", &TtlClass::MARKET, || async { Ok(2) })
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(1));

        let hit = service
            .get("global", "coingecko", &TtlClass::MARKET, || async { Ok(3) })
            .await
            .unwrap();
        assert_eq!(hit.freshness, Freshness::Cached);
        assert_eq!(start.elapsed(), Duration::from_secs(1));
        assert_eq!(service.limiter_stats()[0].admitted, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn first_failure_carries_the_key() {
        let (service, _tx) = service();
        let err = service
            .get("global", "coingecko", &TtlClass::MARKET, || async {
                Err(UpstreamError::RateLimited)
            })
            .await
            .unwrap_err();

        assert_eq!(
            err,
            AcquisitionError::Upstream {
                key: "global".to_string(),
                source: UpstreamError::RateLimited,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn background_refresh_goes_through_the_limiter() {
        let (service, _tx) = service();

        assert!(
            service
                .refresh_in_background("global", "coingecko", &TtlClass::MARKET, || async { Ok(9) })
                .unwrap()
        );
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(service.cache().peek("global").unwrap().value, 9);
        assert_eq!(service.limiter_stats()[0].admitted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn push_updates_only_land_for_streaming_keys() {
        let (service, _tx) = service();

        assert!(service.publish_streamed("ticker:btc", 64_000, TtlClass::TICKER));
        assert!(!service.publish_streamed("news:latest", 1, TtlClass::NEWS));

        let outcome = service
            .get("ticker:btc", "coingecko", &TtlClass::TICKER, || async { Ok(0) })
            .await
            .unwrap();
        assert_eq!(outcome.value, 64_000);
        assert_eq!(outcome.freshness, Freshness::Cached);
        assert!(service.cache().peek("news:latest").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_get_does_not_hold_the_limiter() {
        let (service, _tx) = service();

        service
            .get("global", "coingecko", &TtlClass::MARKET, || async { Ok(1) })
            .await
            .unwrap();

        let abandoned = tokio::time::timeout(
            Duration::from_millis(100),
            service.get("trending", "coingecko", &TtlClass::MARKET, || async { Ok(2) }),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_secs(10)).await;
        // The abandoned fetch still ran once its slot opened.
        assert_eq!(service.cache().peek("trending").unwrap().value, 2);

        let next = tokio::time::timeout(
            Duration::from_secs(30),
            service.get("categories", "coingecko", &TtlClass::MARKET, || async { Ok(3) }),
        )
        .await
        .expect("limiter released")
        .unwrap();
        assert_eq!(next.value, 3);
        assert_eq!(service.limiter_stats()[0].admitted, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn push_during_rate_limited_poll_is_kept() {
        let (service, _tx) = service();
        service
            .get("global", "coingecko", &TtlClass::MARKET, || async { Ok(1) })
            .await
            .unwrap();

        let poll = tokio::spawn({
            let service = service.clone();
            async move {
                service
                    .get("ticker:btc", "coingecko", &TtlClass::TICKER, || async { Ok(63_000) })
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(service.publish_streamed("ticker:btc", 64_000, TtlClass::TICKER));

        let polled = poll.await.unwrap().unwrap();
        assert_eq!(polled.value, 63_000);
        assert_eq!(service.cache().peek("ticker:btc").unwrap().value, 64_000);
    }

    #[tokio::test(start_paused = true)]
    async fn routing_follows_mode_changes() {
        let (service, tx) = service();
        assert!(!service.is_served_by_stream("ticker:btc"));

        tx.send_replace(AcquisitionMode::streaming(
            Trigger::Manual,
            chrono::Utc::now(),
            Duration::from_secs(60),
        ));

        assert!(service.current_mode().is_streaming());
        assert!(service.is_served_by_stream("ticker:btc"));
        assert!(!service.is_served_by_stream("global"));
    }
}
