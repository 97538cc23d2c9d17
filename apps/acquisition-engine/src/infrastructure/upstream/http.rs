//! HTTP JSON upstream client.

use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

use crate::application::ports::{MarketSnapshotProvider, SnapshotError};
use crate::domain::mode::MarketSnapshot;
use crate::error::UpstreamError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// JSON-over-HTTP upstream rooted at a base URL.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: Client,
    base_url: String,
}

impl HttpUpstream {
    /// Create a client for `base_url` with the default timeout.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::Request`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, UpstreamError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    /// Create a client for `base_url` with a request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::Request`] if the HTTP client cannot be built.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UpstreamError::Request(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Base URL without trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `path` and decode the JSON body.
    ///
    /// # Errors
    ///
    /// - [`UpstreamError::RateLimited`] on HTTP 429
    /// - [`UpstreamError::Status`] on any other non-success status
    /// - [`UpstreamError::Request`] if no response arrived
    /// - [`UpstreamError::Decode`] if the body is not the expected JSON
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, UpstreamError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| UpstreamError::Request(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            tracing::warn!(url, "Upstream rate limited request");
            return Err(UpstreamError::RateLimited);
        }
        if !status.is_success() {
            tracing::warn!(url, status = status.as_u16(), "Upstream returned error status");
            return Err(UpstreamError::Status {
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| UpstreamError::Request(e.to_string()))?;
        serde_json::from_str(&body).map_err(|e| UpstreamError::Decode(e.to_string()))
    }

    /// Fetch closure for `path`, suitable for the acquisition service.
    pub fn fetcher<T>(
        &self,
        path: impl Into<String>,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<T, UpstreamError>> + Send + 'static
    where
        T: DeserializeOwned + Send + 'static,
    {
        let upstream = self.clone();
        let path = path.into();
        move || async move { upstream.get_json(&path).await }.boxed()
    }
}

/// Market snapshot read from a JSON endpoint.
///
/// The endpoint returns `{"volatility": f64, "volumeSpike": f64, "majorEvent": bool}`.
#[derive(Debug, Clone)]
pub struct HttpSnapshotProvider {
    upstream: HttpUpstream,
    path: String,
}

impl HttpSnapshotProvider {
    /// Provider reading `path` on `upstream`.
    #[must_use]
    pub fn new(upstream: HttpUpstream, path: impl Into<String>) -> Self {
        Self {
            upstream,
            path: path.into(),
        }
    }
}

#[async_trait]
impl MarketSnapshotProvider for HttpSnapshotProvider {
    async fn snapshot(&self) -> Result<MarketSnapshot, SnapshotError> {
        self.upstream
            .get_json(&self.path)
            .await
            .map_err(|e| SnapshotError::Unavailable(e.to_string()))
    }
}

/// Provider used when no snapshot endpoint is configured.
///
/// Always reports calm markets, so only manual activation enters streaming.
#[derive(Debug, Clone, Copy, Default)]
pub struct CalmMarketProvider;

#[async_trait]
impl MarketSnapshotProvider for CalmMarketProvider {
    async fn snapshot(&self) -> Result<MarketSnapshot, SnapshotError> {
        Ok(MarketSnapshot::default())
    }
}
