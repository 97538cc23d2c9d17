//! REST session store.
//!
//! Talks to a PostgREST-style table endpoint: one row per user, upserted on
//! conflict of `user_id`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::application::ports::RemoteStore;
use crate::domain::session::SessionRecord;
use crate::error::PersistenceError;
use crate::infrastructure::config::ApiKey;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP-backed [`RemoteStore`].
#[derive(Debug, Clone)]
pub struct RestRemoteStore {
    client: Client,
    table_url: String,
    api_key: Option<ApiKey>,
}

impl RestRemoteStore {
    /// Store writing to `{base_url}/{table}`.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Remote`] if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        table: &str,
        api_key: Option<ApiKey>,
    ) -> Result<Self, PersistenceError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PersistenceError::Remote(e.to_string()))?;

        Ok(Self {
            client,
            table_url: format!("{}/{table}", base_url.trim_end_matches('/')),
            api_key,
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request
                .header("apikey", key.expose())
                .bearer_auth(key.expose()),
            None => request,
        }
    }
}

fn remote(e: impl std::fmt::Display) -> PersistenceError {
    PersistenceError::Remote(e.to_string())
}

#[async_trait]
impl RemoteStore for RestRemoteStore {
    async fn upsert(&self, record: &SessionRecord) -> Result<(), PersistenceError> {
        let request = self
            .client
            .post(&self.table_url)
            .query(&[("on_conflict", "user_id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(record);

        let response = self.authorize(request).send().await.map_err(remote)?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(remote(format!("upsert returned HTTP {}", status.as_u16())))
    }

    async fn select(&self, user_id: &str) -> Result<Option<SessionRecord>, PersistenceError> {
        let filter = format!("eq.{user_id}");
        let request = self
            .client
            .get(&self.table_url)
            .query(&[("user_id", filter.as_str()), ("select", "*"), ("limit", "1")]);

        let response = self.authorize(request).send().await.map_err(remote)?;
        let status = response.status();
        if !status.is_success() {
            return Err(remote(format!("select returned HTTP {}", status.as_u16())));
        }

        let body = response.text().await.map_err(remote)?;
        let rows: Vec<SessionRecord> = serde_json::from_str(&body)?;
        Ok(rows.into_iter().next())
    }
}
