//! Data API client for wallet activity and positions

use crate::error::FetchError;
use crate::types::{ActivityEntry, Position};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// Read-only feed of wallet activity and live positions
#[async_trait]
pub trait DataFeed: Send + Sync {
    /// Recent activity of a wallet, newest first
    async fn activity(&self, user: &str) -> Result<Vec<ActivityEntry>>;

    /// Current positions of a wallet
    async fn positions(&self, user: &str) -> Result<Vec<Position>>;
}

/// Polymarket data API client
pub struct DataApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl DataApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(&e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status { status, body }.into());
        }

        let parsed = response
            .json::<T>()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))?;

        Ok(parsed)
    }
}

#[async_trait]
impl DataFeed for DataApiClient {
    async fn activity(&self, user: &str) -> Result<Vec<ActivityEntry>> {
        let url = format!("{}/activity?user={}", self.base_url, user);
        self.get_json(&url)
            .await
            .with_context(|| format!("Failed to fetch activity for {}", user))
    }

    async fn positions(&self, user: &str) -> Result<Vec<Position>> {
        let url = format!("{}/positions?user={}", self.base_url, user);
        self.get_json(&url)
            .await
            .with_context(|| format!("Failed to fetch positions for {}", user))
    }
}
