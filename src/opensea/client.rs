//! OpenSea REST API Client
//!
//! Thin transport over the two paginated listings. Retries and backoff are
//! left to the caller; a failed call is reported once and never retried here.

use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;

use super::models::{AssetsPage, EventsPage};

/// Fetches one page of a paginated listing.
#[async_trait::async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_events(&self, contract: &str, offset: u32, limit: u32) -> Result<EventsPage>;

    async fn fetch_assets(&self, contract: &str, offset: u32, limit: u32) -> Result<AssetsPage>;
}

/// Fetches raw file bytes (thumbnails) by absolute URL.
#[async_trait::async_trait]
pub trait ImageSource: Send + Sync {
    async fn download(&self, url: &str) -> Result<Vec<u8>>;
}

#[derive(Clone)]
pub struct OpenSeaClient {
    client: Client,
    base_url: String,
}

impl OpenSeaClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .user_agent("sales-mosaic/0.1")
            .build()
            .context("Failed to build OpenSeaClient")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    #[inline]
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait::async_trait]
impl PageFetcher for OpenSeaClient {
    async fn fetch_events(&self, contract: &str, offset: u32, limit: u32) -> Result<EventsPage> {
        let url = self.url("/events");
        let qp = [
            ("asset_contract_address", contract.to_string()),
            ("limit", limit.to_string()),
            ("event_type", "successful".to_string()),
            ("only_opensea", "true".to_string()),
            ("offset", offset.to_string()),
        ];

        let resp = self
            .client
            .get(&url)
            .query(&qp)
            .send()
            .await
            .context("GET /events failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("GET /events offset={} {}: {}", offset, status, text));
        }

        resp.json::<EventsPage>()
            .await
            .context("Failed to parse events response")
    }

    async fn fetch_assets(&self, contract: &str, offset: u32, limit: u32) -> Result<AssetsPage> {
        let url = self.url("/assets");
        let qp = [
            ("asset_contract_address", contract.to_string()),
            ("limit", limit.to_string()),
            ("order_direction", "asc".to_string()),
            ("offset", offset.to_string()),
        ];

        let resp = self
            .client
            .get(&url)
            .query(&qp)
            .send()
            .await
            .context("GET /assets failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("GET /assets offset={} {}: {}", offset, status, text));
        }

        resp.json::<AssetsPage>()
            .await
            .context("Failed to parse assets response")
    }
}

#[async_trait::async_trait]
impl ImageSource for OpenSeaClient {
    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(anyhow::anyhow!("GET {} {}", url, status));
        }

        let bytes = resp
            .bytes()
            .await
            .with_context(|| format!("Failed to read body of {}", url))?;
        Ok(bytes.to_vec())
    }
}
