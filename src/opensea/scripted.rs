//! Scripted `PageFetcher` for unit tests.
//!
//! Responses are served in call order; every requested offset is recorded.

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use serde_json::Value;

use super::client::{ImageSource, PageFetcher};
use super::models::{AssetsPage, EventsPage};

#[derive(Debug, Clone)]
pub enum ScriptedPage {
    /// Raw JSON body, decoded the same way a live response is.
    Body(Value),
    Fail(String),
}

#[derive(Default)]
pub struct ScriptedFetcher {
    events: Mutex<Vec<ScriptedPage>>,
    assets: Mutex<Vec<ScriptedPage>>,
    event_offsets: Mutex<Vec<u32>>,
    asset_offsets: Mutex<Vec<u32>>,
}

impl ScriptedFetcher {
    pub fn with_events(pages: Vec<ScriptedPage>) -> Self {
        Self {
            events: Mutex::new(pages.into_iter().rev().collect()),
            ..Default::default()
        }
    }

    pub fn with_assets(pages: Vec<ScriptedPage>) -> Self {
        Self {
            assets: Mutex::new(pages.into_iter().rev().collect()),
            ..Default::default()
        }
    }

    pub fn event_offsets(&self) -> Vec<u32> {
        self.event_offsets.lock().clone()
    }

    pub fn asset_offsets(&self) -> Vec<u32> {
        self.asset_offsets.lock().clone()
    }
}

fn next_page(queue: &Mutex<Vec<ScriptedPage>>) -> Result<Value> {
    match queue.lock().pop() {
        Some(ScriptedPage::Body(v)) => Ok(v),
        Some(ScriptedPage::Fail(reason)) => Err(anyhow!(reason)),
        None => Err(anyhow!("script exhausted")),
    }
}

#[async_trait::async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch_events(&self, _contract: &str, offset: u32, _limit: u32) -> Result<EventsPage> {
        self.event_offsets.lock().push(offset);
        Ok(serde_json::from_value(next_page(&self.events)?)?)
    }

    async fn fetch_assets(&self, _contract: &str, offset: u32, _limit: u32) -> Result<AssetsPage> {
        self.asset_offsets.lock().push(offset);
        Ok(serde_json::from_value(next_page(&self.assets)?)?)
    }
}

#[async_trait::async_trait]
impl ImageSource for ScriptedFetcher {
    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        Err(anyhow!("no image scripted for {}", url))
    }
}
