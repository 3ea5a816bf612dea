//! Asset catalog: every item identifier of a collection and its image URL.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{info, warn};

use super::paginate::{walk_pages, PageWalk};
use crate::error::{IngestError, SkipReason, SkippedRecord};
use crate::opensea::PageFetcher;

#[derive(Debug, Clone, Deserialize)]
struct RawCatalogAsset {
    #[serde(default)]
    token_id: Option<Value>,
    #[serde(default)]
    image_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AssetCatalog {
    /// Item identifier -> image URL, ascending by identifier.
    pub images: BTreeMap<u64, String>,
    pub skipped: Vec<SkippedRecord>,
    pub walk: PageWalk,
}

fn parse_catalog_asset(raw: Value) -> Result<(u64, String), SkipReason> {
    let asset: RawCatalogAsset =
        serde_json::from_value(raw).map_err(|e| SkipReason::Malformed(e.to_string()))?;

    let token_id = match asset.token_id {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(SkipReason::MissingField("token_id")),
    };
    let id = token_id
        .trim()
        .parse::<u64>()
        .map_err(|_| SkipReason::InvalidNumber {
            field: "token_id",
            value: token_id.clone(),
        })?;
    let url = asset
        .image_url
        .filter(|u| !u.trim().is_empty())
        .ok_or(SkipReason::MissingField("image_url"))?;
    Ok((id, url))
}

/// Page through the assets listing of `contract`.
pub async fn fetch_asset_catalog<F: PageFetcher>(
    fetcher: &F,
    contract: &str,
    page_size: u32,
    expected_total: Option<usize>,
) -> Result<AssetCatalog, IngestError> {
    let limit = page_size.max(1);
    let mut images = BTreeMap::new();
    let mut skipped = Vec::new();

    let walk = walk_pages(
        0,
        limit,
        move |offset| async move {
            fetcher
                .fetch_assets(contract, offset, limit)
                .await
                .map(|page| page.assets)
        },
        |page_offset, assets| {
            for (index, raw) in assets.into_iter().enumerate() {
                match parse_catalog_asset(raw) {
                    Ok((id, url)) => {
                        images.insert(id, url);
                    }
                    Err(reason) => {
                        warn!(offset = page_offset, index, reason = %reason, "Skipping asset");
                        skipped.push(SkippedRecord {
                            page_offset,
                            index,
                            reason,
                        });
                    }
                }
            }
            info!(offset = page_offset, total = images.len(), "Grabbed assets");
        },
    )
    .await?;

    if let Some(expected) = expected_total {
        if images.len() < expected {
            warn!(
                collected = images.len(),
                expected,
                termination = ?walk.termination,
                "Asset catalog is smaller than the collection"
            );
        }
    }

    Ok(AssetCatalog {
        images,
        skipped,
        walk,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opensea::scripted::{ScriptedFetcher, ScriptedPage};
    use serde_json::json;

    #[tokio::test]
    async fn collects_identifiers_and_urls() {
        let fetcher = ScriptedFetcher::with_assets(vec![
            ScriptedPage::Body(json!({"assets": [
                {"token_id": "2", "image_url": "https://img.test/2"},
                {"token_id": 1, "image_url": "https://img.test/1"},
            ]})),
            ScriptedPage::Body(json!({"assets": [
                {"token_id": "abc", "image_url": "https://img.test/x"},
            ]})),
        ]);
        let catalog = fetch_asset_catalog(&fetcher, "0xcontract", 2, None)
            .await
            .unwrap();

        assert_eq!(fetcher.asset_offsets(), vec![0, 2]);
        let ids: Vec<u64> = catalog.images.keys().copied().collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(catalog.skipped.len(), 1);
        assert_eq!(catalog.skipped[0].page_offset, 2);
    }

    #[tokio::test]
    async fn throttled_first_page_is_an_error() {
        let fetcher = ScriptedFetcher::with_assets(vec![ScriptedPage::Body(
            json!({"detail": "Request was throttled."}),
        )]);
        let result = fetch_asset_catalog(&fetcher, "0xcontract", 50, Some(8888)).await;
        assert!(matches!(
            result,
            Err(IngestError::FirstPageFailed { offset: 0, .. })
        ));
    }

    #[test]
    fn asset_without_image_is_skipped() {
        assert_eq!(
            parse_catalog_asset(json!({"token_id": "5", "image_url": null})),
            Err(SkipReason::MissingField("image_url"))
        );
    }
}
