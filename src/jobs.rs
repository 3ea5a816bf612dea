//! End-to-end jobs.
//!
//! `MosaicJob` turns the asset catalog into a mosaic and its coordinate
//! lookup. `SalesJob` ingests sale events and derives the enriched and cleaned
//! tables from them and the lookup. Run the mosaic first so sales can be
//! joined with coordinates.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::dataset::{drop_deprecated_columns, enrich, SalesStore};
use crate::ingest::{fetch_asset_catalog, IngestionPipeline};
use crate::mosaic::thumbnails::{download_thumbnails, has_thumbnails};
use crate::mosaic::{assemble, list_thumbnails, CoordinateLookup, ImageCompositor, RgbCompositor};
use crate::opensea::{ImageSource, PageFetcher};

pub const ENRICHED_TABLE: &str = "sales_enriched";
pub const CLEANED_TABLE: &str = "sales_cleaned";

#[derive(Debug, Clone, Default, Serialize)]
pub struct SalesReport {
    /// False when ingestion was skipped because sales were already stored.
    pub ingested: bool,
    pub start_offset: u32,
    pub next_offset: Option<u32>,
    pub fetched: usize,
    pub skipped: usize,
    pub inserted: usize,
    pub rejected: usize,
    /// A later page failed; the stored set is incomplete.
    pub partial: bool,
    pub total_sales: usize,
    pub enrichment_misses: usize,
    pub cleaned_columns: Vec<String>,
}

pub struct SalesJob<'a, F: PageFetcher> {
    config: &'a PipelineConfig,
    fetcher: &'a F,
    store: &'a SalesStore,
}

impl<'a, F: PageFetcher> SalesJob<'a, F> {
    pub fn new(config: &'a PipelineConfig, fetcher: &'a F, store: &'a SalesStore) -> Self {
        Self {
            config,
            fetcher,
            store,
        }
    }

    /// Ingest sales (unless already stored and neither `force` nor `resume`),
    /// then rebuild the derived tables.
    pub async fn run(&self, force: bool, resume: bool) -> Result<SalesReport> {
        let contract = self.config.contract_address.as_str();
        let mut report = SalesReport::default();

        let stored = self.store.sales_count()?;
        if stored > 0 && !force && !resume {
            info!(stored, "Sales already ingested, skipping fetch (use --force to refetch)");
        } else {
            let start_offset = if resume {
                self.store.checkpoint(contract)?.unwrap_or(0)
            } else {
                0
            };
            info!(contract, start_offset, "Ingesting sales");

            let outcome = IngestionPipeline::new(self.fetcher, self.config.page_size)
                .ingest(contract, start_offset)
                .await
                .context("Sales ingestion failed")?;
            let summary = self.store.insert_sales(&outcome.records)?;
            self.store
                .save_checkpoint(contract, outcome.walk.next_offset)?;

            if outcome.is_partial() {
                warn!(
                    next_offset = outcome.walk.next_offset,
                    termination = ?outcome.walk.termination,
                    "Ingestion stopped early, rerun with --resume to continue"
                );
            }

            report.ingested = true;
            report.start_offset = start_offset;
            report.next_offset = Some(outcome.walk.next_offset);
            report.fetched = outcome.records.len();
            report.skipped = outcome.skipped.len();
            report.inserted = summary.inserted;
            report.rejected = summary.rejected.len();
            report.partial = outcome.is_partial();
        }

        let sales = self.store.load_sales()?;
        report.total_sales = sales.len();

        let lookup = if self.config.lookup_path.exists() {
            CoordinateLookup::load(&self.config.lookup_path)?
        } else {
            warn!(
                path = %self.config.lookup_path.display(),
                "No coordinate lookup found, enriched rows will have no coordinates"
            );
            CoordinateLookup::new()
        };

        let enriched = enrich(sales, &lookup);
        report.enrichment_misses = enriched.misses.len();
        self.store.write_enriched(ENRICHED_TABLE, &enriched.records)?;
        report.cleaned_columns = drop_deprecated_columns(
            self.store,
            ENRICHED_TABLE,
            CLEANED_TABLE,
            &self.config.deprecated_columns,
        )?;

        info!(
            total = report.total_sales,
            misses = report.enrichment_misses,
            "Sales tables rebuilt"
        );
        Ok(report)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MosaicReport {
    /// False when an existing lookup was kept.
    pub built: bool,
    pub catalog_size: Option<usize>,
    pub downloaded: usize,
    pub download_failures: usize,
    pub placed: usize,
    pub unplaced: usize,
    pub failed_tiles: usize,
    pub mosaic_path: Option<PathBuf>,
    pub lookup_path: PathBuf,
}

pub struct MosaicJob<'a, S: PageFetcher + ImageSource> {
    config: &'a PipelineConfig,
    source: &'a S,
}

impl<'a, S: PageFetcher + ImageSource> MosaicJob<'a, S> {
    pub fn new(config: &'a PipelineConfig, source: &'a S) -> Self {
        Self { config, source }
    }

    pub async fn run(&self, force: bool) -> Result<MosaicReport> {
        let config = self.config;
        let mut report = MosaicReport {
            lookup_path: config.lookup_path.clone(),
            ..Default::default()
        };

        if config.lookup_path.exists() && !force {
            let lookup = CoordinateLookup::load(&config.lookup_path)?;
            report.placed = lookup.len();
            info!(
                path = %config.lookup_path.display(),
                placed = lookup.len(),
                "Lookup already exists, skipping mosaic (use --force to rebuild)"
            );
            return Ok(report);
        }

        if force || !has_thumbnails(&config.thumbnail_dir) {
            let catalog = fetch_asset_catalog(
                self.source,
                &config.contract_address,
                config.asset_page_size,
                config.expected_assets,
            )
            .await
            .context("Asset catalog fetch failed")?;
            report.catalog_size = Some(catalog.images.len());
            if catalog.images.is_empty() {
                return Err(anyhow!(
                    "asset catalog for {} is empty, not building a mosaic",
                    config.contract_address
                ));
            }

            let downloads = download_thumbnails(
                self.source,
                &catalog.images,
                &config.thumbnail_dir,
                &config.thumbnail_suffix,
                config.download_concurrency,
            )
            .await?;
            report.downloaded = downloads.saved;
            report.download_failures = downloads.failed.len();
        } else {
            info!(dir = %config.thumbnail_dir.display(), "Thumbnails present, skipping download");
        }

        let entries = list_thumbnails(&config.thumbnail_dir)?;
        let mut compositor = RgbCompositor::new(config.canvas);
        let outcome = assemble(&entries, config.canvas, &mut compositor)?;
        // An empty lookup on disk would suppress every later non-forced build.
        if outcome.lookup.is_empty() {
            return Err(anyhow!(
                "no thumbnail in {} could be placed ({} failed), not saving a lookup",
                config.thumbnail_dir.display(),
                outcome.failed.len()
            ));
        }

        std::fs::create_dir_all(&config.mosaic_dir)
            .with_context(|| format!("Failed to create {}", config.mosaic_dir.display()))?;
        let mosaic_path = config
            .mosaic_dir
            .join(format!("full_{}.jpg", Utc::now().format("%Y%m%dT%H%M%S")));
        compositor.save(&mosaic_path)?;
        outcome.lookup.save(&config.lookup_path)?;

        report.built = true;
        report.placed = outcome.lookup.len();
        report.unplaced = outcome.unplaced.len();
        report.failed_tiles = outcome.failed.len();
        info!(
            mosaic = %mosaic_path.display(),
            lookup = %config.lookup_path.display(),
            placed = report.placed,
            "Saved mosaic"
        );
        report.mosaic_path = Some(mosaic_path);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CanvasSpec;
    use crate::ingest::normalize::fixtures::sale_event;
    use crate::opensea::scripted::{ScriptedFetcher, ScriptedPage};
    use serde_json::json;
    use tempfile::tempdir;

    fn config(dir: &std::path::Path) -> PipelineConfig {
        PipelineConfig {
            page_size: 2,
            canvas: CanvasSpec::new(100, 50, 50).unwrap(),
            database_path: dir.join("sales.db"),
            thumbnail_dir: dir.join("images"),
            lookup_path: dir.join("images/lookup.json"),
            mosaic_dir: dir.join("images"),
            ..PipelineConfig::default()
        }
    }

    fn events(items: Vec<serde_json::Value>) -> ScriptedPage {
        ScriptedPage::Body(json!({ "asset_events": items }))
    }

    #[tokio::test]
    async fn sales_job_builds_all_tables() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        let mut lookup = CoordinateLookup::new();
        lookup.insert(1, [0, 50, 0, 50].into());
        lookup.save(&config.lookup_path).unwrap();

        let fetcher = ScriptedFetcher::with_events(vec![
            events(vec![sale_event(1, "0xa"), sale_event(2, "0xb")]),
            events(vec![sale_event(1, "0xc")]),
        ]);
        let store = SalesStore::in_memory().unwrap();

        let report = SalesJob::new(&config, &fetcher, &store)
            .run(false, false)
            .await
            .unwrap();
        assert!(report.ingested);
        assert_eq!(report.inserted, 3);
        assert_eq!(report.next_offset, Some(3));
        assert_eq!(report.enrichment_misses, 1);
        assert_eq!(fetcher.event_offsets(), vec![0, 2]);

        assert_eq!(store.snapshot(ENRICHED_TABLE).unwrap().rows.len(), 3);
        let cleaned = store.snapshot(CLEANED_TABLE).unwrap();
        assert_eq!(cleaned.rows.len(), 3);
        assert!(!cleaned.columns.iter().any(|c| c == "seller_username"));
        assert!(cleaned.columns.iter().any(|c| c == "x0"));
    }

    #[tokio::test]
    async fn sales_job_skips_fetch_when_already_stored() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        let store = SalesStore::in_memory().unwrap();

        let first = ScriptedFetcher::with_events(vec![events(vec![sale_event(1, "0xa")])]);
        SalesJob::new(&config, &first, &store)
            .run(false, false)
            .await
            .unwrap();

        let second = ScriptedFetcher::with_events(vec![]);
        let report = SalesJob::new(&config, &second, &store)
            .run(false, false)
            .await
            .unwrap();
        assert!(!report.ingested);
        assert!(second.event_offsets().is_empty());
        assert_eq!(report.total_sales, 1);
        assert_eq!(store.snapshot(CLEANED_TABLE).unwrap().rows.len(), 1);
    }

    #[tokio::test]
    async fn resume_starts_at_the_checkpoint() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        let store = SalesStore::in_memory().unwrap();

        let interrupted = ScriptedFetcher::with_events(vec![
            events(vec![sale_event(1, "0xa"), sale_event(2, "0xb")]),
            ScriptedPage::Fail("503 Service Unavailable".to_string()),
        ]);
        let report = SalesJob::new(&config, &interrupted, &store)
            .run(false, false)
            .await
            .unwrap();
        assert!(report.partial);
        assert_eq!(store.checkpoint(&config.contract_address).unwrap(), Some(2));

        let resumed = ScriptedFetcher::with_events(vec![events(vec![sale_event(3, "0xc")])]);
        let report = SalesJob::new(&config, &resumed, &store)
            .run(false, true)
            .await
            .unwrap();
        assert_eq!(resumed.event_offsets(), vec![2]);
        assert_eq!(report.start_offset, 2);
        assert_eq!(report.total_sales, 3);
        assert!(!report.partial);
    }

    #[tokio::test]
    async fn failed_first_page_stores_nothing() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        let store = SalesStore::in_memory().unwrap();
        let fetcher = ScriptedFetcher::with_events(vec![ScriptedPage::Fail("timeout".to_string())]);

        let result = SalesJob::new(&config, &fetcher, &store).run(false, false).await;
        assert!(result.is_err());
        assert_eq!(store.sales_count().unwrap(), 0);
        assert_eq!(store.checkpoint(&config.contract_address).unwrap(), None);
    }

    #[tokio::test]
    async fn mosaic_job_keeps_an_existing_lookup() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        let mut lookup = CoordinateLookup::new();
        lookup.insert(4, [0, 50, 0, 50].into());
        lookup.save(&config.lookup_path).unwrap();

        let fetcher = ScriptedFetcher::with_assets(vec![]);
        let report = MosaicJob::new(&config, &fetcher).run(false).await.unwrap();
        assert!(!report.built);
        assert_eq!(report.placed, 1);
        assert!(fetcher.asset_offsets().is_empty());
    }

    #[tokio::test]
    async fn throttled_catalog_leaves_no_lookup_behind() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        let fetcher = ScriptedFetcher::with_assets(vec![ScriptedPage::Body(
            json!({"detail": "Request was throttled."}),
        )]);

        assert!(MosaicJob::new(&config, &fetcher).run(false).await.is_err());
        assert!(!config.lookup_path.exists());

        let retry = ScriptedFetcher::with_assets(vec![ScriptedPage::Fail(
            "still throttled".to_string(),
        )]);
        assert!(MosaicJob::new(&config, &retry).run(false).await.is_err());
        assert_eq!(retry.asset_offsets(), vec![0]);
    }

    #[tokio::test]
    async fn empty_catalog_is_not_a_mosaic() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        let fetcher = ScriptedFetcher::with_assets(vec![ScriptedPage::Body(json!({"assets": []}))]);

        assert!(MosaicJob::new(&config, &fetcher).run(false).await.is_err());
        assert!(!config.lookup_path.exists());
    }

    #[tokio::test]
    async fn unreadable_thumbnails_leave_no_lookup_behind() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        std::fs::create_dir_all(&config.thumbnail_dir).unwrap();
        std::fs::write(config.thumbnail_dir.join("1.png"), b"<html>throttled</html>").unwrap();

        let fetcher = ScriptedFetcher::with_assets(vec![]);
        assert!(MosaicJob::new(&config, &fetcher).run(false).await.is_err());
        assert!(!config.lookup_path.exists());
    }

    #[tokio::test]
    async fn mosaic_job_uses_thumbnails_on_disk() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        std::fs::create_dir_all(&config.thumbnail_dir).unwrap();
        for (id, shade) in [(2u64, 10u8), (1, 200)] {
            image::RgbImage::from_pixel(8, 8, image::Rgb([shade, shade, shade]))
                .save(config.thumbnail_dir.join(format!("{}.png", id)))
                .unwrap();
        }

        let fetcher = ScriptedFetcher::with_assets(vec![]);
        let report = MosaicJob::new(&config, &fetcher).run(false).await.unwrap();
        assert!(report.built);
        assert_eq!(report.placed, 2);
        assert!(fetcher.asset_offsets().is_empty());
        assert!(report.mosaic_path.as_ref().unwrap().exists());

        let lookup = CoordinateLookup::load(&config.lookup_path).unwrap();
        assert_eq!(lookup.get(1).map(|b| b.x0), Some(0));
        assert_eq!(lookup.get(2).map(|b| b.x0), Some(50));
    }
}
