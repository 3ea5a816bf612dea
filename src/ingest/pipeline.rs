//! Sale event ingestion.
//!
//! Drives the events listing page by page, normalizes every item, and keeps
//! the first record seen for each transaction hash. Bad records are skipped
//! and reported; they never abort their page.

use serde_json::Value;
use std::collections::HashSet;
use tracing::{info, warn};

use super::normalize::{normalize, NormalizedRecord};
use super::paginate::{walk_pages, PageWalk, Termination};
use crate::error::{IngestError, SkipReason, SkippedRecord};
use crate::opensea::PageFetcher;

#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub records: Vec<NormalizedRecord>,
    pub skipped: Vec<SkippedRecord>,
    pub walk: PageWalk,
}

impl IngestOutcome {
    /// True when a later page failed and the record set is incomplete.
    pub fn is_partial(&self) -> bool {
        self.walk.termination.is_partial()
    }
}

/// Normalize one page lazily, tagging each failure with its position.
pub fn normalize_page(
    page_offset: u32,
    events: Vec<Value>,
) -> impl Iterator<Item = Result<NormalizedRecord, SkippedRecord>> {
    events
        .into_iter()
        .enumerate()
        .map(move |(index, raw)| {
            normalize(&raw).map_err(|reason| SkippedRecord {
                page_offset,
                index,
                reason,
            })
        })
}

pub struct IngestionPipeline<'a, F: PageFetcher> {
    fetcher: &'a F,
    page_size: u32,
}

impl<'a, F: PageFetcher> IngestionPipeline<'a, F> {
    pub fn new(fetcher: &'a F, page_size: u32) -> Self {
        Self {
            fetcher,
            page_size: page_size.max(1),
        }
    }

    /// Ingest every sale of `contract`, starting at `start_offset`.
    pub async fn ingest(
        &self,
        contract: &str,
        start_offset: u32,
    ) -> Result<IngestOutcome, IngestError> {
        let fetcher = self.fetcher;
        let limit = self.page_size;

        let mut records: Vec<NormalizedRecord> = Vec::new();
        let mut skipped: Vec<SkippedRecord> = Vec::new();
        let mut seen_hashes: HashSet<String> = HashSet::new();

        let walk = walk_pages(
            start_offset,
            limit,
            move |offset| async move {
                fetcher
                    .fetch_events(contract, offset, limit)
                    .await
                    .map(|page| page.asset_events)
            },
            |page_offset, events| {
                let page_len = events.len();
                for (index, result) in normalize_page(page_offset, events).enumerate() {
                    let outcome = result.and_then(|record| {
                        if seen_hashes.insert(record.transaction_hash.clone()) {
                            Ok(record)
                        } else {
                            Err(SkippedRecord {
                                page_offset,
                                index,
                                reason: SkipReason::DuplicateTransactionHash(
                                    record.transaction_hash,
                                ),
                            })
                        }
                    });
                    match outcome {
                        Ok(record) => records.push(record),
                        Err(skip) => {
                            warn!(
                                offset = skip.page_offset,
                                index = skip.index,
                                reason = %skip.reason,
                                "Could not parse event, skipping"
                            );
                            skipped.push(skip);
                        }
                    }
                }
                info!(
                    offset = page_offset,
                    page_len,
                    total = records.len(),
                    "Fetched {} records",
                    records.len()
                );
            },
        )
        .await?;

        match &walk.termination {
            Termination::PageFailed { offset, reason } => warn!(
                offset,
                reason = %reason,
                records = records.len(),
                "Could not fetch events, returning already fetched events"
            ),
            Termination::MissingItemsKey => {
                info!(records = records.len(), "No more events in response")
            }
            Termination::ShortPage => {}
        }

        info!(
            pages = walk.pages,
            records = records.len(),
            skipped = skipped.len(),
            next_offset = walk.next_offset,
            "Event ingestion finished"
        );

        Ok(IngestOutcome {
            records,
            skipped,
            walk,
        })
    }
}
