//! Offset pagination shared by every listing.
//!
//! Fetches pages of `page_size` starting at `start_offset` and keeps going
//! while the last page was full. A failure on the first page of a walk is
//! fatal, and so is a first response without the items key (throttle bodies
//! come back as `{"detail": ..}`). A failure on any later page ends the walk
//! with what was collected.

use std::future::Future;
use tracing::{debug, warn};

use crate::error::IngestError;

/// How a page walk ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The last page held fewer items than the page size.
    ShortPage,
    /// The response carried no items key.
    MissingItemsKey,
    /// A page after the first one failed; earlier pages are kept.
    PageFailed { offset: u32, reason: String },
}

impl Termination {
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::PageFailed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageWalk {
    pub pages: u32,
    pub items: usize,
    /// Offset to resume from: just past the last consumed page.
    pub next_offset: u32,
    pub termination: Termination,
}

/// Walk a listing page by page.
///
/// `fetch` returns `Ok(None)` when the response lacks the items key.
/// `on_page` receives every successful page with its offset, in order.
pub async fn walk_pages<T, Fetch, Fut, OnPage>(
    start_offset: u32,
    page_size: u32,
    mut fetch: Fetch,
    mut on_page: OnPage,
) -> Result<PageWalk, IngestError>
where
    Fetch: FnMut(u32) -> Fut,
    Fut: Future<Output = anyhow::Result<Option<Vec<T>>>>,
    OnPage: FnMut(u32, Vec<T>),
{
    let page_size = page_size.max(1);
    let mut offset = start_offset;
    let mut pages = 0u32;
    let mut items = 0usize;

    let termination = loop {
        let page = match fetch(offset).await {
            Ok(page) => page,
            Err(e) if pages == 0 => {
                return Err(IngestError::FirstPageFailed {
                    offset,
                    reason: format!("{:#}", e),
                });
            }
            Err(e) => {
                warn!(offset, pages, items, error = %format!("{:#}", e), "Page fetch failed, keeping already fetched pages");
                break Termination::PageFailed {
                    offset,
                    reason: format!("{:#}", e),
                };
            }
        };

        let Some(page) = page else {
            if pages == 0 {
                return Err(IngestError::FirstPageFailed {
                    offset,
                    reason: "response has no items key".to_string(),
                });
            }
            debug!(offset, pages, "Response has no items key, end of data");
            break Termination::MissingItemsKey;
        };

        let count = page.len();
        pages += 1;
        items += count;
        on_page(offset, page);

        offset = offset.saturating_add(count as u32);
        if count < page_size as usize {
            break Termination::ShortPage;
        }
    };

    Ok(PageWalk {
        pages,
        items,
        next_offset: offset,
        termination,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::collections::VecDeque;

    type Script = VecDeque<anyhow::Result<Option<Vec<u32>>>>;

    async fn run(
        start: u32,
        page_size: u32,
        script: Script,
    ) -> (Result<PageWalk, IngestError>, Vec<u32>, Vec<u32>) {
        let mut script = script;
        let mut requested = Vec::new();
        let mut seen = Vec::new();
        let walk = walk_pages(
            start,
            page_size,
            |offset| {
                requested.push(offset);
                let next = script.pop_front().unwrap_or_else(|| Err(anyhow!("exhausted")));
                async move { next }
            },
            |_, page| seen.extend(page),
        )
        .await;
        (walk, requested, seen)
    }

    #[tokio::test]
    async fn short_page_ends_the_walk() {
        let script = VecDeque::from(vec![Ok(Some(vec![1, 2])), Ok(Some(vec![3]))]);
        let (walk, requested, seen) = run(0, 2, script).await;
        let walk = walk.unwrap();

        assert_eq!(requested, vec![0, 2]);
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(walk.pages, 2);
        assert_eq!(walk.next_offset, 3);
        assert_eq!(walk.termination, Termination::ShortPage);
    }

    #[tokio::test]
    async fn missing_items_key_ends_the_walk() {
        let script = VecDeque::from(vec![Ok(Some(vec![1, 2])), Ok(None)]);
        let (walk, requested, _) = run(0, 2, script).await;
        let walk = walk.unwrap();

        assert_eq!(requested, vec![0, 2]);
        assert_eq!(walk.termination, Termination::MissingItemsKey);
        assert_eq!(walk.next_offset, 2);
    }

    #[tokio::test]
    async fn first_page_without_items_key_is_fatal() {
        let script = VecDeque::from(vec![Ok(None)]);
        let (walk, requested, seen) = run(0, 2, script).await;

        assert!(matches!(
            walk,
            Err(IngestError::FirstPageFailed { offset: 0, .. })
        ));
        assert_eq!(requested, vec![0]);
        assert!(seen.is_empty());
    }

    #[tokio::test]
    async fn first_page_failure_is_fatal() {
        let script = VecDeque::from(vec![Err(anyhow!("503 Service Unavailable"))]);
        let (walk, _, seen) = run(40, 2, script).await;

        match walk {
            Err(IngestError::FirstPageFailed { offset, reason }) => {
                assert_eq!(offset, 40);
                assert!(reason.contains("503"));
            }
            other => panic!("expected fatal error, got {:?}", other),
        }
        assert!(seen.is_empty());
    }

    #[tokio::test]
    async fn later_page_failure_keeps_earlier_pages() {
        let script = VecDeque::from(vec![
            Ok(Some(vec![1, 2])),
            Ok(Some(vec![3, 4])),
            Err(anyhow!("connection reset")),
        ]);
        let (walk, requested, seen) = run(0, 2, script).await;
        let walk = walk.unwrap();

        assert_eq!(requested, vec![0, 2, 4]);
        assert_eq!(seen, vec![1, 2, 3, 4]);
        assert!(walk.termination.is_partial());
        assert_eq!(walk.next_offset, 4);
    }

    #[tokio::test]
    async fn starts_from_a_resume_offset() {
        let script = VecDeque::from(vec![Ok(Some(vec![7]))]);
        let (walk, requested, _) = run(400, 200, script).await;
        assert_eq!(requested, vec![400]);
        assert_eq!(walk.unwrap().next_offset, 401);
    }
}
