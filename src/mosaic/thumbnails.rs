//! Thumbnail files: download and deterministic ordering.
//!
//! Thumbnails live in one directory as `<item_id>.png`. Packing order is the
//! ascending numeric order of those names; PNG names that do not parse as an
//! identifier sort first and are skipped when packing.

use anyhow::{Context, Result};
use futures_util::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::opensea::ImageSource;

const THUMBNAIL_EXT: &str = ".png";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailEntry {
    pub path: PathBuf,
    /// `None` when the file stem is not a valid identifier.
    pub item_id: Option<u64>,
}

pub fn thumbnail_file_name(item_id: u64) -> String {
    format!("{}{}", item_id, THUMBNAIL_EXT)
}

pub fn thumbnail_url(image_url: &str, suffix: &str) -> String {
    format!("{}{}", image_url, suffix)
}

fn item_id_from_name(name: &str) -> Option<u64> {
    name.strip_suffix(THUMBNAIL_EXT)?.parse::<u64>().ok()
}

/// Sort key: identifier, with non-conforming names under a sentinel that
/// orders before every identifier.
fn sort_key(entry: &ThumbnailEntry) -> (i128, PathBuf) {
    let rank = entry.item_id.map(i128::from).unwrap_or(-1);
    (rank, entry.path.clone())
}

/// Order thumbnail file names for packing. Names without the PNG extension
/// are dropped.
pub fn order_thumbnails<I, S>(dir: &Path, names: I) -> Vec<ThumbnailEntry>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut entries: Vec<ThumbnailEntry> = names
        .into_iter()
        .filter(|name| name.as_ref().ends_with(THUMBNAIL_EXT))
        .map(|name| ThumbnailEntry {
            path: dir.join(name.as_ref()),
            item_id: item_id_from_name(name.as_ref()),
        })
        .collect();
    entries.sort_by_key(sort_key);
    entries
}

/// List the thumbnails of `dir` in packing order.
pub fn list_thumbnails(dir: &Path) -> Result<Vec<ThumbnailEntry>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    Ok(order_thumbnails(dir, names))
}

pub fn has_thumbnails(dir: &Path) -> bool {
    list_thumbnails(dir)
        .map(|entries| !entries.is_empty())
        .unwrap_or(false)
}

#[derive(Debug, Clone, Default)]
pub struct DownloadReport {
    pub saved: usize,
    pub failed: Vec<(u64, String)>,
}

/// Download every catalog image into `dir`, at most `concurrency` at a time.
/// A failed download is logged and skipped.
pub async fn download_thumbnails<S: ImageSource>(
    client: &S,
    images: &BTreeMap<u64, String>,
    dir: &Path,
    suffix: &str,
    concurrency: usize,
) -> Result<DownloadReport> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let results: Vec<(u64, Result<PathBuf>)> = stream::iter(images.iter())
        .map(|(&item_id, image_url)| {
            let url = thumbnail_url(image_url, suffix);
            let path = dir.join(thumbnail_file_name(item_id));
            async move {
                let result = async {
                    let bytes = client.download(&url).await?;
                    tokio::fs::write(&path, &bytes)
                        .await
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    Ok::<PathBuf, anyhow::Error>(path)
                }
                .await;
                (item_id, result)
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut report = DownloadReport::default();
    for (item_id, result) in results {
        match result {
            Ok(path) => {
                report.saved += 1;
                debug!(item_id, path = %path.display(), "saved");
            }
            Err(e) => {
                warn!(item_id, error = %format!("{:#}", e), "Thumbnail download failed");
                report.failed.push((item_id, format!("{:#}", e)));
            }
        }
    }
    report.failed.sort_by_key(|(id, _)| *id);

    info!(
        saved = report.saved,
        failed = report.failed.len(),
        dir = %dir.display(),
        "Thumbnail download finished"
    );
    Ok(report)
}
