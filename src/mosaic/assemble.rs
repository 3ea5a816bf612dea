//! Mosaic assembly.
//!
//! Walks the ordered thumbnails, packs each identifier into the next free
//! cell and pastes its resized image there. An image that cannot be opened
//! is logged and skipped without consuming a cell.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ColorType, Rgb, RgbImage};
use std::collections::HashSet;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::lookup::{BoundingBox, CoordinateLookup};
use super::pack::{GridPacker, Placement};
use super::thumbnails::ThumbnailEntry;
use crate::config::CanvasSpec;
use crate::error::PackingError;

/// Image capability the assembler composites through.
pub trait ImageCompositor {
    type Tile;

    /// Open an image and resize it to a `size` x `size` tile.
    fn load_tile(&self, path: &Path, size: u32) -> Result<Self::Tile>;

    /// Paste a tile with its top-left corner at `(x, y)`.
    fn paste(&mut self, tile: &Self::Tile, x: u32, y: u32);

    fn save(&self, path: &Path) -> Result<()>;
}

/// RGB canvas on a white background.
pub struct RgbCompositor {
    canvas: RgbImage,
}

impl RgbCompositor {
    pub fn new(spec: CanvasSpec) -> Self {
        Self {
            canvas: RgbImage::from_pixel(spec.width, spec.height, Rgb([255, 255, 255])),
        }
    }

    pub fn image(&self) -> &RgbImage {
        &self.canvas
    }
}

impl ImageCompositor for RgbCompositor {
    type Tile = RgbImage;

    fn load_tile(&self, path: &Path, size: u32) -> Result<RgbImage> {
        let img = image::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        Ok(img.resize_exact(size, size, FilterType::CatmullRom).to_rgb8())
    }

    fn paste(&mut self, tile: &RgbImage, x: u32, y: u32) {
        imageops::replace(&mut self.canvas, tile, i64::from(x), i64::from(y));
    }

    fn save(&self, path: &Path) -> Result<()> {
        let is_jpeg = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"))
            .unwrap_or(false);

        if !is_jpeg {
            return self
                .canvas
                .save(path)
                .with_context(|| format!("Failed to save {}", path.display()));
        }

        let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        let mut encoder = JpegEncoder::new_with_quality(&mut writer, 100);
        encoder
            .encode(
                self.canvas.as_raw(),
                self.canvas.width(),
                self.canvas.height(),
                ColorType::Rgb8,
            )
            .with_context(|| format!("Failed to encode {}", path.display()))?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MosaicOutcome {
    pub lookup: CoordinateLookup,
    /// Identifiers that did not fit on the canvas.
    pub unplaced: Vec<u64>,
    /// Files skipped because they were unreadable or not named by an identifier.
    pub failed: Vec<(PathBuf, String)>,
}

impl MosaicOutcome {
    pub fn is_exhausted(&self) -> bool {
        !self.unplaced.is_empty()
    }
}

/// Composite `entries` (already in packing order) onto `compositor`.
pub fn assemble<C: ImageCompositor>(
    entries: &[ThumbnailEntry],
    canvas: CanvasSpec,
    compositor: &mut C,
) -> Result<MosaicOutcome, PackingError> {
    let mut packer = GridPacker::new(canvas);
    let mut unplaced = Vec::new();
    let mut overflow = HashSet::new();
    let mut failed = Vec::new();

    for entry in entries {
        let Some(item_id) = entry.item_id else {
            warn!(path = %entry.path.display(), "Thumbnail name is not an item identifier, skipping");
            failed.push((entry.path.clone(), "not an item identifier".to_string()));
            continue;
        };

        packer.check_unique(item_id)?;

        if packer.is_exhausted() {
            // Identifiers past capacity still share the key space.
            if !overflow.insert(item_id) {
                return Err(PackingError::Collision { item_id });
            }
            unplaced.push(item_id);
            continue;
        }

        let tile = match compositor.load_tile(&entry.path, canvas.cell_size) {
            Ok(tile) => tile,
            Err(e) => {
                warn!(item_id, path = %entry.path.display(), error = %format!("{:#}", e), "Failed at image");
                failed.push((entry.path.clone(), format!("{:#}", e)));
                continue;
            }
        };

        match packer.place(item_id)? {
            Placement::Placed(bbox) => {
                debug!(item_id, x = bbox.x0, y = bbox.y0, "pasted");
                compositor.paste(&tile, bbox.x0, bbox.y0);
            }
            Placement::Exhausted => unplaced.push(item_id),
        }
    }

    let lookup = packer.into_lookup();
    if !unplaced.is_empty() {
        warn!(
            placed = lookup.len(),
            unplaced = unplaced.len(),
            capacity = canvas.capacity(),
            "Running out of canvas space, remaining thumbnails left unplaced"
        );
    }
    info!(
        placed = lookup.len(),
        failed = failed.len(),
        unplaced = unplaced.len(),
        "Mosaic assembled"
    );

    Ok(MosaicOutcome {
        lookup,
        unplaced,
        failed,
    })
}

/// Crop one item's cell back out of a finished mosaic.
pub fn extract_tile(mosaic: &RgbImage, bbox: &BoundingBox) -> Result<RgbImage> {
    if bbox.x1 > mosaic.width() || bbox.y1 > mosaic.height() || bbox.width() == 0 || bbox.height() == 0 {
        return Err(anyhow!(
            "box {:?} is outside a {}x{} mosaic",
            <[u32; 4]>::from(*bbox),
            mosaic.width(),
            mosaic.height()
        ));
    }
    Ok(imageops::crop_imm(mosaic, bbox.x0, bbox.y0, bbox.width(), bbox.height()).to_image())
}

pub fn open_mosaic(path: &Path) -> Result<RgbImage> {
    Ok(image::open(path)
        .with_context(|| format!("Failed to open mosaic {}", path.display()))?
        .to_rgb8())
}
