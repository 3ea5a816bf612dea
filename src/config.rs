//! Pipeline Configuration
//!
//! One explicit structure passed into every job entry point. Defaults are the
//! constants the collection was originally built with; each field can be
//! overridden from the environment (`.env` is honoured).

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_CONTRACT_ADDRESS: &str = "0xbd3531da5cf5857e7cfaa92426877b022e612cf8";
pub const DEFAULT_BASE_URL: &str = "https://api.opensea.io/api/v1";

/// Fixed-size raster that thumbnails are packed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasSpec {
    pub width: u32,
    pub height: u32,
    pub cell_size: u32,
}

impl CanvasSpec {
    pub fn new(width: u32, height: u32, cell_size: u32) -> Result<Self> {
        let spec = Self {
            width,
            height,
            cell_size,
        };
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cell_size == 0 {
            return Err(anyhow!("cell size must be positive"));
        }
        if self.cell_size > self.width || self.cell_size > self.height {
            return Err(anyhow!(
                "cell size {} does not fit a {}x{} canvas",
                self.cell_size,
                self.width,
                self.height
            ));
        }
        Ok(())
    }

    pub fn columns(&self) -> u32 {
        self.width / self.cell_size
    }

    pub fn rows(&self) -> u32 {
        self.height / self.cell_size
    }

    /// Maximum number of cells that fit without leaving the canvas.
    pub fn capacity(&self) -> usize {
        self.columns() as usize * self.rows() as usize
    }
}

impl Default for CanvasSpec {
    fn default() -> Self {
        // 94 columns x 95 rows of 50px cells
        Self {
            width: 18_800 / 4,
            height: 19_000 / 4,
            cell_size: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub contract_address: String,
    pub base_url: String,
    /// Page size for the sale events listing.
    pub page_size: u32,
    /// Page size for the asset listing.
    pub asset_page_size: u32,
    /// Expected collection size, used only to warn about short catalogs.
    pub expected_assets: Option<usize>,
    pub canvas: CanvasSpec,
    /// Suffix appended to image URLs to request a downscaled rendition.
    pub thumbnail_suffix: String,
    pub download_concurrency: usize,
    pub request_timeout_secs: u64,
    pub database_path: PathBuf,
    pub thumbnail_dir: PathBuf,
    pub lookup_path: PathBuf,
    pub mosaic_dir: PathBuf,
    /// Columns dropped when deriving the cleaned sales table.
    pub deprecated_columns: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            contract_address: DEFAULT_CONTRACT_ADDRESS.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            page_size: 200,
            asset_page_size: 50,
            expected_assets: Some(8888),
            canvas: CanvasSpec::default(),
            thumbnail_suffix: "=s200".to_string(),
            download_concurrency: 8,
            request_timeout_secs: 30,
            database_path: PathBuf::from("static/sales.db"),
            thumbnail_dir: PathBuf::from("images"),
            lookup_path: PathBuf::from("images/lookup.json"),
            mosaic_dir: PathBuf::from("images"),
            deprecated_columns: vec!["seller_username".to_string(), "buyer_username".to_string()],
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let defaults = Self::default();

        let canvas = CanvasSpec::new(
            env_parse("SALES_MOSAIC_CANVAS_WIDTH", defaults.canvas.width)?,
            env_parse("SALES_MOSAIC_CANVAS_HEIGHT", defaults.canvas.height)?,
            env_parse("SALES_MOSAIC_CELL_SIZE", defaults.canvas.cell_size)?,
        )?;

        let expected_assets = match env::var("SALES_MOSAIC_EXPECTED_ASSETS") {
            Ok(v) if v.trim().is_empty() || v.trim() == "0" => None,
            Ok(v) => Some(
                v.trim()
                    .parse()
                    .with_context(|| format!("Invalid SALES_MOSAIC_EXPECTED_ASSETS: {}", v))?,
            ),
            Err(_) => defaults.expected_assets,
        };

        let deprecated_columns = env::var("SALES_MOSAIC_DEPRECATED_COLUMNS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or(defaults.deprecated_columns);

        let config = Self {
            contract_address: env_string("SALES_MOSAIC_CONTRACT", defaults.contract_address),
            base_url: env_string("SALES_MOSAIC_BASE_URL", defaults.base_url),
            page_size: env_parse("SALES_MOSAIC_PAGE_SIZE", defaults.page_size)?,
            asset_page_size: env_parse("SALES_MOSAIC_ASSET_PAGE_SIZE", defaults.asset_page_size)?,
            expected_assets,
            canvas,
            thumbnail_suffix: env_string("SALES_MOSAIC_THUMBNAIL_SUFFIX", defaults.thumbnail_suffix),
            download_concurrency: env_parse(
                "SALES_MOSAIC_DOWNLOAD_CONCURRENCY",
                defaults.download_concurrency,
            )?,
            request_timeout_secs: env_parse(
                "SALES_MOSAIC_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout_secs,
            )?,
            database_path: env_path("SALES_MOSAIC_DB_PATH", defaults.database_path),
            thumbnail_dir: env_path("SALES_MOSAIC_THUMBNAIL_DIR", defaults.thumbnail_dir),
            lookup_path: env_path("SALES_MOSAIC_LOOKUP_PATH", defaults.lookup_path),
            mosaic_dir: env_path("SALES_MOSAIC_MOSAIC_DIR", defaults.mosaic_dir),
            deprecated_columns,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 || self.asset_page_size == 0 {
            return Err(anyhow!("page sizes must be positive"));
        }
        if self.download_concurrency == 0 {
            return Err(anyhow!("download concurrency must be positive"));
        }
        if self
            .deprecated_columns
            .iter()
            .any(|c| c == crate::dataset::PRIMARY_KEY)
        {
            return Err(anyhow!(
                "{} is the primary key and cannot be deprecated",
                crate::dataset::PRIMARY_KEY
            ));
        }
        self.canvas.validate()
    }
}

fn env_string(key: &str, default: String) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(default)
}

fn env_path(key: &str, default: PathBuf) -> PathBuf {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or(default)
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("Invalid {}={}: {}", key, v, e)),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_canvas_holds_the_whole_collection() {
        let canvas = CanvasSpec::default();
        assert_eq!(canvas.columns(), 94);
        assert_eq!(canvas.rows(), 95);
        assert!(canvas.capacity() >= 8888);
    }

    #[test]
    fn capacity_floors_partial_cells() {
        let canvas = CanvasSpec::new(130, 70, 50).unwrap();
        assert_eq!(canvas.capacity(), 2);
    }

    #[test]
    fn rejects_cells_that_cannot_fit() {
        assert!(CanvasSpec::new(100, 50, 0).is_err());
        assert!(CanvasSpec::new(40, 100, 50).is_err());
        assert!(CanvasSpec::new(100, 40, 50).is_err());
    }

    #[test]
    fn primary_key_cannot_be_deprecated() {
        let config = PipelineConfig {
            deprecated_columns: vec!["transaction_hash".to_string()],
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
