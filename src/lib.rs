//! Sales Mosaic Library
//!
//! Collects secondary-market sales for one NFT collection, packs the
//! collection's thumbnails into a single mosaic image, and joins every sale
//! with the bounding box of its item's tile.

pub mod config;
pub mod dataset;
pub mod error;
pub mod ingest;
pub mod jobs;
pub mod mosaic;
pub mod opensea;

pub use config::{CanvasSpec, PipelineConfig};
pub use jobs::{MosaicJob, MosaicReport, SalesJob, SalesReport};
