pub mod catalog; // Asset listing -> identifier/image URL catalog
pub mod normalize;
pub mod paginate;
pub mod pipeline;

pub use catalog::{fetch_asset_catalog, AssetCatalog};
pub use normalize::{normalize, NormalizedRecord, RECORD_FIELDS};
pub use paginate::{PageWalk, Termination};
pub use pipeline::{normalize_page, IngestOutcome, IngestionPipeline};
