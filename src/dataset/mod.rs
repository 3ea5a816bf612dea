pub mod enrich; // Coordinate join + column projection
pub mod store;

/// Key shared by every sales table.
pub const PRIMARY_KEY: &str = "transaction_hash";

pub use enrich::{drop_deprecated_columns, enrich, EnrichOutcome, EnrichedRecord, IMAGE_COLUMN};
pub use store::{ColumnInfo, DerivedColumn, InsertSummary, SalesStore, TableSnapshot, SALES_TABLE};
