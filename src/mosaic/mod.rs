pub mod assemble;
pub mod lookup;
pub mod pack; // Deterministic raster packing -> coordinate lookup
pub mod thumbnails;

pub use assemble::{assemble, extract_tile, open_mosaic, ImageCompositor, MosaicOutcome, RgbCompositor};
pub use lookup::{BoundingBox, CoordinateLookup};
pub use pack::{pack, GridPacker, PackOutcome, Placement};
pub use thumbnails::{list_thumbnails, ThumbnailEntry};
