//! Deterministic raster packing.
//!
//! Cells are assigned left to right, top to bottom, in the order identifiers
//! are offered. A row wraps when the next cell would cross the right edge and
//! packing is exhausted when the next row would cross the bottom edge, so at
//! most `floor(W/C) * floor(H/C)` items are ever placed.

use std::collections::HashSet;
use tracing::{debug, warn};

use super::lookup::{BoundingBox, CoordinateLookup};
use crate::config::CanvasSpec;
use crate::error::PackingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Placed(BoundingBox),
    /// No room left on the canvas; the item stays unplaced.
    Exhausted,
}

/// Incremental packer. Callers that may fail to produce an item's image
/// offer the identifier only once the image is in hand, so failed items
/// never consume a cell.
#[derive(Debug, Clone)]
pub struct GridPacker {
    canvas: CanvasSpec,
    x: u32,
    y: u32,
    lookup: CoordinateLookup,
}

impl GridPacker {
    pub fn new(canvas: CanvasSpec) -> Self {
        Self {
            canvas,
            x: 0,
            y: 0,
            lookup: CoordinateLookup::new(),
        }
    }

    pub fn canvas(&self) -> CanvasSpec {
        self.canvas
    }

    pub fn is_exhausted(&self) -> bool {
        let cell = self.canvas.cell_size;
        let next_y = if self.x + cell > self.canvas.width {
            self.y + cell
        } else {
            self.y
        };
        next_y + cell > self.canvas.height
    }

    /// Fail if `item_id` already holds a cell.
    pub fn check_unique(&self, item_id: u64) -> Result<(), PackingError> {
        if self.lookup.contains(item_id) {
            return Err(PackingError::Collision { item_id });
        }
        Ok(())
    }

    pub fn place(&mut self, item_id: u64) -> Result<Placement, PackingError> {
        let cell = self.canvas.cell_size;

        if self.x + cell > self.canvas.width {
            debug!(x = self.x, y = self.y, "Breaking to next line");
            self.x = 0;
            self.y += cell;
        }

        if self.y + cell > self.canvas.height {
            return Ok(Placement::Exhausted);
        }

        self.check_unique(item_id)?;

        let bbox = BoundingBox::cell(self.x, self.y, cell);
        self.lookup.insert(item_id, bbox);
        self.x += cell;
        Ok(Placement::Placed(bbox))
    }

    pub fn lookup(&self) -> &CoordinateLookup {
        &self.lookup
    }

    pub fn into_lookup(self) -> CoordinateLookup {
        self.lookup
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackOutcome {
    pub lookup: CoordinateLookup,
    /// Identifiers left over once the canvas was full, in offered order.
    pub unplaced: Vec<u64>,
}

impl PackOutcome {
    pub fn is_exhausted(&self) -> bool {
        !self.unplaced.is_empty()
    }
}

/// Pack `item_ids` in the given order.
pub fn pack<I>(item_ids: I, canvas: CanvasSpec) -> Result<PackOutcome, PackingError>
where
    I: IntoIterator<Item = u64>,
{
    let mut packer = GridPacker::new(canvas);
    let mut unplaced = Vec::new();
    let mut ids = item_ids.into_iter();

    for id in ids.by_ref() {
        if let Placement::Exhausted = packer.place(id)? {
            packer.check_unique(id)?;
            unplaced.push(id);
            break;
        }
    }
    // Identifiers past capacity still share the key space.
    let mut overflow: HashSet<u64> = unplaced.iter().copied().collect();
    for id in ids {
        packer.check_unique(id)?;
        if !overflow.insert(id) {
            return Err(PackingError::Collision { item_id: id });
        }
        unplaced.push(id);
    }

    if !unplaced.is_empty() {
        warn!(
            placed = packer.lookup().len(),
            unplaced = unplaced.len(),
            capacity = canvas.capacity(),
            "Running out of canvas space, remaining items left unplaced"
        );
    }

    Ok(PackOutcome {
        lookup: packer.into_lookup(),
        unplaced,
    })
}
