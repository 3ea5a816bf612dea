//! Coordinate lookup: item identifier -> pixel box on the mosaic.
//!
//! Persisted as a JSON object keyed by the decimal identifier, each value a
//! `[x0, x1, y0, y1]` array. Boxes are half-open on the right and bottom.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[u32; 4]", into = "[u32; 4]")]
pub struct BoundingBox {
    pub x0: u32,
    pub x1: u32,
    pub y0: u32,
    pub y1: u32,
}

impl BoundingBox {
    pub fn cell(x: u32, y: u32, size: u32) -> Self {
        Self {
            x0: x,
            x1: x + size,
            y0: y,
            y1: y + size,
        }
    }

    pub fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }

    pub fn overlaps(&self, other: &BoundingBox) -> bool {
        self.x0 < other.x1 && other.x0 < self.x1 && self.y0 < other.y1 && other.y0 < self.y1
    }
}

impl From<[u32; 4]> for BoundingBox {
    fn from([x0, x1, y0, y1]: [u32; 4]) -> Self {
        Self { x0, x1, y0, y1 }
    }
}

impl From<BoundingBox> for [u32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x0, b.x1, b.y0, b.y1]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoordinateLookup {
    entries: BTreeMap<u64, BoundingBox>,
}

impl CoordinateLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, item_id: u64) -> Option<&BoundingBox> {
        self.entries.get(&item_id)
    }

    pub fn contains(&self, item_id: u64) -> bool {
        self.entries.contains_key(&item_id)
    }

    /// Insert a new entry. Returns `false` and leaves the lookup untouched if
    /// the identifier is already present.
    pub(crate) fn insert(&mut self, item_id: u64, bbox: BoundingBox) -> bool {
        match self.entries.entry(item_id) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(bbox);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &BoundingBox)> {
        self.entries.iter().map(|(id, bbox)| (*id, bbox))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize coordinate lookup")
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse coordinate lookup")
    }

    /// Write the lookup, replacing any previous file only once the new one is complete.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, self.to_json()?)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("Failed to move lookup into {}", path.display()))?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn serializes_as_string_keyed_arrays() {
        let mut lookup = CoordinateLookup::new();
        lookup.insert(10, BoundingBox::cell(50, 0, 50));
        lookup.insert(2, BoundingBox::cell(0, 0, 50));

        assert_eq!(
            lookup.to_json().unwrap(),
            r#"{"2":[0,50,0,50],"10":[50,100,0,50]}"#
        );
    }

    #[test]
    fn reads_files_written_by_other_tools() {
        let lookup = CoordinateLookup::from_json(r#"{"7": [100, 150, 50, 100], "1": [0, 50, 0, 50]}"#)
            .unwrap();
        assert_eq!(lookup.len(), 2);
        assert_eq!(
            lookup.get(7),
            Some(&BoundingBox {
                x0: 100,
                x1: 150,
                y0: 50,
                y1: 100
            })
        );
    }

    #[test]
    fn insert_refuses_to_overwrite() {
        let mut lookup = CoordinateLookup::new();
        assert!(lookup.insert(1, BoundingBox::cell(0, 0, 50)));
        assert!(!lookup.insert(1, BoundingBox::cell(50, 0, 50)));
        assert_eq!(lookup.get(1), Some(&BoundingBox::cell(0, 0, 50)));
    }

    #[test]
    fn save_then_load_from_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("lookup.json");
        let mut lookup = CoordinateLookup::new();
        lookup.insert(3, BoundingBox::cell(0, 50, 50));

        lookup.save(&path).unwrap();
        assert_eq!(CoordinateLookup::load(&path).unwrap(), lookup);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn adjacent_cells_do_not_overlap() {
        let a = BoundingBox::cell(0, 0, 50);
        let b = BoundingBox::cell(50, 0, 50);
        let c = BoundingBox::cell(25, 25, 50);
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(b.overlaps(&c));
    }
}
