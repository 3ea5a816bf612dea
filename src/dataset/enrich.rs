//! Join sales records with mosaic coordinates and derive the cleaned table.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::store::{quote_ident, ColumnInfo, DerivedColumn, SalesStore};
use super::PRIMARY_KEY;
use crate::error::EnrichmentMiss;
use crate::ingest::NormalizedRecord;
use crate::mosaic::{BoundingBox, CoordinateLookup};

/// Column added to the cleaned table; mirrors `asset_token_id` so clients can
/// crop a tile without knowing the sales schema.
pub const IMAGE_COLUMN: &str = "image";

const TOKEN_COLUMN: &str = "asset_token_id";

/// A sales record with its tile's bounding box, if the item was placed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    #[serde(flatten)]
    pub record: NormalizedRecord,
    pub x0: Option<u32>,
    pub x1: Option<u32>,
    pub y0: Option<u32>,
    pub y1: Option<u32>,
}

impl EnrichedRecord {
    pub fn bbox(&self) -> Option<BoundingBox> {
        Some(BoundingBox {
            x0: self.x0?,
            x1: self.x1?,
            y0: self.y0?,
            y1: self.y1?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnrichOutcome {
    pub records: Vec<EnrichedRecord>,
    pub misses: Vec<EnrichmentMiss>,
}

/// Left join on the item identifier. Every input record appears exactly once
/// in the output; records without a lookup entry get empty coordinates.
pub fn enrich(records: Vec<NormalizedRecord>, lookup: &CoordinateLookup) -> EnrichOutcome {
    let mut outcome = EnrichOutcome {
        records: Vec::with_capacity(records.len()),
        misses: Vec::new(),
    };

    for record in records {
        let bbox = lookup.get(record.asset_token_id).copied();
        if bbox.is_none() {
            let miss = EnrichmentMiss {
                transaction_hash: record.transaction_hash.clone(),
                item_id: record.asset_token_id,
            };
            warn!("{}", miss);
            outcome.misses.push(miss);
        }
        outcome.records.push(EnrichedRecord {
            x0: bbox.map(|b| b.x0),
            x1: bbox.map(|b| b.x1),
            y0: bbox.map(|b| b.y0),
            y1: bbox.map(|b| b.y1),
            record,
        });
    }

    info!(
        records = outcome.records.len(),
        misses = outcome.misses.len(),
        "Joined sales with coordinates"
    );
    outcome
}

/// Rebuild `target` from `source` without the `excluded` columns, adding
/// [`IMAGE_COLUMN`]. Running it again over its own output yields the same
/// table. Returns the retained column names.
pub fn drop_deprecated_columns(
    store: &SalesStore,
    source: &str,
    target: &str,
    excluded: &[String],
) -> Result<Vec<String>> {
    if excluded.iter().any(|c| c == PRIMARY_KEY) {
        return Err(anyhow!("cannot drop primary key column {}", PRIMARY_KEY));
    }

    let available = store.table_columns(source)?;
    if available.is_empty() {
        return Err(anyhow!("table {} does not exist", source));
    }

    // `image` is computed from the token id while it is present and carried
    // over unchanged once it has been projected away.
    let image_expr = if available.iter().any(|c| c.name == TOKEN_COLUMN) {
        quote_ident(TOKEN_COLUMN)
    } else if available.iter().any(|c| c.name == IMAGE_COLUMN) {
        quote_ident(IMAGE_COLUMN)
    } else {
        return Err(anyhow!(
            "table {} has neither {} nor {}",
            source,
            TOKEN_COLUMN,
            IMAGE_COLUMN
        ));
    };

    let retained: Vec<ColumnInfo> = available
        .into_iter()
        .filter(|c| c.name != IMAGE_COLUMN && !excluded.contains(&c.name))
        .collect();

    let image = DerivedColumn {
        name: IMAGE_COLUMN.to_string(),
        decl_type: "INTEGER".to_string(),
        expr: image_expr,
    };
    store.rebuild_projection(source, target, PRIMARY_KEY, &retained, &[image])?;

    let mut names: Vec<String> = retained.into_iter().map(|c| c.name).collect();
    names.push(IMAGE_COLUMN.to_string());
    info!(source, target, columns = names.len(), "Derived cleaned table");
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CanvasSpec;
    use crate::ingest::normalize::{fixtures::sale_event, normalize};
    use crate::mosaic::pack;

    fn records(ids: &[u64]) -> Vec<NormalizedRecord> {
        ids.iter()
            .map(|id| normalize(&sale_event(*id, &format!("0x{:04x}", id))).unwrap())
            .collect()
    }

    fn excluded() -> Vec<String> {
        vec!["seller_username".to_string(), "buyer_username".to_string()]
    }

    #[test]
    fn join_preserves_every_record() {
        let canvas = CanvasSpec::new(100, 50, 50).unwrap();
        let lookup = pack([1u64, 2], canvas).unwrap().lookup;

        let outcome = enrich(records(&[1, 2, 3, 1]), &lookup);
        assert_eq!(outcome.records.len(), 4);

        assert_eq!(outcome.records[0].bbox(), lookup.get(1).copied());
        assert_eq!(outcome.records[1].bbox(), Some(BoundingBox::from([50, 100, 0, 50])));
        assert_eq!(outcome.records[3].bbox(), outcome.records[0].bbox());

        assert_eq!(outcome.records[2].bbox(), None);
        assert_eq!(outcome.records[2].x0, None);
        assert_eq!(outcome.misses.len(), 1);
        assert_eq!(outcome.misses[0].item_id, 3);
    }

    #[test]
    fn enriched_record_serializes_flat() {
        let outcome = enrich(records(&[7]), &CoordinateLookup::new());
        let json = serde_json::to_value(&outcome.records[0]).unwrap();
        assert_eq!(json["asset_token_id"], 7);
        assert!(json["x0"].is_null());
    }

    #[test]
    fn cleaned_table_drops_columns_and_adds_image() {
        let store = SalesStore::in_memory().unwrap();
        store.insert_sales(&records(&[5, 9])).unwrap();

        let columns =
            drop_deprecated_columns(&store, crate::dataset::SALES_TABLE, "sales_cleaned", &excluded())
                .unwrap();
        assert!(!columns.iter().any(|c| c == "seller_username"));
        assert!(!columns.iter().any(|c| c == "buyer_username"));
        assert!(columns.iter().any(|c| c == PRIMARY_KEY));
        assert_eq!(columns.last().map(String::as_str), Some(IMAGE_COLUMN));

        let snapshot = store.snapshot("sales_cleaned").unwrap();
        assert_eq!(snapshot.columns, columns);
        let token = columns.iter().position(|c| c == "asset_token_id").unwrap();
        let image = columns.iter().position(|c| c == IMAGE_COLUMN).unwrap();
        for row in &snapshot.rows {
            assert_eq!(row[token], row[image]);
        }
    }

    #[test]
    fn dropping_columns_twice_changes_nothing() {
        let store = SalesStore::in_memory().unwrap();
        store.insert_sales(&records(&[5, 9, 12])).unwrap();
        drop_deprecated_columns(&store, "sales", "sales_cleaned", &excluded()).unwrap();
        let first = store.snapshot("sales_cleaned").unwrap();

        drop_deprecated_columns(&store, "sales_cleaned", "sales_cleaned", &excluded()).unwrap();
        let second = store.snapshot("sales_cleaned").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn dropping_the_token_column_twice_keeps_the_image_column() {
        let store = SalesStore::in_memory().unwrap();
        store.insert_sales(&records(&[5, 9])).unwrap();
        let excluded = vec!["asset_token_id".to_string()];

        let columns = drop_deprecated_columns(&store, "sales", "sales_cleaned", &excluded).unwrap();
        assert!(!columns.iter().any(|c| c == "asset_token_id"));
        let first = store.snapshot("sales_cleaned").unwrap();
        let image = first.columns.iter().position(|c| c == IMAGE_COLUMN).unwrap();
        assert_eq!(first.rows[0][image], rusqlite::types::Value::Integer(5));
        assert_eq!(first.rows[1][image], rusqlite::types::Value::Integer(9));

        let again =
            drop_deprecated_columns(&store, "sales_cleaned", "sales_cleaned", &excluded).unwrap();
        assert_eq!(again, columns);
        assert_eq!(store.snapshot("sales_cleaned").unwrap(), first);
    }

    #[test]
    fn primary_key_cannot_be_dropped() {
        let store = SalesStore::in_memory().unwrap();
        let err = drop_deprecated_columns(
            &store,
            "sales",
            "sales_cleaned",
            &[PRIMARY_KEY.to_string()],
        );
        assert!(err.is_err());
        assert!(store.table_columns("sales_cleaned").unwrap().is_empty());
    }

    #[test]
    fn enriched_table_carries_coordinates() {
        let store = SalesStore::in_memory().unwrap();
        let canvas = CanvasSpec::new(100, 50, 50).unwrap();
        let lookup = pack([5u64], canvas).unwrap().lookup;
        let outcome = enrich(records(&[5, 9]), &lookup);
        store.write_enriched("sales_enriched", &outcome.records).unwrap();

        let snapshot = store.snapshot("sales_enriched").unwrap();
        let x1 = snapshot.columns.iter().position(|c| c == "x1").unwrap();
        assert_eq!(snapshot.rows.len(), 2);
        assert_eq!(snapshot.rows[0][x1], rusqlite::types::Value::Integer(50));
        assert_eq!(snapshot.rows[1][x1], rusqlite::types::Value::Null);
    }
}
