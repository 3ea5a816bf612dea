//! SQLite-backed sales tables.
//!
//! `sales` holds normalized records keyed by transaction hash. Derived tables
//! (`sales_enriched`, `sales_cleaned`) are rebuilt from it on every run.
//! Ingestion checkpoints live alongside so an interrupted run can resume.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::enrich::EnrichedRecord;
use super::PRIMARY_KEY;
use crate::ingest::normalize::{format_timestamp, parse_timestamp, NormalizedRecord, RECORD_FIELDS};

pub const SALES_TABLE: &str = "sales";

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS sales (
    permalink TEXT,
    event_datetime TEXT,
    asset_id INTEGER,
    asset_token_id INTEGER NOT NULL,
    asset_num_sales INTEGER,
    asset_name TEXT,
    asset_image_url TEXT,
    payment_token_symbol TEXT,
    payment_token_eth_price REAL NOT NULL,
    payment_token_usd_price REAL NOT NULL,
    price REAL NOT NULL,
    seller_address TEXT,
    seller_username TEXT,
    seller_img_url TEXT,
    buyer_address TEXT,
    buyer_username TEXT,
    buyer_img_url TEXT,
    transaction_timestamp TEXT,
    transaction_hash TEXT PRIMARY KEY
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_sales_token ON sales(asset_token_id);

CREATE TABLE IF NOT EXISTS ingest_checkpoints (
    contract_address TEXT PRIMARY KEY,
    next_offset INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
) WITHOUT ROWID;
"#;

/// Column name and declared type, as reported by `PRAGMA table_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub decl_type: String,
}

/// A column computed from an SQL expression over the source table.
#[derive(Debug, Clone)]
pub struct DerivedColumn {
    pub name: String,
    pub decl_type: String,
    pub expr: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertSummary {
    pub inserted: usize,
    /// Hashes already present; the stored record was kept.
    pub rejected: Vec<String>,
}

/// Full contents of a table, rows ordered by primary key.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSnapshot {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub struct SalesStore {
    conn: Arc<Mutex<Connection>>,
}

impl SalesStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        Self::with_connection(conn)
    }

    /// In-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize sales schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert records; a hash that is already stored is rejected, not overwritten.
    pub fn insert_sales(&self, records: &[NormalizedRecord]) -> Result<InsertSummary> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut summary = InsertSummary::default();
        {
            let sql = format!(
                "INSERT OR IGNORE INTO {} ({}) VALUES ({})",
                SALES_TABLE,
                RECORD_FIELDS.join(", "),
                vec!["?"; RECORD_FIELDS.len()].join(", ")
            );
            let mut stmt = tx.prepare(&sql)?;
            for record in records {
                let changed = stmt.execute(params_from_iter(record_values(record)))?;
                if changed == 0 {
                    warn!(
                        transaction_hash = %record.transaction_hash,
                        item_id = record.asset_token_id,
                        "Transaction hash already stored, keeping existing record"
                    );
                    summary.rejected.push(record.transaction_hash.clone());
                } else {
                    summary.inserted += 1;
                }
            }
        }
        tx.commit()?;

        info!(
            inserted = summary.inserted,
            rejected = summary.rejected.len(),
            "Stored sales"
        );
        Ok(summary)
    }

    pub fn sales_count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM sales", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// All stored records, ordered by transaction hash.
    pub fn load_sales(&self) -> Result<Vec<NormalizedRecord>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM {} ORDER BY {}",
            RECORD_FIELDS.join(", "),
            SALES_TABLE,
            PRIMARY_KEY
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], record_from_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Replace `table` with the given enriched records.
    pub fn write_enriched(&self, table: &str, records: &[EnrichedRecord]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let name = quote_ident(table);

        let columns: Vec<String> = RECORD_FIELDS
            .iter()
            .map(|c| c.to_string())
            .chain(["x0", "x1", "y0", "y1"].iter().map(|c| c.to_string()))
            .collect();

        let mut defs: Vec<String> = table_columns(&tx, SALES_TABLE)?
            .into_iter()
            .map(|c| {
                let mut def = format!("{} {}", quote_ident(&c.name), c.decl_type);
                if c.name == PRIMARY_KEY {
                    def.push_str(" PRIMARY KEY");
                }
                def
            })
            .collect();
        defs.extend(["x0", "x1", "y0", "y1"].iter().map(|c| format!("{} INTEGER", c)));

        tx.execute(&format!("DROP TABLE IF EXISTS {}", name), [])?;
        tx.execute(
            &format!("CREATE TABLE {} ({}) WITHOUT ROWID", name, defs.join(", ")),
            [],
        )?;
        {
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                name,
                columns.join(", "),
                vec!["?"; columns.len()].join(", ")
            );
            let mut stmt = tx.prepare(&sql)?;
            for enriched in records {
                let mut values = record_values(&enriched.record).to_vec();
                for coord in [enriched.x0, enriched.x1, enriched.y0, enriched.y1] {
                    values.push(coord.map(|v| SqlValue::Integer(i64::from(v))).unwrap_or(SqlValue::Null));
                }
                stmt.execute(params_from_iter(values))?;
            }
        }
        tx.commit()?;

        debug!(table, rows = records.len(), "Wrote enriched table");
        Ok(())
    }

    pub fn table_columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let conn = self.conn.lock();
        table_columns(&conn, table)
    }

    /// Rebuild `target` as a projection of `source`: `columns` copied as-is
    /// plus `derived` columns, with `key` as primary key. `source` and
    /// `target` may be the same table.
    pub fn rebuild_projection(
        &self,
        source: &str,
        target: &str,
        key: &str,
        columns: &[ColumnInfo],
        derived: &[DerivedColumn],
    ) -> Result<()> {
        if !columns.iter().any(|c| c.name == key) {
            return Err(anyhow!("projection of {} must keep key column {}", source, key));
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        if table_columns(&tx, source)?.is_empty() {
            return Err(anyhow!("table {} does not exist", source));
        }

        let staging = quote_ident(&format!("{}__staging", target));
        let mut defs: Vec<String> = columns
            .iter()
            .map(|c| {
                let mut def = format!("{} {}", quote_ident(&c.name), c.decl_type);
                if c.name == key {
                    def.push_str(" PRIMARY KEY");
                }
                def
            })
            .collect();
        defs.extend(
            derived
                .iter()
                .map(|d| format!("{} {}", quote_ident(&d.name), d.decl_type)),
        );

        let insert_columns: Vec<String> = columns
            .iter()
            .map(|c| quote_ident(&c.name))
            .chain(derived.iter().map(|d| quote_ident(&d.name)))
            .collect();
        let select_exprs: Vec<String> = columns
            .iter()
            .map(|c| quote_ident(&c.name))
            .chain(derived.iter().map(|d| d.expr.clone()))
            .collect();

        tx.execute(&format!("DROP TABLE IF EXISTS {}", staging), [])?;
        tx.execute(
            &format!("CREATE TABLE {} ({}) WITHOUT ROWID", staging, defs.join(", ")),
            [],
        )?;
        tx.execute(
            &format!(
                "INSERT INTO {} ({}) SELECT {} FROM {}",
                staging,
                insert_columns.join(", "),
                select_exprs.join(", "),
                quote_ident(source)
            ),
            [],
        )?;
        tx.execute(&format!("DROP TABLE IF EXISTS {}", quote_ident(target)), [])?;
        tx.execute(
            &format!("ALTER TABLE {} RENAME TO {}", staging, quote_ident(target)),
            [],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn snapshot(&self, table: &str) -> Result<TableSnapshot> {
        let conn = self.conn.lock();
        let columns: Vec<String> = table_columns(&conn, table)?
            .into_iter()
            .map(|c| c.name)
            .collect();
        if columns.is_empty() {
            return Err(anyhow!("table {} does not exist", table));
        }

        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM {} ORDER BY {}",
            quote_ident(table),
            quote_ident(PRIMARY_KEY)
        ))?;
        let width = columns.len();
        let rows = stmt.query_map([], |row| {
            (0..width)
                .map(|i| row.get::<_, SqlValue>(i))
                .collect::<rusqlite::Result<Vec<_>>>()
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(TableSnapshot { columns, rows: out })
    }

    pub fn checkpoint(&self, contract_address: &str) -> Result<Option<u32>> {
        let conn = self.conn.lock();
        let offset: Option<i64> = conn
            .query_row(
                "SELECT next_offset FROM ingest_checkpoints WHERE contract_address = ?",
                [contract_address],
                |row| row.get(0),
            )
            .optional()?;
        Ok(offset.map(|o| o.clamp(0, i64::from(u32::MAX)) as u32))
    }

    pub fn save_checkpoint(&self, contract_address: &str, next_offset: u32) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO ingest_checkpoints (contract_address, next_offset, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(contract_address) DO UPDATE SET
                next_offset = excluded.next_offset,
                updated_at = excluded.updated_at
            "#,
            params![contract_address, next_offset, Utc::now().timestamp()],
        )?;
        Ok(())
    }
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let rows = stmt.query_map([], |row| {
        Ok(ColumnInfo {
            name: row.get(1)?,
            decl_type: row.get(2)?,
        })
    })?;
    let mut columns = Vec::new();
    for row in rows {
        columns.push(row?);
    }
    Ok(columns)
}

fn text(v: &Option<String>) -> SqlValue {
    v.clone().map(SqlValue::Text).unwrap_or(SqlValue::Null)
}

fn integer(v: Option<i64>) -> SqlValue {
    v.map(SqlValue::Integer).unwrap_or(SqlValue::Null)
}

fn timestamp(v: &Option<chrono::NaiveDateTime>) -> SqlValue {
    v.as_ref()
        .map(|t| SqlValue::Text(format_timestamp(t)))
        .unwrap_or(SqlValue::Null)
}

/// Values in `RECORD_FIELDS` order.
fn record_values(r: &NormalizedRecord) -> [SqlValue; 19] {
    [
        text(&r.permalink),
        timestamp(&r.event_datetime),
        integer(r.asset_id),
        SqlValue::Integer(r.asset_token_id as i64),
        integer(r.asset_num_sales),
        text(&r.asset_name),
        text(&r.asset_image_url),
        text(&r.payment_token_symbol),
        SqlValue::Real(r.payment_token_eth_price),
        SqlValue::Real(r.payment_token_usd_price),
        SqlValue::Real(r.price),
        text(&r.seller_address),
        text(&r.seller_username),
        text(&r.seller_img_url),
        text(&r.buyer_address),
        text(&r.buyer_username),
        text(&r.buyer_img_url),
        timestamp(&r.transaction_timestamp),
        SqlValue::Text(r.transaction_hash.clone()),
    ]
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<NormalizedRecord> {
    let ts = |i: usize| -> rusqlite::Result<Option<chrono::NaiveDateTime>> {
        Ok(row.get::<_, Option<String>>(i)?.and_then(|s| parse_timestamp(&s)))
    };
    Ok(NormalizedRecord {
        permalink: row.get(0)?,
        event_datetime: ts(1)?,
        asset_id: row.get(2)?,
        asset_token_id: row.get::<_, i64>(3)? as u64,
        asset_num_sales: row.get(4)?,
        asset_name: row.get(5)?,
        asset_image_url: row.get(6)?,
        payment_token_symbol: row.get(7)?,
        payment_token_eth_price: row.get(8)?,
        payment_token_usd_price: row.get(9)?,
        price: row.get(10)?,
        seller_address: row.get(11)?,
        seller_username: row.get(12)?,
        seller_img_url: row.get(13)?,
        buyer_address: row.get(14)?,
        buyer_username: row.get(15)?,
        buyer_img_url: row.get(16)?,
        transaction_timestamp: ts(17)?,
        transaction_hash: row.get(18)?,
    })
}
