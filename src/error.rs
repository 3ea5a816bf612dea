//! Pipeline error taxonomy.
//!
//! Per-item conditions (`SkipReason`, `EnrichmentMiss`) are recovered locally
//! and reported alongside the output. Per-run conditions (`IngestError`,
//! `PackingError`) are returned to the caller.

use std::fmt;

/// Why one raw event or asset was left out of the output.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// Event payload carries no `asset` object.
    MissingAsset,
    MissingField(&'static str),
    InvalidNumber {
        field: &'static str,
        value: String,
    },
    InvalidTimestamp {
        field: &'static str,
        value: String,
    },
    /// `total_price / 10^decimals` did not produce a finite number.
    InvalidPrice {
        total_price: String,
        decimals: u32,
    },
    DuplicateTransactionHash(String),
    /// The item could not be decoded at all.
    Malformed(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingAsset => write!(f, "no asset field"),
            Self::MissingField(field) => write!(f, "missing required field {}", field),
            Self::InvalidNumber { field, value } => {
                write!(f, "field {} is not numeric: {}", field, value)
            }
            Self::InvalidTimestamp { field, value } => {
                write!(f, "field {} is not a timestamp: {}", field, value)
            }
            Self::InvalidPrice {
                total_price,
                decimals,
            } => write!(
                f,
                "price {} with {} decimals is not representable",
                total_price, decimals
            ),
            Self::DuplicateTransactionHash(hash) => {
                write!(f, "duplicate transaction hash {}", hash)
            }
            Self::Malformed(e) => write!(f, "malformed payload: {}", e),
        }
    }
}

/// A discarded record and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRecord {
    /// Offset of the page the record arrived on.
    pub page_offset: u32,
    /// Position of the record inside its page.
    pub index: usize,
    pub reason: SkipReason,
}

impl fmt::Display for SkippedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "record {} of page at offset {}: {}",
            self.index, self.page_offset, self.reason
        )
    }
}

/// Ingestion could not produce any output.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestError {
    /// The first page of a run failed; no partial dataset is returned.
    FirstPageFailed { offset: u32, reason: String },
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FirstPageFailed { offset, reason } => {
                write!(f, "first page at offset {} failed: {}", offset, reason)
            }
        }
    }
}

impl std::error::Error for IngestError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackingError {
    /// The same identifier was offered twice; the lookup key space must be unique.
    Collision { item_id: u64 },
}

impl fmt::Display for PackingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Collision { item_id } => write!(f, "collision at item {}", item_id),
        }
    }
}

impl std::error::Error for PackingError {}

/// A record whose identifier has no coordinate entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentMiss {
    pub transaction_hash: String,
    pub item_id: u64,
}

impl fmt::Display for EnrichmentMiss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "no coordinates for item {} (transaction {})",
            self.item_id, self.transaction_hash
        )
    }
}
