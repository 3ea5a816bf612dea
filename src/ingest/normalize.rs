//! Sale event normalization.
//!
//! Turns one raw `/events` item into a flat record with a fixed field set.
//! Optional upstream fields become `None`; fields that feed arithmetic or the
//! record key are required, and their absence discards the record.

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SkipReason;
use crate::opensea::models::{RawAccount, RawEvent};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Column order of a normalized record, shared with the persisted table.
pub const RECORD_FIELDS: [&str; 19] = [
    "permalink",
    "event_datetime",
    "asset_id",
    "asset_token_id",
    "asset_num_sales",
    "asset_name",
    "asset_image_url",
    "payment_token_symbol",
    "payment_token_eth_price",
    "payment_token_usd_price",
    "price",
    "seller_address",
    "seller_username",
    "seller_img_url",
    "buyer_address",
    "buyer_username",
    "buyer_img_url",
    "transaction_timestamp",
    "transaction_hash",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub permalink: Option<String>,
    pub event_datetime: Option<NaiveDateTime>,
    pub asset_id: Option<i64>,
    pub asset_token_id: u64,
    pub asset_num_sales: Option<i64>,
    pub asset_name: Option<String>,
    pub asset_image_url: Option<String>,
    pub payment_token_symbol: Option<String>,
    pub payment_token_eth_price: f64,
    pub payment_token_usd_price: f64,
    /// `total_price / 10^decimals`
    pub price: f64,
    pub seller_address: Option<String>,
    pub seller_username: Option<String>,
    pub seller_img_url: Option<String>,
    pub buyer_address: Option<String>,
    pub buyer_username: Option<String>,
    pub buyer_img_url: Option<String>,
    pub transaction_timestamp: Option<NaiveDateTime>,
    /// Natural key of the dataset.
    pub transaction_hash: String,
}

/// Normalize one raw event.
pub fn normalize(raw: &Value) -> Result<NormalizedRecord, SkipReason> {
    if raw.is_null() {
        return Err(SkipReason::MissingAsset);
    }

    let event: RawEvent =
        serde_json::from_value(raw.clone()).map_err(|e| SkipReason::Malformed(e.to_string()))?;

    let asset = event.asset.ok_or(SkipReason::MissingAsset)?;

    let token_id = asset
        .token_id
        .as_deref()
        .ok_or(SkipReason::MissingField("asset.token_id"))?;
    let asset_token_id = parse_u64("asset.token_id", token_id)?;

    let payment_token = event
        .payment_token
        .ok_or(SkipReason::MissingField("payment_token"))?;
    let decimals = payment_token
        .decimals
        .as_deref()
        .ok_or(SkipReason::MissingField("payment_token.decimals"))?;
    let decimals = decimals
        .trim()
        .parse::<u32>()
        .map_err(|_| SkipReason::InvalidNumber {
            field: "payment_token.decimals",
            value: decimals.to_string(),
        })?;
    let payment_token_eth_price = required_f64("payment_token.eth_price", &payment_token.eth_price)?;
    let payment_token_usd_price = required_f64("payment_token.usd_price", &payment_token.usd_price)?;

    let total_price_raw = event
        .total_price
        .as_deref()
        .ok_or(SkipReason::MissingField("total_price"))?;
    let total_price = parse_f64("total_price", total_price_raw)?;
    let price = scale_price(total_price, decimals).ok_or_else(|| SkipReason::InvalidPrice {
        total_price: total_price_raw.to_string(),
        decimals,
    })?;

    let transaction = event
        .transaction
        .ok_or(SkipReason::MissingField("transaction"))?;
    let transaction_hash = transaction
        .transaction_hash
        .filter(|h| !h.trim().is_empty())
        .ok_or(SkipReason::MissingField("transaction.transaction_hash"))?;
    let transaction_timestamp =
        optional_timestamp("transaction.timestamp", transaction.timestamp.as_deref())?;
    let event_datetime = optional_timestamp("created_date", event.created_date.as_deref())?;

    let (seller_address, seller_username, seller_img_url) = account_fields(event.seller);
    let (buyer_address, buyer_username, buyer_img_url) = account_fields(event.winner_account);

    Ok(NormalizedRecord {
        permalink: asset.permalink,
        event_datetime,
        asset_id: lenient_i64(asset.id.as_deref()),
        asset_token_id,
        asset_num_sales: lenient_i64(asset.num_sales.as_deref()),
        asset_name: asset.name,
        asset_image_url: asset.image_url,
        payment_token_symbol: payment_token.symbol,
        payment_token_eth_price,
        payment_token_usd_price,
        price,
        seller_address,
        seller_username,
        seller_img_url,
        buyer_address,
        buyer_username,
        buyer_img_url,
        transaction_timestamp,
        transaction_hash,
    })
}

/// Parse an upstream timestamp. Naive ISO-8601 is the usual shape; RFC 3339
/// with an offset is accepted and converted to UTC.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.naive_utc())
        })
}

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn scale_price(total_price: f64, decimals: u32) -> Option<f64> {
    let divisor = 10f64.powi(i32::try_from(decimals).ok()?);
    if !divisor.is_finite() || divisor == 0.0 {
        return None;
    }
    let price = total_price / divisor;
    price.is_finite().then_some(price)
}

fn account_fields(account: Option<RawAccount>) -> (Option<String>, Option<String>, Option<String>) {
    match account {
        Some(a) => (
            a.address,
            a.user.and_then(|u| u.username),
            a.profile_img_url,
        ),
        None => (None, None, None),
    }
}

/// Identifiers are stored as SQLite integers, so they must fit in an `i64`.
fn parse_u64(field: &'static str, value: &str) -> Result<u64, SkipReason> {
    match value.trim().parse::<u64>() {
        Ok(v) if i64::try_from(v).is_ok() => Ok(v),
        _ => Err(SkipReason::InvalidNumber {
            field,
            value: value.to_string(),
        }),
    }
}

fn parse_f64(field: &'static str, value: &str) -> Result<f64, SkipReason> {
    match value.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(SkipReason::InvalidNumber {
            field,
            value: value.to_string(),
        }),
    }
}

fn required_f64(field: &'static str, value: &Option<String>) -> Result<f64, SkipReason> {
    let value = value.as_deref().ok_or(SkipReason::MissingField(field))?;
    parse_f64(field, value)
}

fn lenient_i64(value: Option<&str>) -> Option<i64> {
    value.and_then(|v| v.trim().parse::<i64>().ok())
}

fn optional_timestamp(
    field: &'static str,
    value: Option<&str>,
) -> Result<Option<NaiveDateTime>, SkipReason> {
    match value {
        None => Ok(None),
        Some(s) => parse_timestamp(s)
            .map(Some)
            .ok_or_else(|| SkipReason::InvalidTimestamp {
                field,
                value: s.to_string(),
            }),
    }
}
