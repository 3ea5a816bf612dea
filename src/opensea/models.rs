//! OpenSea listing payloads.
//!
//! Pages keep their items as raw JSON so that one undecodable item cannot
//! fail the whole page. Items are decoded individually into the lenient
//! `Raw*` structs below, where every field is optional.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One page of `GET /events`. A missing `asset_events` key means end of data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventsPage {
    #[serde(default)]
    pub asset_events: Option<Vec<Value>>,
}

/// One page of `GET /assets`. A missing `assets` key means end of data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetsPage {
    #[serde(default)]
    pub assets: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEvent {
    #[serde(default)]
    pub asset: Option<RawAsset>,
    #[serde(default)]
    pub created_date: Option<String>,
    #[serde(default, deserialize_with = "de_scalar_string")]
    pub total_price: Option<String>,
    #[serde(default)]
    pub payment_token: Option<RawPaymentToken>,
    #[serde(default)]
    pub seller: Option<RawAccount>,
    #[serde(default)]
    pub winner_account: Option<RawAccount>,
    #[serde(default)]
    pub transaction: Option<RawTransaction>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAsset {
    #[serde(default, deserialize_with = "de_scalar_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "de_scalar_string")]
    pub token_id: Option<String>,
    #[serde(default, deserialize_with = "de_scalar_string")]
    pub num_sales: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub permalink: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPaymentToken {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default, deserialize_with = "de_scalar_string")]
    pub decimals: Option<String>,
    #[serde(default, deserialize_with = "de_scalar_string")]
    pub eth_price: Option<String>,
    #[serde(default, deserialize_with = "de_scalar_string")]
    pub usd_price: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAccount {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub user: Option<RawUser>,
    #[serde(default)]
    pub profile_img_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawUser {
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTransaction {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub transaction_hash: Option<String>,
}

/// Numbers arrive either as JSON numbers or as decimal strings (prices can
/// exceed `u64`). Both are kept as text and parsed where they are used.
fn de_scalar_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    match v {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Ok(Some(other.to_string())),
    }
}
