//! Raw record types as returned by the trading API.
//!
//! Every field is optional at this layer; which ones are required is
//! decided by the normalizer. Amounts arrive as smallest-unit integers,
//! sometimes quoted, sometimes bare JSON numbers.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Smallest-unit integer amount, string or number on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RawAmount {
    Text(String),
    Integer(u64),
}

impl RawAmount {
    pub fn as_str(&self) -> Cow<'_, str> {
        match self {
            Self::Text(s) => Cow::Borrowed(s.as_str()),
            Self::Integer(n) => Cow::Owned(n.to_string()),
        }
    }
}

impl From<&str> for RawAmount {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// Token metadata block.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawToken {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub decimals: Option<u32>,
    #[serde(rename = "change24h", default)]
    pub change_24h: Option<Decimal>,
    #[serde(rename = "volume24h", default)]
    pub volume_24h: Option<String>,
}

/// Quote token: a full token object, or a bare address string.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RawQuoteToken {
    Token(RawToken),
    Address(String),
}

impl RawQuoteToken {
    pub fn symbol(&self) -> Option<&str> {
        match self {
            Self::Token(t) => t.symbol.as_deref(),
            Self::Address(_) => None,
        }
    }

    pub fn decimals(&self) -> Option<u32> {
        match self {
            Self::Token(t) => t.decimals,
            Self::Address(_) => None,
        }
    }
}

/// Creation time: RFC 3339 text or Unix milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Millis(i64),
    Text(String),
}

impl RawTimestamp {
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Millis(ms) => Utc.timestamp_millis_opt(*ms).single(),
            Self::Text(s) => DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

/// Offer reference embedded in a position record.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPositionOffer {
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub price_vs_quote: Option<String>,
}

/// Raw position record from `GET /positions/evm`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPositionRecord {
    /// On-chain position address.
    #[serde(default)]
    pub address: Option<String>,
    /// API-assigned key.
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub loan_id: Option<u64>,
    #[serde(default)]
    pub trader_address: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    /// Base amount, collateral token smallest units.
    #[serde(default)]
    pub collateral_amount: Option<RawAmount>,
    /// Collateral token.
    #[serde(default)]
    pub token: Option<RawToken>,
    #[serde(default)]
    pub quote_token: Option<RawQuoteToken>,
    /// Opening notional, quote smallest units.
    #[serde(default)]
    pub opening_position_size: Option<RawAmount>,
    /// Initial margin, quote smallest units.
    #[serde(default)]
    pub initial_margin: Option<RawAmount>,
    /// Closing notional, quote smallest units.
    #[serde(default)]
    pub closing_position_size: Option<RawAmount>,
    #[serde(default)]
    pub offers: Vec<RawPositionOffer>,
    #[serde(default)]
    pub created_at: Option<RawTimestamp>,
}

/// Raw offer record from `GET /offers/bsc`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOfferRecord {
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub apr: Option<Decimal>,
    #[serde(default)]
    pub max_borrow: Option<RawAmount>,
    #[serde(default)]
    pub node_wallet: Option<String>,
    #[serde(default)]
    pub max_exposure: Option<RawAmount>,
    #[serde(default)]
    pub current_exposure: Option<RawAmount>,
    #[serde(default)]
    pub collateral_token: Option<RawToken>,
    #[serde(default)]
    pub quote_token: Option<RawQuoteToken>,
    #[serde(default)]
    pub max_leverage: Option<Decimal>,
    #[serde(default)]
    pub max_open_per_trade: Option<RawAmount>,
    #[serde(default)]
    pub available_for_open: Option<RawAmount>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub price_vs_quote: Option<String>,
}
