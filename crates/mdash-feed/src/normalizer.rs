//! Raw record normalization.
//!
//! Turns loosely-typed API records into canonical [`Position`] and
//! [`MarketOffer`] entities. No I/O, no shared state beyond counters.
//!
//! Scaling is explicit per field:
//!
//! | raw field             | decimals used                      | canonical field          |
//! |-----------------------|------------------------------------|--------------------------|
//! | `collateralAmount`    | collateral token (`token.decimals`) | `size_base`              |
//! | `openingPositionSize` | quote token (default native 18)    | `opening_notional_quote` |
//! | `initialMargin`       | quote token (default native 18)    | `collateral_quote`       |
//! | `closingPositionSize` | quote token (default native 18)    | realized PnL input       |
//! | offer limits          | quote token (default native 18)    | offer exposure limits    |

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, warn};
use uuid::Uuid;

use mdash_core::units::{parse_units, NATIVE_DECIMALS};
use mdash_core::{
    finance, AccountId, ChainId, MaintenanceMarginRate, MarketOffer, Position, PositionStatus,
    Price, Size, TokenInfo,
};

use crate::error::{FeedError, FeedResult};
use crate::raw::{RawAmount, RawOfferRecord, RawPositionRecord, RawQuoteToken};

/// Offer category reported for every margin offer.
pub const MARGIN_CATEGORY: &str = "margin";

/// Normalization counters.
#[derive(Debug, Default)]
pub struct NormalizeStats {
    accepted: AtomicU64,
    malformed: AtomicU64,
    domain: AtomicU64,
}

impl NormalizeStats {
    fn record(&self, result: &FeedResult<impl Sized>) {
        let counter = match result {
            Ok(_) => &self.accepted,
            Err(FeedError::DerivationDomain(_)) => &self.domain,
            Err(_) => &self.malformed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn malformed(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    pub fn domain(&self) -> u64 {
        self.domain.load(Ordering::Relaxed)
    }
}

/// A record that failed normalization and was left out of a batch.
#[derive(Debug)]
pub struct DroppedRecord {
    /// Position of the record in the fetched sequence.
    pub index: usize,
    pub error: FeedError,
}

/// Result of normalizing a fetched sequence.
#[derive(Debug)]
pub struct NormalizedBatch<T> {
    pub items: Vec<T>,
    pub dropped: Vec<DroppedRecord>,
}

impl<T> NormalizedBatch<T> {
    fn collect<R>(
        records: &[R],
        kind: &'static str,
        mut f: impl FnMut(&R) -> FeedResult<Option<T>>,
    ) -> Self {
        let mut items = Vec::with_capacity(records.len());
        let mut dropped = Vec::new();

        for (index, raw) in records.iter().enumerate() {
            match f(raw) {
                Ok(Some(item)) => items.push(item),
                Ok(None) => {}
                Err(error) => {
                    warn!(kind, index, error = %error, "Dropping record");
                    dropped.push(DroppedRecord { index, error });
                }
            }
        }

        Self { items, dropped }
    }
}

fn amount(field: &str, raw: Option<&RawAmount>, decimals: u32) -> FeedResult<Decimal> {
    let raw = raw.ok_or_else(|| FeedError::missing(field))?;
    parse_units(&raw.as_str(), decimals).map_err(|e| FeedError::invalid(field, e))
}

fn optional_amount(
    field: &str,
    raw: Option<&RawAmount>,
    decimals: u32,
) -> FeedResult<Option<Decimal>> {
    raw.map(|r| parse_units(&r.as_str(), decimals).map_err(|e| FeedError::invalid(field, e)))
        .transpose()
}

fn non_negative_price(field: &str, raw: &str) -> FeedResult<Price> {
    let price: Price = raw.parse().map_err(|e| FeedError::invalid(field, e))?;
    if price.is_negative() {
        return Err(FeedError::invalid(field, format!("negative price {price}")));
    }
    Ok(price)
}

fn overflow(what: &str) -> FeedError {
    FeedError::DerivationDomain(format!("{what} overflows"))
}

fn quote_symbol(quote: Option<&RawQuoteToken>, gas_symbol: &str) -> String {
    quote
        .and_then(RawQuoteToken::symbol)
        .unwrap_or(gas_symbol)
        .to_string()
}

fn quote_decimals(quote: Option<&RawQuoteToken>) -> u32 {
    quote
        .and_then(RawQuoteToken::decimals)
        .unwrap_or(NATIVE_DECIMALS)
}

// ============================================================================
// PositionNormalizer
// ============================================================================

/// Converts raw position records into canonical positions.
#[derive(Debug)]
pub struct PositionNormalizer {
    chain: ChainId,
    maintenance_margin_rate: MaintenanceMarginRate,
    /// Quote symbol used when the record's quote token has none.
    gas_symbol: String,
    stats: NormalizeStats,
}

impl PositionNormalizer {
    pub fn new(
        chain: ChainId,
        maintenance_margin_rate: MaintenanceMarginRate,
        gas_symbol: impl Into<String>,
    ) -> Self {
        Self {
            chain,
            maintenance_margin_rate,
            gas_symbol: gas_symbol.into(),
            stats: NormalizeStats::default(),
        }
    }

    pub fn stats(&self) -> &NormalizeStats {
        &self.stats
    }

    pub fn chain(&self) -> ChainId {
        self.chain
    }

    /// Normalize one record.
    ///
    /// `account` is the account the fetch was issued for; it stands in for
    /// the record's owner when `traderAddress` is absent. `observed_at`
    /// defaults `opened_at` when `createdAt` is absent.
    pub fn normalize(
        &self,
        raw: &RawPositionRecord,
        account: Option<&AccountId>,
        observed_at: DateTime<Utc>,
    ) -> FeedResult<Position> {
        let result = self.normalize_inner(raw, account, observed_at);
        self.stats.record(&result);
        result
    }

    /// Normalize a fetched sequence, dropping records that fail.
    pub fn normalize_batch(
        &self,
        records: &[RawPositionRecord],
        account: Option<&AccountId>,
        observed_at: DateTime<Utc>,
    ) -> NormalizedBatch<Position> {
        NormalizedBatch::collect(records, "position", |raw| {
            self.normalize(raw, account, observed_at).map(Some)
        })
    }

    fn normalize_inner(
        &self,
        raw: &RawPositionRecord,
        account: Option<&AccountId>,
        observed_at: DateTime<Utc>,
    ) -> FeedResult<Position> {
        let owner = match raw.trader_address.as_deref() {
            Some(addr) => {
                AccountId::parse(addr).map_err(|e| FeedError::invalid("traderAddress", e))?
            }
            None => account
                .cloned()
                .ok_or_else(|| FeedError::missing("traderAddress"))?,
        };

        let token = raw.token.as_ref().ok_or_else(|| FeedError::missing("token"))?;
        let collateral_decimals = token
            .decimals
            .ok_or_else(|| FeedError::missing("token.decimals"))?;
        let quote_decimals = quote_decimals(raw.quote_token.as_ref());

        let size_base = Size::new(amount(
            "collateralAmount",
            raw.collateral_amount.as_ref(),
            collateral_decimals,
        )?);
        let opening_notional = amount(
            "openingPositionSize",
            raw.opening_position_size.as_ref(),
            quote_decimals,
        )?;
        let initial_margin = amount("initialMargin", raw.initial_margin.as_ref(), quote_decimals)?;
        let closing_notional = optional_amount(
            "closingPositionSize",
            raw.closing_position_size.as_ref(),
            quote_decimals,
        )?;

        if size_base.is_zero() {
            return Err(FeedError::DerivationDomain(
                "collateral amount is zero, entry price undefined".to_string(),
            ));
        }
        if initial_margin.is_zero() {
            return Err(FeedError::DerivationDomain(
                "initial margin is zero, leverage undefined".to_string(),
            ));
        }

        let leverage = finance::leverage(opening_notional, initial_margin)
            .ok_or_else(|| overflow("leverage"))?;
        if leverage < Decimal::ONE {
            return Err(FeedError::DerivationDomain(format!(
                "leverage {leverage} below 1"
            )));
        }
        let entry_price = finance::entry_price(opening_notional, size_base)
            .ok_or_else(|| overflow("entry price"))?;
        let liquidation_price =
            finance::liquidation_price(entry_price, leverage, self.maintenance_margin_rate)
                .ok_or_else(|| overflow("liquidation price"))?;

        let status = PositionStatus::from_raw(raw.status.as_deref().unwrap_or_default());
        let realized_pnl = finance::realized_pnl(status, opening_notional, closing_notional)
            .ok_or_else(|| overflow("realized pnl"))?;
        let id = self.position_id(raw);

        let current_price = match raw
            .offers
            .first()
            .and_then(|o| o.price_vs_quote.as_deref())
        {
            Some(px) => non_negative_price("offers[0].priceVsQuote", px)?,
            None => {
                debug!(id = %id, "No offer price on record, using entry price");
                entry_price
            }
        };

        let opened_at = raw
            .created_at
            .as_ref()
            .and_then(|ts| ts.to_datetime())
            .unwrap_or(observed_at);

        let mut position = Position {
            id,
            loan_id: raw.loan_id,
            owner,
            chain: self.chain,
            collateral_symbol: token
                .symbol
                .clone()
                .unwrap_or_else(|| "UNKNOWN".to_string()),
            quote_symbol: quote_symbol(raw.quote_token.as_ref(), &self.gas_symbol),
            entry_price,
            current_price,
            size_base,
            leverage,
            collateral_quote: initial_margin,
            opening_notional_quote: opening_notional,
            pnl: Decimal::ZERO,
            pnl_percentage: Decimal::ZERO,
            liquidation_price,
            realized_pnl,
            opened_at,
            status,
        };
        position
            .refresh_pnl(current_price)
            .map_err(|e| FeedError::DerivationDomain(e.to_string()))?;

        Ok(position)
    }

    /// Address, then public key, then a synthesized id.
    fn position_id(&self, raw: &RawPositionRecord) -> String {
        let non_empty = |s: &Option<String>| s.as_ref().filter(|v| !v.trim().is_empty()).cloned();

        if let Some(id) = non_empty(&raw.address).or_else(|| non_empty(&raw.public_key)) {
            return id;
        }

        // Non-deterministic: a record without either key gets a new id every cycle.
        let id = format!(
            "pos-{}-{}",
            Utc::now().timestamp_millis(),
            Uuid::new_v4().simple()
        );
        warn!(id = %id, loan_id = ?raw.loan_id, "Position record has no address or public key");
        id
    }
}

// ============================================================================
// OfferNormalizer
// ============================================================================

/// Converts raw offer records into market offers.
#[derive(Debug)]
pub struct OfferNormalizer {
    gas_symbol: String,
    stats: NormalizeStats,
}

impl OfferNormalizer {
    pub fn new(gas_symbol: impl Into<String>) -> Self {
        Self {
            gas_symbol: gas_symbol.into(),
            stats: NormalizeStats::default(),
        }
    }

    pub fn stats(&self) -> &NormalizeStats {
        &self.stats
    }

    pub fn normalize(&self, raw: &RawOfferRecord) -> FeedResult<MarketOffer> {
        let result = self.normalize_inner(raw);
        self.stats.record(&result);
        result
    }

    /// Normalize a fetched sequence. Inactive offers are skipped; failing
    /// records are dropped.
    pub fn normalize_batch(&self, records: &[RawOfferRecord]) -> NormalizedBatch<MarketOffer> {
        NormalizedBatch::collect(records, "offer", |raw| {
            if !raw.active {
                return Ok(None);
            }
            self.normalize(raw).map(Some)
        })
    }

    fn normalize_inner(&self, raw: &RawOfferRecord) -> FeedResult<MarketOffer> {
        let id = raw
            .public_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| FeedError::missing("publicKey"))?;
        let price = non_negative_price(
            "priceVsQuote",
            raw.price_vs_quote
                .as_deref()
                .ok_or_else(|| FeedError::missing("priceVsQuote"))?,
        )?;

        let quote = raw.quote_token.as_ref();
        let quote_symbol = quote_symbol(quote, &self.gas_symbol);
        let decimals = quote_decimals(quote);

        let collateral = raw.collateral_token.as_ref();
        let collateral_symbol = collateral.and_then(|t| t.symbol.as_deref());
        let name = collateral
            .and_then(|t| t.name.clone())
            .unwrap_or_else(|| "Unknown Margin".to_string());

        let volume_24h = collateral
            .and_then(|t| t.volume_24h.as_deref())
            .and_then(|v| v.trim().parse::<Decimal>().ok())
            .unwrap_or(Decimal::ZERO);

        let collateral_token = collateral.and_then(|t| {
            Some(TokenInfo {
                address: t.address.clone(),
                symbol: t.symbol.clone()?,
                name: t.name.clone(),
                decimals: t.decimals?,
            })
        });

        Ok(MarketOffer {
            symbol: MarketOffer::symbol_for(collateral_symbol, &quote_symbol),
            id,
            name,
            price,
            change_24h: collateral
                .and_then(|t| t.change_24h)
                .unwrap_or(Decimal::ZERO),
            volume_24h,
            category: MARGIN_CATEGORY.to_string(),
            max_leverage: raw.max_leverage.unwrap_or(Decimal::ONE),
            apr: raw.apr.unwrap_or(Decimal::ZERO),
            available_for_open: optional_amount(
                "availableForOpen",
                raw.available_for_open.as_ref(),
                decimals,
            )?
            .unwrap_or(Decimal::ZERO),
            max_borrow: optional_amount("maxBorrow", raw.max_borrow.as_ref(), decimals)?,
            max_open_per_trade: optional_amount(
                "maxOpenPerTrade",
                raw.max_open_per_trade.as_ref(),
                decimals,
            )?,
            max_exposure: optional_amount("maxExposure", raw.max_exposure.as_ref(), decimals)?,
            current_exposure: optional_amount(
                "currentExposure",
                raw.current_exposure.as_ref(),
                decimals,
            )?,
            collateral_token,
            quote_symbol,
            is_active: raw.active,
            is_favorite: false,
        })
    }
}
