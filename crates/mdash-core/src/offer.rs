//! Canonical market offer model.

use crate::decimal::Price;
use crate::types::TokenInfo;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Symbol used when an offer carries no collateral token.
pub const UNKNOWN_SYMBOL: &str = "UNKNOWN-PERP";

/// A lender offer available for opening leveraged positions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketOffer {
    /// Offer public key.
    pub id: String,
    /// `{collateral}-{quote}-PERP` or [`UNKNOWN_SYMBOL`].
    pub symbol: String,
    pub name: String,
    /// Collateral price in quote units.
    pub price: Price,
    pub change_24h: Decimal,
    pub volume_24h: Decimal,
    pub category: String,
    pub max_leverage: Decimal,
    pub apr: Decimal,
    pub available_for_open: Decimal,
    pub max_borrow: Option<Decimal>,
    pub max_open_per_trade: Option<Decimal>,
    pub max_exposure: Option<Decimal>,
    pub current_exposure: Option<Decimal>,
    pub collateral_token: Option<TokenInfo>,
    pub quote_symbol: String,
    pub is_active: bool,
    /// Registry-local annotation, never present in the raw source.
    pub is_favorite: bool,
}

impl MarketOffer {
    /// Build the display symbol for a pair.
    pub fn symbol_for(collateral: Option<&str>, quote: &str) -> String {
        match collateral {
            Some(c) => format!("{c}-{quote}-PERP"),
            None => UNKNOWN_SYMBOL.to_string(),
        }
    }

    /// Remaining exposure capacity, if both limits are known.
    #[must_use]
    pub fn exposure_headroom(&self) -> Option<Decimal> {
        match (self.max_exposure, self.current_exposure) {
            (Some(max), Some(current)) => Some(max.saturating_sub(current).max(Decimal::ZERO)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_for() {
        assert_eq!(MarketOffer::symbol_for(Some("CAKE"), "BNB"), "CAKE-BNB-PERP");
        assert_eq!(MarketOffer::symbol_for(None, "BNB"), "UNKNOWN-PERP");
    }

    #[test]
    fn test_exposure_headroom() {
        use rust_decimal_macros::dec;

        let mut offer = MarketOffer {
            id: "o-1".to_string(),
            symbol: MarketOffer::symbol_for(Some("CAKE"), "BNB"),
            name: "CAKE".to_string(),
            price: Price::new(dec!(2.45)),
            change_24h: Decimal::ZERO,
            volume_24h: Decimal::ZERO,
            category: "margin".to_string(),
            max_leverage: dec!(10),
            apr: Decimal::ZERO,
            available_for_open: dec!(100),
            max_borrow: None,
            max_open_per_trade: None,
            max_exposure: Some(dec!(50)),
            current_exposure: Some(dec!(20)),
            collateral_token: None,
            quote_symbol: "BNB".to_string(),
            is_active: true,
            is_favorite: false,
        };
        assert_eq!(offer.exposure_headroom(), Some(dec!(30)));

        offer.current_exposure = Some(dec!(80));
        assert_eq!(offer.exposure_headroom(), Some(Decimal::ZERO));

        offer.max_exposure = None;
        assert_eq!(offer.exposure_headroom(), None);
    }
}
