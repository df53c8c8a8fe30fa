//! Canonical position model.

use crate::decimal::{Price, Size};
use crate::error::CoreError;
use crate::finance;
use crate::types::{AccountId, ChainId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
    Liquidated,
}

impl PositionStatus {
    /// Map a raw API status string.
    ///
    /// Lower-cased substring match, first match wins:
    /// `liquidated` > `closed`/`sold` > anything else is open.
    pub fn from_raw(raw: &str) -> Self {
        let lowered = raw.to_lowercase();
        if lowered.contains("liquidated") {
            Self::Liquidated
        } else if lowered.contains("closed") || lowered.contains("sold") {
            Self::Closed
        } else {
            Self::Open
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
            Self::Liquidated => write!(f, "liquidated"),
        }
    }
}

/// A leveraged long position, normalized from a raw API record.
///
/// `pnl` and `pnl_percentage` are derived; they only change through
/// [`Position::refresh_pnl`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// On-chain position address, API public key, or a synthesized id.
    pub id: String,
    /// Credit line identifier used for close requests.
    pub loan_id: Option<u64>,
    pub owner: AccountId,
    pub chain: ChainId,
    pub collateral_symbol: String,
    pub quote_symbol: String,
    pub entry_price: Price,
    pub current_price: Price,
    /// Size in collateral (base) token natural units.
    pub size_base: Size,
    /// Opening notional over initial margin, always >= 1.
    pub leverage: Decimal,
    /// Initial margin in quote natural units.
    pub collateral_quote: Decimal,
    /// Opening position size in quote natural units.
    pub opening_notional_quote: Decimal,
    pub pnl: Decimal,
    pub pnl_percentage: Decimal,
    pub liquidation_price: Price,
    pub realized_pnl: Decimal,
    pub opened_at: DateTime<Utc>,
    pub status: PositionStatus,
}

impl Position {
    /// Re-derive `pnl` and `pnl_percentage` against a new current price.
    ///
    /// On overflow the position is left unchanged.
    pub fn refresh_pnl(&mut self, current_price: Price) -> Result<(), CoreError> {
        let overflow =
            || CoreError::Overflow(format!("pnl of {} at price {current_price}", self.id));
        let pnl = finance::pnl(self.entry_price, current_price, self.size_base)
            .ok_or_else(overflow)?;
        let pnl_percentage =
            finance::pnl_percentage(pnl, self.collateral_quote).ok_or_else(overflow)?;

        self.current_price = current_price;
        self.pnl = pnl;
        self.pnl_percentage = pnl_percentage;
        Ok(())
    }

    /// Current notional value in quote units, `None` on overflow.
    #[must_use]
    pub fn notional(&self) -> Option<Decimal> {
        self.size_base.notional(self.current_price)
    }

    /// Trading pair label, e.g. `CAKE/BNB`.
    #[must_use]
    pub fn pair(&self) -> String {
        format!("{}/{}", self.collateral_symbol, self.quote_symbol)
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample() -> Position {
        Position {
            id: "pos-1".to_string(),
            loan_id: Some(7),
            owner: AccountId::parse("0x00000000000000000000000000000000000000aa").unwrap(),
            chain: ChainId::BERACHAIN,
            collateral_symbol: "CAKE".to_string(),
            quote_symbol: "BNB".to_string(),
            entry_price: Price::new(dec!(2)),
            current_price: Price::new(dec!(2)),
            size_base: Size::new(dec!(2.5)),
            leverage: dec!(5),
            collateral_quote: dec!(1),
            opening_notional_quote: dec!(5),
            pnl: Decimal::ZERO,
            pnl_percentage: Decimal::ZERO,
            liquidation_price: Price::new(dec!(1.61)),
            realized_pnl: Decimal::ZERO,
            opened_at: Utc::now(),
            status: PositionStatus::Open,
        }
    }

    #[test]
    fn test_status_from_raw_order() {
        assert_eq!(PositionStatus::from_raw("liquidated"), PositionStatus::Liquidated);
        assert_eq!(
            PositionStatus::from_raw("closed_then_liquidated"),
            PositionStatus::Liquidated
        );
        assert_eq!(PositionStatus::from_raw("LIQUIDATED"), PositionStatus::Liquidated);
        assert_eq!(PositionStatus::from_raw("sold"), PositionStatus::Closed);
        assert_eq!(PositionStatus::from_raw("closed"), PositionStatus::Closed);
        assert_eq!(PositionStatus::from_raw("active"), PositionStatus::Open);
        assert_eq!(PositionStatus::from_raw(""), PositionStatus::Open);
    }

    #[test]
    fn test_refresh_pnl() {
        let mut pos = sample();
        pos.refresh_pnl(Price::new(dec!(2.45))).unwrap();

        assert_eq!(pos.pnl, dec!(1.125));
        assert_eq!(pos.pnl_percentage, dec!(112.5));
        assert_eq!(pos.notional(), Some(dec!(6.125)));
        assert_eq!(pos.pair(), "CAKE/BNB");
    }

    #[test]
    fn test_refresh_pnl_overflow_leaves_position_unchanged() {
        let mut pos = sample();
        pos.size_base = Size::new(dec!(2500000));
        let before = pos.clone();

        let err = pos
            .refresh_pnl(Price::new(dec!(79228162514264337593543950)))
            .unwrap_err();
        assert!(matches!(err, CoreError::Overflow(_)));
        assert_eq!(pos, before);
    }
}
