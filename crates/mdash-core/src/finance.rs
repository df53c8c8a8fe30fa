//! Financial derivations over canonical position fields.
//!
//! Pure functions over checked `Decimal` arithmetic. A division by zero or
//! an overflow yields `None`; nothing here panics.
//!
//! All quote amounts are in quote-token natural units, all sizes in
//! base-token natural units.

use crate::decimal::{Price, Size};
use crate::position::PositionStatus;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimum collateral ratio below which a position can be liquidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaintenanceMarginRate(Decimal);

impl MaintenanceMarginRate {
    /// 0.5%.
    pub const DEFAULT: Self = Self(dec!(0.005));

    /// Create a rate. Returns `None` outside `[0, 1)`.
    pub fn new(rate: Decimal) -> Option<Self> {
        if rate.is_sign_negative() || rate >= Decimal::ONE {
            return None;
        }
        Some(Self(rate))
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }
}

impl Default for MaintenanceMarginRate {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for MaintenanceMarginRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Average entry price: `opening_notional_quote / size_base`.
///
/// `None` when `size_base` is zero or the quotient overflows.
#[must_use]
pub fn entry_price(opening_notional_quote: Decimal, size_base: Size) -> Option<Price> {
    opening_notional_quote
        .checked_div(size_base.inner())
        .map(Price::new)
}

/// Leverage: `opening_notional_quote / initial_margin_quote`.
///
/// `None` when `initial_margin_quote` is zero or the quotient overflows.
#[must_use]
pub fn leverage(opening_notional_quote: Decimal, initial_margin_quote: Decimal) -> Option<Decimal> {
    opening_notional_quote.checked_div(initial_margin_quote)
}

/// Unrealized PnL of a long position: `(current - entry) * size`.
///
/// `None` on overflow.
#[must_use]
pub fn pnl(entry_price: Price, current_price: Price, size_base: Size) -> Option<Decimal> {
    current_price
        .inner()
        .checked_sub(entry_price.inner())?
        .checked_mul(size_base.inner())
}

/// PnL as a percentage of collateral.
///
/// Defined as `0` when `collateral_quote == 0`; `None` on overflow.
#[must_use]
pub fn pnl_percentage(pnl: Decimal, collateral_quote: Decimal) -> Option<Decimal> {
    if collateral_quote.is_zero() {
        return Some(Decimal::ZERO);
    }
    pnl.checked_div(collateral_quote)?
        .checked_mul(Decimal::ONE_HUNDRED)
}

/// Estimated liquidation price of a long position:
/// `entry * (1 - 1/leverage + maintenance_margin_rate)`.
///
/// `None` when `leverage <= 0` or the product overflows.
#[must_use]
pub fn liquidation_price(
    entry_price: Price,
    leverage: Decimal,
    maintenance_margin_rate: MaintenanceMarginRate,
) -> Option<Price> {
    if leverage <= Decimal::ZERO {
        return None;
    }
    let factor = Decimal::ONE
        .checked_sub(Decimal::ONE.checked_div(leverage)?)?
        .checked_add(maintenance_margin_rate.inner())?;
    entry_price.inner().checked_mul(factor).map(Price::new)
}

/// Realized PnL: `closing - opening` for closed or liquidated positions,
/// `0` while the position is open or when no closing notional is known.
/// `None` on overflow.
#[must_use]
pub fn realized_pnl(
    status: PositionStatus,
    opening_notional_quote: Decimal,
    closing_notional_quote: Option<Decimal>,
) -> Option<Decimal> {
    match (status, closing_notional_quote) {
        (PositionStatus::Open, _) | (_, None) => Some(Decimal::ZERO),
        (_, Some(closing)) => closing.checked_sub(opening_notional_quote),
    }
}
