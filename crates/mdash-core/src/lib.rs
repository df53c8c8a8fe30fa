//! Core domain types for margin-dash.
//!
//! This crate provides the fundamental types shared by every other crate:
//! - `Price`, `Size`: Precision-safe numeric types
//! - `units`: Smallest-unit integer to natural-unit scaling
//! - `Position`, `MarketOffer`: Canonical entities produced by normalization
//! - `finance`: PnL, leverage and liquidation-price derivations

pub mod decimal;
pub mod error;
pub mod finance;
pub mod offer;
pub mod position;
pub mod types;
pub mod units;

pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use finance::MaintenanceMarginRate;
pub use offer::MarketOffer;
pub use position::{Position, PositionStatus};
pub use types::{AccountId, ChainId, StatusFilter, TokenInfo};
pub use units::NATIVE_DECIMALS;
