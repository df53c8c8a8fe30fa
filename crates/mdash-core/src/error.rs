//! Error types for mdash-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Unsupported token decimals: {0} (max 28)")]
    DecimalsOutOfRange(u32),

    #[error("Amount overflow: {0}")]
    Overflow(String),

    #[error("Unknown status filter: {0}")]
    InvalidStatusFilter(String),

    #[error("Invalid account address: {0}")]
    InvalidAddress(String),

    #[error("Decimal parse error: {0}")]
    DecimalParse(#[from] rust_decimal::Error),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
