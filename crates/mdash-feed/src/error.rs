//! Feed error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    /// A required field is missing or unparseable.
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    /// A derivation input is outside its mathematical domain.
    #[error("Derivation domain error: {0}")]
    DerivationDomain(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FeedError {
    pub(crate) fn missing(field: &str) -> Self {
        Self::MalformedRecord(format!("missing required field `{field}`"))
    }

    pub(crate) fn invalid(field: &str, err: impl std::fmt::Display) -> Self {
        Self::MalformedRecord(format!("invalid `{field}`: {err}"))
    }

    /// Short label used for drop accounting.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedRecord(_) => "malformed",
            Self::DerivationDomain(_) => "domain",
            Self::Json(_) => "json",
        }
    }
}

pub type FeedResult<T> = Result<T, FeedError>;
