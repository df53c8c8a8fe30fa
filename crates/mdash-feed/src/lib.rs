//! Raw record normalization for margin-dash.
//!
//! Converts loosely-typed position and offer records from the trading API
//! into the canonical entities defined in `mdash-core`. Records that cannot
//! be normalized are dropped individually; a batch never fails as a whole.

pub mod error;
pub mod normalizer;
pub mod raw;

pub use error::{FeedError, FeedResult};
pub use normalizer::{
    DroppedRecord, NormalizeStats, NormalizedBatch, OfferNormalizer, PositionNormalizer,
};
pub use raw::{RawOfferRecord, RawPositionRecord};
