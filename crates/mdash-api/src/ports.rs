//! Ports to the outside world.
//!
//! Everything that performs I/O sits behind one of these traits so the
//! registries and sync loops can be driven by test doubles.

use async_trait::async_trait;

use mdash_core::{AccountId, ChainId, StatusFilter};
use mdash_feed::{RawOfferRecord, RawPositionRecord};

use crate::error::ApiResult;

/// Source of raw position records for an account.
#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn fetch_raw_positions(
        &self,
        account: &AccountId,
        status: StatusFilter,
    ) -> ApiResult<Vec<RawPositionRecord>>;
}

/// Source of raw lender offers.
#[async_trait]
pub trait OfferSource: Send + Sync {
    async fn fetch_raw_offers(&self) -> ApiResult<Vec<RawOfferRecord>>;
}

/// The connected wallet, if any.
pub trait AccountProvider: Send + Sync {
    fn current_account(&self) -> Option<AccountId>;
    fn current_chain(&self) -> ChainId;
}
