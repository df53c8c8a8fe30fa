//! Position and market registries for margin-dash.
//!
//! # Key Components
//!
//! - [`Store`]: Observable entity store with loading/error flags and sync epochs
//! - [`PositionRegistry`]: Tracked positions with open/closed projections and aggregates
//! - [`MarketRegistry`]: Active market offers with favorites and selection
//! - [`SyncLoop`]: Cancellable polling loop feeding a registry from its source
//! - [`PositionSyncTarget`], [`OfferSyncTarget`]: The two loop instances

pub mod error;
pub mod markets;
pub mod positions;
pub mod store;
pub mod sync;

pub use error::{SyncError, SyncResult};
pub use markets::{MarketRegistry, DEFAULT_MARKET};
pub use positions::{PositionRegistry, PositionUpdate};
pub use store::{Store, StoreSnapshot, Subscription};
pub use sync::{
    CycleOutcome, OfferSyncTarget, PositionKey, PositionSyncTarget, SyncLoop, SyncStatus,
    SyncTarget,
};
