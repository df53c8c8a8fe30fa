//! Trading API access for margin-dash.
//!
//! Defines the ports the rest of the workspace depends on (position and
//! offer sources, account provider) and the concrete HTTP client behind
//! them.

pub mod client;
pub mod error;
pub mod ports;
pub mod session;

pub use client::{ApiClient, ApiClientConfig};
pub use error::{ApiError, ApiResult};
pub use ports::{AccountProvider, OfferSource, PositionSource};
pub use session::Session;
