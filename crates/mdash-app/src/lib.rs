//! margin-dash application.
//!
//! Composition root wiring the API client, wallet session, registries and
//! their sync loops:
//! - Market offers are polled from startup until shutdown
//! - Positions are polled for the connected account; switching or
//!   disconnecting the account retargets the position loop

pub mod app;
pub mod config;
pub mod error;

pub use app::Application;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
