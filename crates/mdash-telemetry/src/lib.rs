//! Prometheus metrics and structured logging for margin-dash.
//!
//! - Prometheus collectors for sync cycles, dropped records and portfolio aggregates
//! - Structured logging with tracing (JSON in production, pretty otherwise)

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
