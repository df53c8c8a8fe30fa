//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Core error: {0}")]
    Core(#[from] mdash_core::CoreError),

    #[error("API error: {0}")]
    Api(#[from] mdash_api::ApiError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] mdash_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
