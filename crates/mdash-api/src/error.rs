//! API error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Network failure: connect, timeout, broken body.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Non-2xx response.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Response body is not the expected shape.
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("HTTP client error: {0}")]
    HttpClient(String),
}

impl ApiError {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Http { .. } => "http",
            Self::Decode(_) => "decode",
            Self::HttpClient(_) => "client",
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
