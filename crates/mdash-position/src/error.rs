//! Registry and sync error types.

use mdash_api::ApiError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Fetch from the external source failed.
    #[error("Source fetch failed: {0}")]
    Source(#[from] ApiError),
}

pub type SyncResult<T> = Result<T, SyncError>;
