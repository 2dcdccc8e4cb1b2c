use thiserror::Error;

use crate::store::StoreError;

/// Recorder error types
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("invalid session state: {0}")]
    InvalidState(String),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for recorder operations
pub type Result<T> = std::result::Result<T, RecorderError>;
