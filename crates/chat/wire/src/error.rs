//! Wire error types.

use thiserror::Error;

/// Wire error type.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Wire result type.
pub type Result<T> = std::result::Result<T, WireError>;
