//! Store error types.

use thiserror::Error;

/// Remote table operation errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("file {file}: chunk {hash} not found")]
    ChunkNotFound { file: String, hash: String },

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
