//! Storage error types.

use thiserror::Error;

/// Errors from the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("data corruption: {0}")]
    Corruption(String),

    #[error("field too large: {0} bytes")]
    FieldTooLarge(usize),
}
