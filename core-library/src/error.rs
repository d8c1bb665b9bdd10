//! Library store error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LibraryError {
    /// Underlying SQLite failure. The only error class treated as fatal
    /// to the operation in progress.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    /// Persisted payload that no longer deserializes (e.g. series JSON).
    #[error("corrupt stored value in {field}: {message}")]
    Corrupt { field: &'static str, message: String },
}

pub type Result<T> = std::result::Result<T, LibraryError>;
