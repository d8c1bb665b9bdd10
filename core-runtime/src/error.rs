//! Runtime error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Settings storage failure (disk full, corruption). Fatal to the
    /// operation in progress; reported, never silently retried.
    #[error("settings storage failure: {0}")]
    Storage(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A key held a value of a different type than requested.
    #[error("setting `{key}` has type {actual}, expected {expected}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        actual: String,
    },

    /// Stored value could not be parsed back into the requested type.
    #[error("failed to parse setting `{key}`: {message}")]
    Parse { key: String, message: String },

    #[error("failed to initialize logging: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
