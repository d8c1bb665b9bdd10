//! Cache error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Library(#[from] core_library::LibraryError),

    #[error(transparent)]
    Channel(#[from] bridge_traits::ChannelError),

    #[error("failed to download file {file_id}: {message}")]
    Download { file_id: String, message: String },

    #[error("no writable cache root available")]
    NoWritableRoot,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CacheError>;
