//! Sync error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Channel(#[from] bridge_traits::ChannelError),

    #[error(transparent)]
    Library(#[from] core_library::LibraryError),

    #[error(transparent)]
    Cache(#[from] core_cache::CacheError),

    #[error(transparent)]
    Runtime(#[from] core_runtime::RuntimeError),
}

impl SyncError {
    /// Whether the failure is a stale-resource rejection that recreating
    /// the resource (e.g. a playback session) would fix.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SyncError::Channel(bridge_traits::ChannelError::NotFound(_))
        )
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
