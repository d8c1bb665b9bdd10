//! Error type shared by channel implementations.

use thiserror::Error;

/// Failure reported by a [`crate::channel::MediaChannel`] operation.
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    /// The referenced remote resource does not exist (stale playback
    /// session, deleted item). Recoverable by recreating the resource.
    #[error("remote resource not found: {0}")]
    NotFound(String),

    /// Credentials were rejected by the server.
    #[error("not authorized")]
    Unauthorized,

    /// Connectivity-level failure: DNS, refused connection, dropped socket.
    #[error("network failure: {0}")]
    Network(String),

    /// The operation did not complete within its deadline.
    #[error("request timed out")]
    Timeout,

    /// Anything the channel could not classify.
    #[error("channel failure: {0}")]
    Unexpected(String),
}

impl ChannelError {
    /// Whether retrying later without any other change could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChannelError::Network(_) | ChannelError::Timeout)
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;
