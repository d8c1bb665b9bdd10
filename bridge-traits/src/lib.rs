//! # Bridge Traits
//!
//! Trait seams between the offline-first core and its external
//! collaborators, together with the domain types that cross them.
//!
//! The core never talks to a concrete server, network stack, or player
//! engine directly. Instead it is handed implementations of:
//!
//! - [`channel::MediaChannel`]: the remote media-library service
//! - [`network::NetworkMonitor`]: connectivity and server reachability
//! - [`playback::PlayerHandle`]: position snapshots from the player engine
//!
//! Everything here is object-safe and `Send + Sync`, so hosts can supply
//! implementations behind `Arc<dyn …>`.

pub mod channel;
pub mod error;
pub mod network;
pub mod playback;
pub mod types;

pub use channel::MediaChannel;
pub use error::{ChannelError, Result};
pub use network::NetworkMonitor;
pub use playback::{PlayerHandle, PlayerSnapshot};
pub use types::{
    Book, BookFile, BookSeries, Chapter, DetailedItem, Library, LibraryType, MediaProgress,
    PagedItems, PlaybackProgress, PlaybackSession, RecentBook,
};
