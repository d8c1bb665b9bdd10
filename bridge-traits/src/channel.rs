//! Remote media channel abstraction.
//!
//! The wire protocol is a host concern; the core only assumes the
//! operations below. All calls may fail with a transient
//! [`ChannelError`], which the repository layer degrades to local-only
//! behavior.

use crate::error::Result;
use crate::types::{
    Book, DetailedItem, Library, PagedItems, PlaybackProgress, PlaybackSession, RecentBook,
};
use async_trait::async_trait;
use bytes::Bytes;

/// Async client for the remote media-library service.
///
/// # Example
///
/// ```ignore
/// async fn first_library(channel: &dyn MediaChannel) -> Option<Library> {
///     channel.fetch_libraries().await.ok()?.into_iter().next()
/// }
/// ```
#[async_trait]
pub trait MediaChannel: Send + Sync {
    /// List the libraries visible to the current account.
    async fn fetch_libraries(&self) -> Result<Vec<Library>>;

    /// Fetch full detail for one item.
    async fn fetch_book(&self, item_id: &str) -> Result<DetailedItem>;

    /// Fetch one page of item summaries for a library.
    async fn fetch_books(
        &self,
        library_id: &str,
        page_size: u32,
        page_number: u32,
    ) -> Result<PagedItems<Book>>;

    /// Fetch the complete minified listing of a library in one call.
    /// Summaries only; used for reconciliation diffing.
    async fn fetch_library_minified(&self, library_id: &str) -> Result<Vec<Book>>;

    /// Items with recent listening activity, most recent first.
    async fn fetch_recent_listened_books(&self, library_id: &str) -> Result<Vec<RecentBook>>;

    /// Server-side search within a library.
    async fn search_books(&self, library_id: &str, query: &str, limit: u32) -> Result<Vec<Book>>;

    /// Open a playback session for an item, anchored at a chapter.
    async fn start_playback(
        &self,
        item_id: &str,
        chapter_id: &str,
        device_id: &str,
        supported_mime_types: &[String],
    ) -> Result<PlaybackSession>;

    /// Push progress under an open session. Fails with
    /// [`crate::ChannelError::NotFound`] when the server no longer knows
    /// the session.
    async fn sync_progress(
        &self,
        session_id: &str,
        item_id: &str,
        progress: &PlaybackProgress,
    ) -> Result<()>;

    /// Fetch cover art, optionally scaled to the given width.
    async fn fetch_book_cover(&self, item_id: &str, width: Option<u32>) -> Result<Bytes>;

    /// Resolve a streamable locator for one file of an item.
    async fn provide_file_uri(&self, item_id: &str, file_id: &str) -> Result<String>;
}
