//! Local cache facade: the metadata store combined with the on-disk
//! layout.
//!
//! This is the "local half" the local-first repository consults before
//! ever touching the network. A persisted `is_cached` flag whose file has
//! vanished from disk is treated as a cache miss, not an error:
//! [`LocalCacheRepository::cache_book_metadata`] re-verifies flags
//! against the filesystem, so stale state heals on the next pass.

use crate::chapters::{file_start_times, find_related_files_by_start_times};
use crate::error::Result;
use crate::layout::{CoverVariant, StorageLayout};
use bridge_traits::types::{
    Book, BookFile, Chapter, DetailedItem, Library, MediaProgress, PagedItems, PlaybackProgress,
    RecentBook,
};
use core_library::repositories::AccountScope;
use core_library::{BookRepository, FetchRequest, LibraryRepository, RecentRequest, SearchRequest};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

const REFRESH_BATCH_SIZE: u32 = 50;

/// Read/write access to everything cached locally for offline use.
#[derive(Clone)]
pub struct LocalCacheRepository {
    books: BookRepository,
    libraries: LibraryRepository,
    layout: Arc<StorageLayout>,
}

impl LocalCacheRepository {
    pub fn new(pool: SqlitePool, layout: Arc<StorageLayout>) -> Self {
        Self {
            books: BookRepository::new(pool.clone()),
            libraries: LibraryRepository::new(pool),
            layout,
        }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Local path for a file, only when its content is actually on disk.
    pub async fn provide_file_uri(&self, item_id: &str, file_id: &str) -> Option<PathBuf> {
        let path = self.layout.media_path(item_id, file_id);
        match tokio::fs::try_exists(&path).await.unwrap_or(false) {
            true => Some(path),
            false => None,
        }
    }

    /// Local cover path when present; thumbnail when a width is wanted.
    pub async fn fetch_book_cover(&self, item_id: &str, thumbnail: bool) -> Option<PathBuf> {
        let variant = match thumbnail {
            true => CoverVariant::Thumb,
            false => CoverVariant::Raw,
        };
        let path = self.layout.cover_path(item_id, variant);
        match tokio::fs::try_exists(&path).await.unwrap_or(false) {
            true => Some(path),
            false => None,
        }
    }

    /// The local mirror keys progress by item id directly; no session
    /// indirection is needed offline.
    pub async fn sync_progress(
        &self,
        item_id: &str,
        progress: &PlaybackProgress,
        scope: &AccountScope,
    ) -> Result<()> {
        self.books.sync_progress(item_id, progress, scope).await?;
        Ok(())
    }

    /// Mirror a progress record verbatim, preserving its timestamp.
    pub async fn upsert_progress(
        &self,
        item_id: &str,
        progress: &MediaProgress,
        scope: &AccountScope,
    ) -> Result<()> {
        self.books.upsert_progress(item_id, progress, scope).await?;
        Ok(())
    }

    pub async fn fetch_book(&self, item_id: &str) -> Result<Option<DetailedItem>> {
        Ok(self.books.fetch_book(item_id).await?)
    }

    pub async fn fetch_books(&self, request: &FetchRequest) -> Result<PagedItems<Book>> {
        Ok(self.books.fetch_books(request).await?)
    }

    pub async fn search_books(&self, request: &SearchRequest) -> Result<Vec<Book>> {
        Ok(self.books.search_books(request).await?)
    }

    pub async fn fetch_recent_listened_books(
        &self,
        request: &RecentRequest,
    ) -> Result<Vec<RecentBook>> {
        Ok(self.books.fetch_recent_books(request).await?)
    }

    /// Page over fully-hydrated items that have at least one cached
    /// chapter (cache-management views).
    pub async fn fetch_detailed_items(
        &self,
        page_size: u32,
        page_number: u32,
    ) -> Result<PagedItems<DetailedItem>> {
        Ok(self.books.fetch_cached_items(page_size, page_number).await?)
    }

    pub async fn fetch_libraries(&self, scope: &AccountScope) -> Result<Vec<Library>> {
        Ok(self.libraries.fetch_libraries(scope).await?)
    }

    pub async fn update_libraries(
        &self,
        libraries: &[Library],
        scope: &AccountScope,
    ) -> Result<()> {
        self.libraries.cache_libraries(libraries, scope).await?;
        Ok(())
    }

    pub async fn fetch_latest_update(&self, library_id: &str) -> Result<Option<i64>> {
        Ok(self.books.fetch_latest_update(library_id).await?)
    }

    /// Fast summary caching for list visibility; details already stored
    /// are preserved.
    pub async fn cache_books(&self, books: &[Book], scope: &AccountScope) -> Result<()> {
        self.books.upsert_summaries(books, scope).await?;
        Ok(())
    }

    /// Raw detailed upsert with explicit fetched/dropped chapter ids.
    pub async fn cache_book(
        &self,
        item: &DetailedItem,
        scope: &AccountScope,
        fetched: &[String],
        dropped: &[String],
    ) -> Result<()> {
        self.books
            .upsert_detailed(item, scope, fetched, dropped)
            .await?;
        Ok(())
    }

    /// Disk-verified metadata caching: a chapter is recorded cached only
    /// when every related file is present on disk.
    pub async fn cache_book_metadata(
        &self,
        item: &DetailedItem,
        scope: &AccountScope,
    ) -> Result<()> {
        let start_times = file_start_times(&item.files);
        let mut restored = Vec::new();
        let mut dropped = Vec::new();

        for chapter in &item.chapters {
            let related = find_related_files_by_start_times(chapter, &item.files, &start_times);
            if related.is_empty() {
                dropped.push(chapter.id.clone());
                continue;
            }

            let mut complete = true;
            for file in &related {
                let path = self.layout.media_path(&item.id, &file.id);
                if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    complete = false;
                    break;
                }
            }

            match complete {
                true => restored.push(chapter.id.clone()),
                false => dropped.push(chapter.id.clone()),
            }
        }

        self.books
            .upsert_detailed(item, scope, &restored, &dropped)
            .await?;
        debug!(item_id = %item.id, restored = restored.len(), "cached item metadata");
        Ok(())
    }

    pub async fn has_cached_chapters(&self, item_id: &str) -> Result<bool> {
        Ok(self.books.has_cached_chapters(item_id).await?)
    }

    pub async fn is_chapter_cached(&self, item_id: &str, chapter_id: &str) -> Result<bool> {
        Ok(self.books.is_chapter_cached(item_id, chapter_id).await?)
    }

    /// Delete every item without a single cached chapter. Returns the
    /// number of rows reclaimed.
    pub async fn clear_metadata_cache(&self) -> Result<u64> {
        Ok(self.books.delete_non_downloaded().await?)
    }

    /// Re-run disk verification over every cached item, page by page.
    /// Heals flags left stale by files removed behind the store's back.
    pub async fn refresh_metadata(&self, scope: &AccountScope) -> Result<()> {
        let mut page = 0;
        loop {
            let items = self
                .fetch_detailed_items(REFRESH_BATCH_SIZE, page)
                .await?;

            for item in &items.items {
                if let Err(error) = self.cache_book_metadata(item, scope).await {
                    warn!(item_id = %item.id, %error, "metadata refresh failed for item");
                }
            }

            if (items.items.len() as u32) < REFRESH_BATCH_SIZE {
                return Ok(());
            }
            page += 1;
        }
    }

    /// On-disk footprint of one item's media files.
    pub async fn calculate_book_size(&self, item: &DetailedItem) -> u64 {
        let mut size = 0;
        for file in &item.files {
            let path = self.layout.media_path(&item.id, &file.id);
            if let Ok(meta) = tokio::fs::metadata(&path).await {
                size += meta.len();
            }
        }
        size
    }

    /// On-disk footprint of the files serving one chapter.
    pub async fn calculate_chapter_size(
        &self,
        item_id: &str,
        chapter: &Chapter,
        files: &[BookFile],
    ) -> u64 {
        let start_times = file_start_times(files);
        let mut size = 0;
        for file in find_related_files_by_start_times(chapter, files, &start_times) {
            let path = self.layout.media_path(item_id, &file.id);
            if let Ok(meta) = tokio::fs::metadata(&path).await {
                size += meta.len();
            }
        }
        size
    }

    /// Total bytes under the cache root.
    pub async fn total_cache_size(&self) -> u64 {
        let mut size = 0;
        let mut stack = vec![self.layout.base().to_path_buf()];

        while let Some(dir) = stack.pop() {
            let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
                continue;
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let Ok(meta) = entry.metadata().await else {
                    continue;
                };
                match meta.is_dir() {
                    true => stack.push(entry.path()),
                    false => size += meta.len(),
                }
            }
        }

        size
    }
}
