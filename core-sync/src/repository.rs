//! Local-first repository.
//!
//! Every read prefers the Local Metadata Store and falls back to the
//! remote channel only when local data is absent or insufficient;
//! successful remote reads are persisted before they are returned. Every
//! write lands locally first, so offline listening is never lost, and is
//! mirrored out when policy allows.
//!
//! Divergence between mirror and server is reconciled last-write-wins on
//! progress timestamps; equal timestamps deliberately resolve to no
//! action.

use crate::error::Result;
use bridge_traits::types::{
    Book, Chapter, DetailedItem, Library, MediaProgress, PagedItems, PlaybackProgress,
    PlaybackSession, RecentBook,
};
use bridge_traits::{MediaChannel, NetworkMonitor};
use core_cache::{CoverVariant, LocalCacheRepository, COVER_THUMB_WIDTH};
use core_library::repositories::AccountScope;
use core_library::{FetchRequest, LibraryOrdering, RecentRequest, SearchRequest};
use core_runtime::{keys, SettingsStore};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Where a media file can be played from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSource {
    /// Fully cached on disk.
    Local(PathBuf),
    /// Streamable remote locator.
    Remote(String),
}

/// Tuning for reconciliation passes.
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// Items fetched in detail concurrently during library reconciliation.
    pub detail_batch_size: usize,
    /// Delay before a background cover prefetch starts, prioritizing
    /// metadata traffic.
    pub cover_prefetch_initial_delay: Duration,
    /// Spacing between prefetched covers.
    pub cover_prefetch_spacing: Duration,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            detail_batch_size: 20,
            cover_prefetch_initial_delay: Duration::from_secs(2),
            cover_prefetch_spacing: Duration::from_millis(100),
        }
    }
}

/// Read-through/write-through façade over the local mirror and the
/// remote channel.
#[derive(Clone)]
pub struct MediaRepository {
    channel: Arc<dyn MediaChannel>,
    local: Arc<LocalCacheRepository>,
    settings: Arc<SettingsStore>,
    network: Arc<dyn NetworkMonitor>,
    config: RepositoryConfig,
}

impl MediaRepository {
    pub fn new(
        channel: Arc<dyn MediaChannel>,
        local: Arc<LocalCacheRepository>,
        settings: Arc<SettingsStore>,
        network: Arc<dyn NetworkMonitor>,
        config: RepositoryConfig,
    ) -> Self {
        Self {
            channel,
            local,
            settings,
            network,
            config,
        }
    }

    async fn scope(&self) -> Result<AccountScope> {
        Ok(AccountScope {
            host: self.settings.host().await?,
            username: self.settings.username().await?,
        })
    }

    async fn ordering(&self) -> LibraryOrdering {
        self.settings
            .get_json::<LibraryOrdering>(keys::LIBRARY_ORDERING)
            .await
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    /// Resolve a playable source for one file: the on-disk copy when it
    /// exists, the remote locator otherwise.
    pub async fn provide_file_uri(&self, item_id: &str, file_id: &str) -> Result<FileSource> {
        if let Some(path) = self.local.provide_file_uri(item_id, file_id).await {
            debug!(item_id, file_id, "serving local file");
            return Ok(FileSource::Local(path));
        }

        debug!(item_id, file_id, "local miss, falling back to remote locator");
        let uri = self.channel.provide_file_uri(item_id, file_id).await?;
        Ok(FileSource::Remote(uri))
    }

    /// Record progress locally, then mirror it to the server. With the
    /// force-offline preference set the remote outcome is ignored and the
    /// call reports success regardless.
    pub async fn sync_progress(
        &self,
        session_id: &str,
        item_id: &str,
        progress: &PlaybackProgress,
    ) -> Result<()> {
        let scope = self.scope().await?;
        self.local.sync_progress(item_id, progress, &scope).await?;

        let remote_outcome = self.channel.sync_progress(session_id, item_id, progress).await;

        match self.settings.force_offline().await? {
            true => Ok(()),
            false => Ok(remote_outcome?),
        }
    }

    /// Record progress in the local mirror only. Never touches the
    /// network.
    pub async fn sync_local_progress(
        &self,
        item_id: &str,
        progress: &PlaybackProgress,
    ) -> Result<()> {
        let scope = self.scope().await?;
        self.local.sync_progress(item_id, progress, &scope).await?;
        Ok(())
    }

    /// Cover art for an item: local file when cached, otherwise fetched,
    /// stored, and served from disk.
    pub async fn fetch_book_cover(&self, item_id: &str, thumbnail: bool) -> Result<PathBuf> {
        if let Some(path) = self.local.fetch_book_cover(item_id, thumbnail).await {
            return Ok(path);
        }

        let (variant, width) = match thumbnail {
            true => (CoverVariant::Thumb, Some(COVER_THUMB_WIDTH)),
            false => (CoverVariant::Raw, None),
        };
        let bytes = self.channel.fetch_book_cover(item_id, width).await?;

        let path = self.local.layout().cover_path(item_id, variant);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(core_cache::CacheError::Io)?;
        }
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(core_cache::CacheError::Io)?;
        Ok(path)
    }

    pub async fn search_books(
        &self,
        library_id: &str,
        query: &str,
        limit: u32,
    ) -> Result<Vec<Book>> {
        let scope = self.scope().await?;
        let request = SearchRequest::new(query)
            .library_id(Some(library_id.to_string()))
            .ordering(self.ordering().await)
            .account(scope.host.clone(), scope.username.clone());

        let local_hits = self.local.search_books(&request).await?;
        if !local_hits.is_empty() {
            return Ok(local_hits);
        }

        match self.channel.search_books(library_id, query, limit).await {
            Ok(remote_hits) => {
                self.local.cache_books(&remote_hits, &scope).await?;
                Ok(remote_hits)
            }
            Err(err) => {
                debug!(%err, "remote search unavailable, serving local results");
                Ok(local_hits)
            }
        }
    }

    pub async fn fetch_books(
        &self,
        library_id: &str,
        page_size: u32,
        page_number: u32,
        downloaded_only: bool,
    ) -> Result<PagedItems<Book>> {
        let scope = self.scope().await?;
        let request = FetchRequest::new()
            .library_id(Some(library_id.to_string()))
            .page_size(page_size)
            .page_number(page_number)
            .ordering(self.ordering().await)
            .downloaded_only(downloaded_only)
            .account(scope.host.clone(), scope.username.clone());

        let local_page = self.local.fetch_books(&request).await?;
        if downloaded_only || !local_page.items.is_empty() {
            return Ok(local_page);
        }

        match self
            .channel
            .fetch_books(library_id, page_size, page_number)
            .await
        {
            Ok(remote_page) => {
                self.local.cache_books(&remote_page.items, &scope).await?;
                Ok(remote_page)
            }
            Err(err) => {
                debug!(%err, "remote listing unavailable, serving local page");
                Ok(local_page)
            }
        }
    }

    pub async fn fetch_libraries(&self) -> Result<Vec<Library>> {
        let scope = self.scope().await?;

        let local_libraries = self.local.fetch_libraries(&scope).await?;
        if !local_libraries.is_empty() {
            return Ok(local_libraries);
        }

        match self.channel.fetch_libraries().await {
            Ok(remote_libraries) => {
                self.local
                    .update_libraries(&remote_libraries, &scope)
                    .await?;
                Ok(remote_libraries)
            }
            Err(err) => {
                debug!(%err, "remote library list unavailable");
                Ok(local_libraries)
            }
        }
    }

    /// Detailed item lookup. A local hit counts as detailed only when it
    /// carries chapters or files; shallow summary rows fall through to
    /// the remote channel, whose result is merged with local progress
    /// (newer timestamp wins, ties prefer local) and persisted.
    #[instrument(skip(self))]
    pub async fn fetch_book(&self, item_id: &str) -> Result<DetailedItem> {
        let scope = self.scope().await?;
        let local_item = self.local.fetch_book(item_id).await?;

        if let Some(item) = &local_item {
            if !item.chapters.is_empty() || !item.files.is_empty() {
                return Ok(self.make_available_if_online(item.clone()));
            }
        }

        match self.channel.fetch_book(item_id).await {
            Ok(remote_item) => {
                let merged = self.merge_local_progress(remote_item).await?;
                self.local.cache_book_metadata(&merged, &scope).await?;
                Ok(self.make_available_if_online(merged))
            }
            Err(err) => match local_item {
                Some(item) => {
                    debug!(%err, "detail fetch failed, serving shallow local item");
                    Ok(self.make_available_if_online(item))
                }
                None => Err(err.into()),
            },
        }
    }

    /// With the server reachable, hand the player a copy where every
    /// chapter is playable (streaming). Persisted cache flags are never
    /// touched.
    fn make_available_if_online(&self, item: DetailedItem) -> DetailedItem {
        if !self.network.is_network_available() {
            return item;
        }
        if item.all_chapters_available() {
            return item;
        }

        DetailedItem {
            chapters: item
                .chapters
                .iter()
                .map(|chapter| Chapter {
                    available: true,
                    ..chapter.clone()
                })
                .collect(),
            ..item
        }
    }

    async fn merge_local_progress(&self, remote_item: DetailedItem) -> Result<DetailedItem> {
        let Some(cached) = self.local.fetch_book(&remote_item.id).await? else {
            return Ok(remote_item);
        };
        let Some(local_progress) = cached.progress else {
            return Ok(remote_item);
        };

        let merged: MediaProgress = match remote_item.progress {
            None => local_progress,
            Some(remote_progress) => {
                match local_progress.last_update >= remote_progress.last_update {
                    true => local_progress,
                    false => remote_progress,
                }
            }
        };

        Ok(DetailedItem {
            progress: Some(merged),
            ..remote_item
        })
    }

    pub async fn fetch_recent_listened_books(&self, library_id: &str) -> Result<Vec<RecentBook>> {
        let scope = self.scope().await?;
        let is_offline =
            !self.network.is_server_available() || self.settings.force_offline().await?;

        let request = RecentRequest::new()
            .library_id(Some(library_id.to_string()))
            .downloaded_only(is_offline)
            .account(scope.host.clone(), scope.username.clone());
        let local_recents = self.local.fetch_recent_listened_books(&request).await?;

        if is_offline || !local_recents.is_empty() {
            return Ok(local_recents);
        }

        match self.channel.fetch_recent_listened_books(library_id).await {
            Ok(remote_recents) => {
                self.overlay_local_recent_progress(library_id, remote_recents, &scope)
                    .await
            }
            Err(err) => {
                debug!(%err, "remote recents unavailable");
                Ok(local_recents)
            }
        }
    }

    /// Remote recent entries whose local progress is strictly newer keep
    /// the locally-derived listened percentage.
    async fn overlay_local_recent_progress(
        &self,
        library_id: &str,
        remote_recents: Vec<RecentBook>,
        scope: &AccountScope,
    ) -> Result<Vec<RecentBook>> {
        let request = RecentRequest::new()
            .library_id(Some(library_id.to_string()))
            .account(scope.host.clone(), scope.username.clone());
        let local_recents = self.local.fetch_recent_listened_books(&request).await?;
        let local_map: HashMap<&str, &RecentBook> = local_recents
            .iter()
            .map(|recent| (recent.id.as_str(), recent))
            .collect();

        Ok(remote_recents
            .into_iter()
            .map(|remote| {
                let Some(local) = local_map.get(remote.id.as_str()) else {
                    return remote;
                };
                match (local.listened_last_update, remote.listened_last_update) {
                    (Some(local_time), Some(remote_time)) if local_time > remote_time => {
                        RecentBook {
                            listened_percentage: local.listened_percentage,
                            ..remote
                        }
                    }
                    _ => remote,
                }
            })
            .collect())
    }

    /// Reconcile the full library: fast summary visibility first, then
    /// detailed fetches for new or updated items in bounded concurrent
    /// batches, with background cover prefetch for the successes.
    #[instrument(skip(self))]
    pub async fn sync_full_library(&self, library_id: &str) -> Result<()> {
        let scope = self.scope().await?;

        let minified = match self.channel.fetch_library_minified(library_id).await {
            Ok(items) => items,
            Err(err) => {
                debug!(%err, "library reconciliation skipped");
                return Ok(());
            }
        };

        // Fast pass: new items become visible and searchable immediately;
        // stored details are preserved by the summary upsert.
        self.local.cache_books(&minified, &scope).await?;

        let known_request = FetchRequest::new()
            .library_id(Some(library_id.to_string()))
            .page_size(u32::MAX)
            .account(scope.host.clone(), scope.username.clone());
        let known: HashMap<String, Book> = self
            .local
            .fetch_books(&known_request)
            .await?
            .items
            .into_iter()
            .map(|book| (book.id.clone(), book))
            .collect();

        let stale: Vec<Book> = minified
            .into_iter()
            .filter(|remote| {
                known
                    .get(&remote.id)
                    .map(|local| remote.updated_at > local.updated_at)
                    .unwrap_or(true)
            })
            .collect();

        if stale.is_empty() {
            debug!("local library is up to date");
            return Ok(());
        }
        info!(count = stale.len(), "fetching details for stale items");

        for chunk in stale.chunks(self.config.detail_batch_size) {
            let outcomes = futures::future::join_all(chunk.iter().map(|book| async {
                match self.channel.fetch_book(&book.id).await {
                    Ok(item) => match self.local.cache_book_metadata(&item, &scope).await {
                        Ok(()) => Some(item.id),
                        Err(err) => {
                            warn!(item_id = %book.id, %err, "failed to cache item detail");
                            None
                        }
                    },
                    Err(err) => {
                        debug!(item_id = %book.id, %err, "detail fetch failed");
                        None
                    }
                }
            }))
            .await;

            let fetched: Vec<String> = outcomes.into_iter().flatten().collect();
            if !fetched.is_empty() {
                self.spawn_cover_prefetch(fetched);
            }
        }

        Ok(())
    }

    /// Reconcile recent activity in both directions. Per item id, the
    /// newer progress timestamp wins: a newer remote record is pulled in
    /// full, a newer local record is pushed through a fresh playback
    /// session, and equal timestamps resolve to no action.
    #[instrument(skip(self))]
    pub async fn sync_repositories(&self, override_library_id: Option<&str>) -> Result<()> {
        let library_id = match override_library_id {
            Some(id) => id.to_string(),
            None => match self.settings.preferred_library_id().await? {
                Some(id) => id,
                None => return Ok(()),
            },
        };

        self.sync_full_library(&library_id).await?;

        let scope = self.scope().await?;
        let remote_recents = self
            .channel
            .fetch_recent_listened_books(&library_id)
            .await
            .unwrap_or_default();

        let request = RecentRequest::new()
            .library_id(Some(library_id.clone()))
            .account(scope.host.clone(), scope.username.clone());
        let local_recents = self.local.fetch_recent_listened_books(&request).await?;

        let remote_map: HashMap<&str, &RecentBook> = remote_recents
            .iter()
            .map(|recent| (recent.id.as_str(), recent))
            .collect();
        let local_map: HashMap<&str, &RecentBook> = local_recents
            .iter()
            .map(|recent| (recent.id.as_str(), recent))
            .collect();
        let all_ids: HashSet<&str> = remote_map.keys().chain(local_map.keys()).copied().collect();

        for id in all_ids {
            let remote_time = remote_map
                .get(id)
                .and_then(|recent| recent.listened_last_update)
                .unwrap_or(0);
            let local_time = local_map
                .get(id)
                .and_then(|recent| recent.listened_last_update)
                .unwrap_or(0);

            if remote_time > local_time {
                match self.channel.fetch_book(id).await {
                    Ok(item) => {
                        let item_id = item.id.clone();
                        match self.local.cache_book_metadata(&item, &scope).await {
                            Ok(()) => self.spawn_cover_prefetch(vec![item_id]),
                            Err(err) => warn!(item_id = %id, %err, "failed to cache pulled item"),
                        }
                    }
                    Err(err) => debug!(item_id = %id, %err, "pull fetch failed"),
                }
            } else if local_time > remote_time {
                if let Err(err) = self.push_local_progress(id).await {
                    debug!(item_id = %id, %err, "push of local progress failed");
                }
            }
            // Equal timestamps: deliberately no action.
        }

        Ok(())
    }

    /// Open a fresh session anchored at the local progress and push it so
    /// the server catches up.
    async fn push_local_progress(&self, item_id: &str) -> Result<()> {
        let Some(book) = self.local.fetch_book(item_id).await? else {
            return Ok(());
        };
        let Some(progress) = book.progress else {
            return Ok(());
        };
        let Some(first_chapter) = book.chapters.first() else {
            return Ok(());
        };

        let device_id = self.settings.device_id().await?;
        let session = self
            .channel
            .start_playback(item_id, &first_chapter.id, &device_id, &[])
            .await?;

        // Chapter-local time is left at zero; the server rederives it
        // from the total.
        let payload = PlaybackProgress {
            current_total_time: progress.current_time,
            current_chapter_time: 0.0,
        };
        self.channel
            .sync_progress(&session.session_id, item_id, &payload)
            .await?;

        Ok(())
    }

    fn spawn_cover_prefetch(&self, item_ids: Vec<String>) {
        let repository = self.clone();
        tokio::spawn(async move {
            if !repository.network.is_network_available() {
                return;
            }
            if repository.settings.force_offline().await.unwrap_or(false) {
                return;
            }

            // Let metadata traffic win the first seconds of a sync.
            tokio::time::sleep(repository.config.cover_prefetch_initial_delay).await;

            for item_id in item_ids {
                if let Err(err) = repository.fetch_book_cover(&item_id, false).await {
                    debug!(item_id, %err, "cover prefetch failed");
                }
                tokio::time::sleep(repository.config.cover_prefetch_spacing).await;
            }
        });
    }

    /// Open a playback session for an item.
    pub async fn start_playback(
        &self,
        item_id: &str,
        chapter_id: &str,
        supported_mime_types: &[String],
    ) -> Result<PlaybackSession> {
        let device_id = self.settings.device_id().await?;
        Ok(self
            .channel
            .start_playback(item_id, chapter_id, &device_id, supported_mime_types)
            .await?)
    }

    pub async fn fetch_latest_update(&self, library_id: &str) -> Result<Option<i64>> {
        Ok(self.local.fetch_latest_update(library_id).await?)
    }

    pub async fn clear_metadata_cache(&self) -> Result<u64> {
        Ok(self.local.clear_metadata_cache().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{book, chapter, file, item, FakeChannel, StaticNetwork};
    use core_cache::StorageLayout;
    use core_library::create_test_pool;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    struct Fixture {
        channel: Arc<FakeChannel>,
        repository: MediaRepository,
        local: Arc<LocalCacheRepository>,
        settings: Arc<SettingsStore>,
        network: Arc<StaticNetwork>,
        _dir: TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let layout = Arc::new(StorageLayout::with_base(dir.path()).unwrap());
        let pool = create_test_pool().await.unwrap();
        let local = Arc::new(LocalCacheRepository::new(pool, layout));

        let settings = Arc::new(SettingsStore::in_memory().await.unwrap());
        settings.set_host("http://server.local").await.unwrap();
        settings.set_username("user").await.unwrap();

        let channel = Arc::new(FakeChannel::new());
        let network = Arc::new(StaticNetwork::new(true, true));

        let repository = MediaRepository::new(
            channel.clone(),
            local.clone(),
            settings.clone(),
            network.clone(),
            RepositoryConfig::default(),
        );

        Fixture {
            channel,
            repository,
            local,
            settings,
            network,
            _dir: dir,
        }
    }

    fn scope() -> AccountScope {
        AccountScope::new("http://server.local", "user")
    }

    #[tokio::test]
    async fn detailed_local_hit_skips_the_network() {
        let fixture = fixture().await;

        let detailed = item("known", vec![chapter("a", 0.0, 100.0)], vec![]);
        fixture
            .local
            .cache_book(&detailed, &scope(), &[], &[])
            .await
            .unwrap();

        let fetched = fixture.repository.fetch_book("known").await.unwrap();
        assert_eq!(fetched.id, "known");
        assert!(fixture.channel.fetch_book_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn newer_progress_timestamp_wins_the_merge() {
        let fixture = fixture().await;

        // Shallow local row carrying newer progress.
        let mut shallow = item("book", vec![], vec![]);
        shallow.progress = Some(MediaProgress {
            current_time: 50.0,
            is_finished: false,
            last_update: 2_000,
        });
        fixture
            .local
            .cache_book(&shallow, &scope(), &[], &[])
            .await
            .unwrap();

        // Remote detail carries older progress.
        let mut remote = item("book", vec![chapter("a", 0.0, 100.0)], vec![]);
        remote.progress = Some(MediaProgress {
            current_time: 99.0,
            is_finished: false,
            last_update: 1_000,
        });
        fixture
            .channel
            .books
            .lock()
            .unwrap()
            .insert("book".to_string(), remote);

        let merged = fixture.repository.fetch_book("book").await.unwrap();
        let progress = merged.progress.unwrap();
        assert_eq!(progress.current_time, 50.0, "local progress is newer");
        assert_eq!(progress.last_update, 2_000);
    }

    #[tokio::test]
    async fn equal_progress_timestamps_prefer_local() {
        let fixture = fixture().await;

        let mut shallow = item("book", vec![], vec![]);
        shallow.progress = Some(MediaProgress {
            current_time: 50.0,
            is_finished: false,
            last_update: 2_000,
        });
        fixture
            .local
            .cache_book(&shallow, &scope(), &[], &[])
            .await
            .unwrap();

        let mut remote = item("book", vec![chapter("a", 0.0, 100.0)], vec![]);
        remote.progress = Some(MediaProgress {
            current_time: 99.0,
            is_finished: false,
            last_update: 2_000,
        });
        fixture
            .channel
            .books
            .lock()
            .unwrap()
            .insert("book".to_string(), remote);

        let merged = fixture.repository.fetch_book("book").await.unwrap();
        assert_eq!(merged.progress.unwrap().current_time, 50.0);
    }

    #[tokio::test]
    async fn remote_failure_degrades_to_shallow_local() {
        let fixture = fixture().await;

        let shallow = item("book", vec![], vec![]);
        fixture
            .local
            .cache_book(&shallow, &scope(), &[], &[])
            .await
            .unwrap();
        fixture.channel.offline.store(true, Ordering::SeqCst);

        let fetched = fixture.repository.fetch_book("book").await.unwrap();
        assert_eq!(fetched.id, "book");

        // With no local fallback the remote error surfaces.
        let missing = fixture.repository.fetch_book("missing").await;
        assert!(missing.is_err());
    }

    #[tokio::test]
    async fn online_items_have_all_chapters_available() {
        let fixture = fixture().await;

        let detailed = item(
            "book",
            vec![chapter("a", 0.0, 100.0), chapter("b", 100.0, 200.0)],
            vec![],
        );
        fixture
            .local
            .cache_book(&detailed, &scope(), &["a".to_string()], &[])
            .await
            .unwrap();

        let online = fixture.repository.fetch_book("book").await.unwrap();
        assert!(online.all_chapters_available());

        // Persisted flags are untouched by the widening.
        assert!(!fixture.local.is_chapter_cached("book", "b").await.unwrap());
    }

    #[tokio::test]
    async fn listing_serves_local_first_then_persists_remote() {
        let fixture = fixture().await;

        fixture.channel.paged.lock().unwrap().push(book("remote-book", 500));

        let page = fixture
            .repository
            .fetch_books("lib-1", 20, 0, false)
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(fixture.channel.fetch_books_calls.load(Ordering::SeqCst), 1);

        // Remote result was persisted; second read is local-only.
        let page = fixture
            .repository
            .fetch_books("lib-1", 20, 0, false)
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(fixture.channel.fetch_books_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn search_prefers_local_hits() {
        let fixture = fixture().await;

        let stored = item("local-hit", vec![], vec![]);
        fixture
            .local
            .cache_book(&stored, &scope(), &[], &[])
            .await
            .unwrap();

        let hits = fixture
            .repository
            .search_books("lib-1", "Title local-hit", 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(fixture.channel.search_calls.load(Ordering::SeqCst), 0);

        fixture
            .channel
            .search_results
            .lock()
            .unwrap()
            .push(book("remote-hit", 1));
        let hits = fixture
            .repository
            .search_books("lib-1", "nothing-local", 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "remote-hit");
        assert_eq!(fixture.channel.search_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn force_offline_reports_success_despite_remote_failure() {
        let fixture = fixture().await;

        let detailed = item("book", vec![chapter("a", 0.0, 100.0)], vec![]);
        fixture
            .local
            .cache_book(&detailed, &scope(), &[], &[])
            .await
            .unwrap();
        fixture.channel.offline.store(true, Ordering::SeqCst);

        let progress = PlaybackProgress {
            current_total_time: 10.0,
            current_chapter_time: 10.0,
        };

        let result = fixture
            .repository
            .sync_progress("session", "book", &progress)
            .await;
        assert!(result.is_err(), "remote failure surfaces by default");

        fixture.settings.set_force_offline(true).await.unwrap();
        fixture
            .repository
            .sync_progress("session", "book", &progress)
            .await
            .unwrap();

        // The local write happened regardless.
        let stored = fixture.local.fetch_book("book").await.unwrap().unwrap();
        assert_eq!(stored.progress.unwrap().current_time, 10.0);
    }

    #[tokio::test]
    async fn library_reconciliation_fetches_only_stale_details() {
        let fixture = fixture().await;

        // Known item, up to date.
        let mut known = item("stable", vec![chapter("a", 0.0, 100.0)], vec![]);
        known.updated_at = 50;
        fixture
            .local
            .cache_book(&known, &scope(), &[], &[])
            .await
            .unwrap();

        *fixture.channel.minified.lock().unwrap() =
            vec![book("fresh", 100), book("stable", 50)];
        fixture.channel.books.lock().unwrap().insert(
            "fresh".to_string(),
            item("fresh", vec![chapter("x", 0.0, 10.0)], vec![]),
        );

        fixture
            .repository
            .sync_full_library("lib-1")
            .await
            .unwrap();

        let calls = fixture.channel.fetch_book_calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["fresh".to_string()]);

        // The fresh item is now stored in detail.
        let stored = fixture.local.fetch_book("fresh").await.unwrap().unwrap();
        assert_eq!(stored.chapters.len(), 1);

        // The summary pass made it visible even before details landed.
        let listing = fixture
            .repository
            .fetch_books("lib-1", 50, 0, false)
            .await
            .unwrap();
        assert!(listing.items.iter().any(|entry| entry.id == "fresh"));
    }

    #[tokio::test]
    async fn recents_reconciliation_pulls_pushes_and_leaves_ties_alone() {
        let fixture = fixture().await;
        let scope = scope();

        // pull-me: remote progress is newer.
        let mut pull = item("pull-me", vec![], vec![]);
        pull.progress = Some(MediaProgress {
            current_time: 10.0,
            is_finished: false,
            last_update: 1_000,
        });
        fixture
            .local
            .cache_book(&pull, &scope, &[], &[])
            .await
            .unwrap();

        // push-me: local progress is newer.
        let mut push = item("push-me", vec![chapter("a", 0.0, 100.0)], vec![file("f1", 100.0)]);
        push.progress = Some(MediaProgress {
            current_time: 42.0,
            is_finished: false,
            last_update: 3_000,
        });
        fixture
            .local
            .cache_book(&push, &scope, &[], &[])
            .await
            .unwrap();

        // tied: equal timestamps on both sides.
        let mut tied = item("tied", vec![], vec![]);
        tied.progress = Some(MediaProgress {
            current_time: 5.0,
            is_finished: false,
            last_update: 500,
        });
        fixture
            .local
            .cache_book(&tied, &scope, &[], &[])
            .await
            .unwrap();

        *fixture.channel.recents.lock().unwrap() = vec![
            RecentBook {
                id: "pull-me".to_string(),
                title: "Pull".to_string(),
                author: None,
                listened_percentage: None,
                listened_last_update: Some(2_000),
            },
            RecentBook {
                id: "push-me".to_string(),
                title: "Push".to_string(),
                author: None,
                listened_percentage: None,
                listened_last_update: Some(1_000),
            },
            RecentBook {
                id: "tied".to_string(),
                title: "Tied".to_string(),
                author: None,
                listened_percentage: None,
                listened_last_update: Some(500),
            },
        ];
        fixture.channel.books.lock().unwrap().insert(
            "pull-me".to_string(),
            item("pull-me", vec![chapter("p", 0.0, 10.0)], vec![]),
        );

        fixture
            .repository
            .sync_repositories(Some("lib-1"))
            .await
            .unwrap();

        // Pull: the newer remote record was fetched in detail.
        let calls = fixture.channel.fetch_book_calls.lock().unwrap().clone();
        assert!(calls.contains(&"pull-me".to_string()));
        assert!(!calls.contains(&"tied".to_string()));

        // Push: a fresh session anchored the local progress remotely.
        let sessions = fixture.channel.start_playback_calls.lock().unwrap().clone();
        assert_eq!(sessions, vec![("push-me".to_string(), "a".to_string())]);

        let pushes = fixture.channel.sync_calls.lock().unwrap().clone();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].1, "push-me");
        assert_eq!(pushes[0].2, 42.0);
    }

    #[tokio::test]
    async fn recents_go_downloaded_only_while_offline() {
        let fixture = fixture().await;
        let scope = scope();
        fixture.network.set_server(false);

        // In progress but not downloaded: hidden offline.
        let mut undownloaded = item("undownloaded", vec![chapter("a", 0.0, 100.0)], vec![]);
        undownloaded.progress = Some(MediaProgress {
            current_time: 10.0,
            is_finished: false,
            last_update: 1_000,
        });
        fixture
            .local
            .cache_book(&undownloaded, &scope, &[], &[])
            .await
            .unwrap();

        // In progress and downloaded: visible offline.
        let mut downloaded = item("downloaded", vec![chapter("b", 0.0, 100.0)], vec![]);
        downloaded.progress = Some(MediaProgress {
            current_time: 20.0,
            is_finished: false,
            last_update: 2_000,
        });
        fixture
            .local
            .cache_book(&downloaded, &scope, &["b".to_string()], &[])
            .await
            .unwrap();

        let recents = fixture
            .repository
            .fetch_recent_listened_books("lib-1")
            .await
            .unwrap();

        let ids: Vec<_> = recents.iter().map(|recent| recent.id.as_str()).collect();
        assert_eq!(ids, vec!["downloaded"]);
    }

    #[tokio::test]
    async fn file_uri_prefers_cached_content() {
        let fixture = fixture().await;

        let source = fixture
            .repository
            .provide_file_uri("item", "f1")
            .await
            .unwrap();
        assert_eq!(
            source,
            FileSource::Remote("http://remote/item/f1".to_string())
        );

        let path = fixture.local.layout().media_path("item", "f1");
        tokio::fs::create_dir_all(path.parent().unwrap())
            .await
            .unwrap();
        tokio::fs::write(&path, b"bytes").await.unwrap();

        let source = fixture
            .repository
            .provide_file_uri("item", "f1")
            .await
            .unwrap();
        assert_eq!(source, FileSource::Local(path));
    }
}
