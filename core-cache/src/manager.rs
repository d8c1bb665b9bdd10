//! # Content Caching Manager
//!
//! Orchestrates cache runs: resolves the chapters a [`DownloadOption`]
//! asks for, subtracts what is already cached, streams the missing files
//! to their layout paths, and records the result in the metadata store.
//!
//! State is reported live through one `watch` channel per item id
//! (`Idle → Queued → Caching(0..1) → Completed | Error`). A failed run
//! evicts every chapter it touched, so a persisted cached flag always
//! means "fully on disk". Eviction is reference-counted through the
//! chapter↔file relation: a file survives as long as any still-cached
//! chapter needs it.

use crate::chapters::{
    calculate_requested_chapters, file_start_times, find_related_files,
    find_related_files_by_start_times,
};
use crate::error::{CacheError, Result};
use crate::layout::{CoverVariant, COVER_THUMB_WIDTH};
use crate::options::DownloadOption;
use crate::repository::LocalCacheRepository;
use crate::state::CacheState;
use bridge_traits::types::{BookFile, Chapter, DetailedItem};
use bridge_traits::MediaChannel;
use core_library::repositories::AccountScope;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Tuning for cache runs.
#[derive(Debug, Clone)]
pub struct CachingConfig {
    /// Minimum progress delta between emitted `Caching` states.
    pub progress_report_threshold: f64,

    /// Upper bound for one file transfer, connect to last byte.
    pub download_timeout: Duration,
}

impl Default for CachingConfig {
    fn default() -> Self {
        Self {
            progress_report_threshold: 0.01,
            download_timeout: Duration::from_secs(600),
        }
    }
}

/// Orchestrator for selective, resumable content downloads.
pub struct ContentCachingManager {
    local: Arc<LocalCacheRepository>,
    http: reqwest::Client,
    config: CachingConfig,
    states: Arc<Mutex<HashMap<String, watch::Sender<CacheState>>>>,
    runs: Mutex<HashMap<String, CancellationToken>>,
}

impl ContentCachingManager {
    pub fn new(local: Arc<LocalCacheRepository>, config: CachingConfig) -> Self {
        Self {
            local,
            http: reqwest::Client::new(),
            config,
            states: Arc::new(Mutex::new(HashMap::new())),
            runs: Mutex::new(HashMap::new()),
        }
    }

    fn state_sender(&self, item_id: &str) -> watch::Sender<CacheState> {
        self.states
            .lock()
            .expect("cache state lock")
            .entry(item_id.to_string())
            .or_insert_with(|| watch::channel(CacheState::Idle).0)
            .clone()
    }

    /// Live cache state for an item. The receiver immediately holds the
    /// current value.
    pub fn cache_state(&self, item_id: &str) -> watch::Receiver<CacheState> {
        self.state_sender(item_id).subscribe()
    }

    /// Start a cache run for `item`. Any run already active for the same
    /// item is cancelled first; runs for different items proceed
    /// independently (their writes go to disjoint paths).
    #[instrument(skip_all, fields(item_id = %item.id))]
    pub fn cache_media_item(
        &self,
        item: DetailedItem,
        option: DownloadOption,
        channel: Arc<dyn MediaChannel>,
        scope: AccountScope,
        current_total_position: f64,
    ) -> watch::Receiver<CacheState> {
        let sender = self.state_sender(&item.id);
        let token = CancellationToken::new();
        if let Some(previous) = self
            .runs
            .lock()
            .expect("cache run lock")
            .insert(item.id.clone(), token.clone())
        {
            previous.cancel();
        }

        sender.send_replace(CacheState::Queued);
        let receiver = sender.subscribe();

        let run = CacheRun {
            local: self.local.clone(),
            http: self.http.clone(),
            config: self.config.clone(),
            sender,
            token,
            scope,
        };
        tokio::spawn(async move {
            run.execute(item, option, channel, current_total_position)
                .await;
        });

        receiver
    }

    /// Signal the active run for an item to stop. Consumed cooperatively
    /// between file transfers; the interrupted run rolls its chapters
    /// back and returns to `Idle`.
    pub fn stop(&self, item_id: &str) {
        if let Some(token) = self.runs.lock().expect("cache run lock").get(item_id) {
            token.cancel();
        }
    }

    /// Evict one chapter. Files shared with other still-cached chapters
    /// survive; dropping the last cached chapter removes the whole item
    /// root.
    pub async fn drop_chapter(
        &self,
        item: &DetailedItem,
        chapter: &Chapter,
        scope: &AccountScope,
    ) -> Result<()> {
        drop_chapter(&self.local, item, chapter, scope).await
    }

    /// Evict everything cached for an item. Idempotent.
    pub async fn drop_item(&self, item_id: &str, scope: &AccountScope) -> Result<()> {
        drop_item(&self.local, item_id, scope).await
    }

    /// Reclaim space for already-listened content: evict every cached
    /// chapter that ends at or before the current progress.
    pub async fn drop_completed_chapters(
        &self,
        item: &DetailedItem,
        scope: &AccountScope,
    ) -> Result<()> {
        let current_time = item
            .progress
            .as_ref()
            .map(|progress| progress.current_time)
            .unwrap_or(0.0);

        let completed: Vec<&Chapter> = item
            .chapters
            .iter()
            .filter(|chapter| chapter.available && chapter.end <= current_time)
            .collect();

        for chapter in completed {
            drop_chapter(&self.local, item, chapter, scope).await?;
        }
        Ok(())
    }
}

enum MediaOutcome {
    Completed,
    Cancelled,
}

/// One executing cache run, detached from the manager.
struct CacheRun {
    local: Arc<LocalCacheRepository>,
    http: reqwest::Client,
    config: CachingConfig,
    sender: watch::Sender<CacheState>,
    token: CancellationToken,
    scope: AccountScope,
}

impl CacheRun {
    async fn execute(
        self,
        item: DetailedItem,
        option: DownloadOption,
        channel: Arc<dyn MediaChannel>,
        current_total_position: f64,
    ) {
        let requested = calculate_requested_chapters(&item, &option, current_total_position);

        let already_cached: HashSet<String> = match self.local.fetch_book(&item.id).await {
            Ok(Some(book)) => book
                .chapters
                .iter()
                .filter(|chapter| chapter.available)
                .map(|chapter| chapter.id.clone())
                .collect(),
            Ok(None) => HashSet::new(),
            Err(err) => {
                error!(%err, "failed to read cached chapters");
                self.sender.send_replace(CacheState::Error);
                return;
            }
        };

        let caching_chapters: Vec<Chapter> = requested
            .into_iter()
            .filter(|chapter| !already_cached.contains(&chapter.id))
            .collect();

        let start_times = file_start_times(&item.files);
        let mut seen = HashSet::new();
        let mut requested_files: Vec<BookFile> = Vec::new();
        for chapter in &caching_chapters {
            for file in find_related_files_by_start_times(chapter, &item.files, &start_times) {
                if seen.insert(file.id.clone()) {
                    requested_files.push(file.clone());
                }
            }
        }

        if requested_files.is_empty() {
            self.sender.send_replace(CacheState::Completed);
            return;
        }

        self.sender.send_replace(CacheState::Caching(0.0));

        let media_outcome = self
            .fetch_media(&item, &requested_files, channel.as_ref())
            .await;

        if !matches!(media_outcome, Ok(MediaOutcome::Cancelled)) {
            // Cover and library list ride along with every run,
            // best-effort in both directions.
            self.fetch_cover(&item, channel.as_ref()).await;
            self.fetch_libraries(channel.as_ref()).await;
        }

        match media_outcome {
            Ok(MediaOutcome::Completed) => {
                match self.local.cache_book_metadata(&item, &self.scope).await {
                    Ok(()) => {
                        info!(files = requested_files.len(), "cache run completed");
                        self.sender.send_replace(CacheState::Completed);
                    }
                    Err(err) => {
                        error!(%err, "failed to persist cache flags");
                        self.evict(&item, &caching_chapters).await;
                        self.sender.send_replace(CacheState::Error);
                    }
                }
            }
            Ok(MediaOutcome::Cancelled) => {
                debug!("cache run stopped");
                self.evict(&item, &caching_chapters).await;
                self.sender.send_replace(CacheState::Idle);
            }
            Err(err) => {
                error!(%err, "cache run failed");
                self.evict(&item, &caching_chapters).await;
                self.sender.send_replace(CacheState::Error);
            }
        }
    }

    /// Stream each requested file to its layout path, reporting overall
    /// fractional progress. The stop signal is consumed between files.
    async fn fetch_media(
        &self,
        item: &DetailedItem,
        files: &[BookFile],
        channel: &dyn MediaChannel,
    ) -> Result<MediaOutcome> {
        let total = files.len() as f64;
        let mut last_reported = -1.0;

        for (index, file) in files.iter().enumerate() {
            if self.token.is_cancelled() {
                return Ok(MediaOutcome::Cancelled);
            }

            let uri = channel.provide_file_uri(&item.id, &file.id).await?;
            let response = self
                .http
                .get(uri.as_str())
                .timeout(self.config.download_timeout)
                .send()
                .await
                .map_err(|err| CacheError::Download {
                    file_id: file.id.clone(),
                    message: err.to_string(),
                })?;

            if !response.status().is_success() {
                return Err(CacheError::Download {
                    file_id: file.id.clone(),
                    message: format!("unexpected status {}", response.status()),
                });
            }

            let content_length = response
                .content_length()
                .filter(|length| *length > 0)
                .unwrap_or(file.size.max(0) as u64);

            let destination = self.local.layout().media_path(&item.id, &file.id);
            if let Some(parent) = destination.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let mut output = tokio::fs::File::create(&destination).await?;

            let mut stream = response.bytes_stream();
            let mut received: u64 = 0;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|err| CacheError::Download {
                    file_id: file.id.clone(),
                    message: err.to_string(),
                })?;
                output.write_all(&chunk).await?;
                received += chunk.len() as u64;

                let file_fraction = match content_length > 0 {
                    true => (received as f64 / content_length as f64).min(1.0),
                    false => 0.0,
                };
                let overall = ((index as f64 + file_fraction) / total).min(1.0);
                if overall - last_reported >= self.config.progress_report_threshold
                    || overall >= 1.0
                {
                    self.sender.send_replace(CacheState::Caching(overall));
                    last_reported = overall;
                }
            }
            output.flush().await?;

            debug!(file_id = %file.id, bytes = received, "cached media file");
        }

        Ok(MediaOutcome::Completed)
    }

    async fn fetch_cover(&self, item: &DetailedItem, channel: &dyn MediaChannel) {
        for (variant, width) in [
            (CoverVariant::Raw, None),
            (CoverVariant::Thumb, Some(COVER_THUMB_WIDTH)),
        ] {
            match channel.fetch_book_cover(&item.id, width).await {
                Ok(bytes) => {
                    let path = self.local.layout().cover_path(&item.id, variant);
                    if let Some(parent) = path.parent() {
                        let _ = tokio::fs::create_dir_all(parent).await;
                    }
                    if let Err(err) = tokio::fs::write(&path, &bytes).await {
                        warn!(%err, "failed to store cover");
                    }
                }
                Err(err) => debug!(%err, "cover fetch skipped"),
            }
        }
    }

    async fn fetch_libraries(&self, channel: &dyn MediaChannel) {
        match channel.fetch_libraries().await {
            Ok(libraries) => {
                if let Err(err) = self.local.update_libraries(&libraries, &self.scope).await {
                    warn!(%err, "failed to cache library list");
                }
            }
            Err(err) => debug!(%err, "library list fetch skipped"),
        }
    }

    /// Roll back the chapters this run touched. They were never recorded
    /// as cached, so only their orphaned files need removing.
    async fn evict(&self, item: &DetailedItem, chapters: &[Chapter]) {
        for chapter in chapters {
            if let Err(err) = drop_chapter(&self.local, item, chapter, &self.scope).await {
                warn!(chapter_id = %chapter.id, %err, "rollback eviction failed");
            }
        }
    }
}

async fn drop_chapter(
    local: &LocalCacheRepository,
    item: &DetailedItem,
    chapter: &Chapter,
    scope: &AccountScope,
) -> Result<()> {
    local
        .cache_book(item, scope, &[], &[chapter.id.clone()])
        .await?;

    let still_cached: Vec<Chapter> = local
        .fetch_book(&item.id)
        .await?
        .map(|book| {
            book.chapters
                .into_iter()
                .filter(|chapter| chapter.available)
                .collect()
        })
        .unwrap_or_default();

    if still_cached.is_empty() {
        return drop_item(local, &item.id, scope).await;
    }

    let still_needed: HashSet<String> = still_cached
        .iter()
        .flat_map(|chapter| find_related_files(chapter, &item.files))
        .map(|file| file.id.clone())
        .collect();

    for file in find_related_files(chapter, &item.files) {
        if still_needed.contains(&file.id) {
            continue;
        }
        let path = local.layout().media_path(&item.id, &file.id);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tokio::fs::remove_file(&path).await?;
            debug!(file_id = %file.id, "removed orphaned media file");
        }
    }

    Ok(())
}

async fn drop_item(local: &LocalCacheRepository, item_id: &str, scope: &AccountScope) -> Result<()> {
    if let Some(book) = local.fetch_book(item_id).await? {
        let all_chapters: Vec<String> = book
            .chapters
            .iter()
            .map(|chapter| chapter.id.clone())
            .collect();
        local.cache_book(&book, scope, &[], &all_chapters).await?;
    }

    let root = local.layout().item_root(item_id);
    if tokio::fs::try_exists(&root).await.unwrap_or(false) {
        tokio::fs::remove_dir_all(&root).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::StorageLayout;
    use async_trait::async_trait;
    use bridge_traits::error::{ChannelError, Result as ChannelResult};
    use bridge_traits::types::{
        Book, Library, PagedItems, PlaybackProgress, PlaybackSession, RecentBook,
    };
    use bytes::Bytes;
    use core_library::create_test_pool;
    use tempfile::TempDir;

    struct FakeChannel {
        base_url: String,
    }

    #[async_trait]
    impl MediaChannel for FakeChannel {
        async fn fetch_libraries(&self) -> ChannelResult<Vec<Library>> {
            Ok(vec![])
        }

        async fn fetch_book(&self, item_id: &str) -> ChannelResult<DetailedItem> {
            Err(ChannelError::NotFound(item_id.to_string()))
        }

        async fn fetch_books(
            &self,
            _library_id: &str,
            _page_size: u32,
            _page_number: u32,
        ) -> ChannelResult<PagedItems<Book>> {
            Err(ChannelError::Unexpected("not used".into()))
        }

        async fn fetch_library_minified(&self, _library_id: &str) -> ChannelResult<Vec<Book>> {
            Err(ChannelError::Unexpected("not used".into()))
        }

        async fn fetch_recent_listened_books(
            &self,
            _library_id: &str,
        ) -> ChannelResult<Vec<RecentBook>> {
            Err(ChannelError::Unexpected("not used".into()))
        }

        async fn search_books(
            &self,
            _library_id: &str,
            _query: &str,
            _limit: u32,
        ) -> ChannelResult<Vec<Book>> {
            Err(ChannelError::Unexpected("not used".into()))
        }

        async fn start_playback(
            &self,
            _item_id: &str,
            _chapter_id: &str,
            _device_id: &str,
            _supported_mime_types: &[String],
        ) -> ChannelResult<PlaybackSession> {
            Err(ChannelError::Unexpected("not used".into()))
        }

        async fn sync_progress(
            &self,
            _session_id: &str,
            _item_id: &str,
            _progress: &PlaybackProgress,
        ) -> ChannelResult<()> {
            Err(ChannelError::Unexpected("not used".into()))
        }

        async fn fetch_book_cover(
            &self,
            _item_id: &str,
            _width: Option<u32>,
        ) -> ChannelResult<Bytes> {
            Err(ChannelError::Network("offline".into()))
        }

        async fn provide_file_uri(&self, _item_id: &str, file_id: &str) -> ChannelResult<String> {
            Ok(format!("{}/{}", self.base_url, file_id))
        }
    }

    fn chapter(id: &str, start: f64, end: f64, available: bool) -> Chapter {
        Chapter {
            id: id.to_string(),
            title: id.to_string(),
            start,
            end,
            duration: end - start,
            available,
        }
    }

    fn file(id: &str, duration: f64) -> BookFile {
        BookFile {
            id: id.to_string(),
            name: format!("{id}.mp3"),
            duration,
            mime_type: "audio/mpeg".to_string(),
            size: 0,
        }
    }

    fn two_file_item() -> DetailedItem {
        DetailedItem {
            id: "item".to_string(),
            title: "Item".to_string(),
            subtitle: None,
            author: None,
            narrator: None,
            publisher: None,
            year: None,
            synopsis: None,
            series: vec![],
            files: vec![file("f1", 100.0), file("f2", 100.0)],
            chapters: vec![
                chapter("a", 0.0, 100.0, false),
                chapter("b", 100.0, 200.0, false),
            ],
            progress: None,
            library_id: Some("lib-1".to_string()),
            library_type: None,
            created_at: 1,
            updated_at: 1,
        }
    }

    async fn setup() -> (Arc<LocalCacheRepository>, ContentCachingManager, TempDir) {
        let dir = TempDir::new().unwrap();
        let layout = Arc::new(StorageLayout::with_base(dir.path()).unwrap());
        let pool = create_test_pool().await.unwrap();
        let local = Arc::new(LocalCacheRepository::new(pool, layout));
        let manager = ContentCachingManager::new(local.clone(), CachingConfig::default());
        (local, manager, dir)
    }

    async fn wait_terminal(mut receiver: watch::Receiver<CacheState>) -> CacheState {
        tokio::time::timeout(Duration::from_secs(15), async move {
            loop {
                let state = *receiver.borrow();
                if state.is_terminal() {
                    return state;
                }
                receiver.changed().await.expect("state channel closed");
            }
        })
        .await
        .expect("cache run did not finish in time")
    }

    #[tokio::test]
    async fn successful_run_caches_files_and_flags() {
        let (local, manager, _dir) = setup().await;
        let mut server = mockito::Server::new_async().await;
        let _mock_f1 = server
            .mock("GET", "/f1")
            .with_body(vec![1u8; 4096])
            .create_async()
            .await;
        let _mock_f2 = server
            .mock("GET", "/f2")
            .with_body(vec![2u8; 4096])
            .create_async()
            .await;

        let channel = Arc::new(FakeChannel {
            base_url: server.url(),
        });
        let scope = AccountScope::new("host", "user");
        let item = two_file_item();

        let receiver = manager.cache_media_item(
            item.clone(),
            DownloadOption::All,
            channel,
            scope,
            0.0,
        );
        assert_eq!(wait_terminal(receiver).await, CacheState::Completed);

        assert!(local.provide_file_uri("item", "f1").await.is_some());
        assert!(local.provide_file_uri("item", "f2").await.is_some());
        assert!(local.is_chapter_cached("item", "a").await.unwrap());
        assert!(local.is_chapter_cached("item", "b").await.unwrap());
    }

    #[tokio::test]
    async fn failed_transfer_evicts_the_whole_run() {
        let (local, manager, _dir) = setup().await;
        let mut server = mockito::Server::new_async().await;
        let _mock_f1 = server
            .mock("GET", "/f1")
            .with_body(vec![1u8; 4096])
            .create_async()
            .await;
        let _mock_f2 = server
            .mock("GET", "/f2")
            .with_status(500)
            .create_async()
            .await;

        let channel = Arc::new(FakeChannel {
            base_url: server.url(),
        });
        let scope = AccountScope::new("host", "user");
        let item = two_file_item();

        let receiver = manager.cache_media_item(
            item.clone(),
            DownloadOption::All,
            channel,
            scope,
            0.0,
        );
        assert_eq!(wait_terminal(receiver).await, CacheState::Error);

        // Neither chapter is recorded cached and the partial file is gone.
        assert!(!local.has_cached_chapters("item").await.unwrap());
        assert!(local.provide_file_uri("item", "f1").await.is_none());
        assert!(local.provide_file_uri("item", "f2").await.is_none());
    }

    #[tokio::test]
    async fn fully_cached_request_completes_without_network() {
        let (local, manager, _dir) = setup().await;
        let scope = AccountScope::new("host", "user");
        let item = two_file_item();

        local
            .cache_book(&item, &scope, &["a".to_string(), "b".to_string()], &[])
            .await
            .unwrap();

        // The channel would fail every call; it must never be reached.
        let channel = Arc::new(FakeChannel {
            base_url: "http://127.0.0.1:9".to_string(),
        });

        let receiver =
            manager.cache_media_item(item, DownloadOption::All, channel, scope, 0.0);
        assert_eq!(wait_terminal(receiver).await, CacheState::Completed);
    }

    #[tokio::test]
    async fn dropping_a_chapter_spares_shared_files() {
        let (local, manager, _dir) = setup().await;
        let scope = AccountScope::new("host", "user");

        // One physical file serving both chapters.
        let mut item = two_file_item();
        item.files = vec![file("shared", 200.0)];
        item.chapters = vec![
            chapter("a", 0.0, 100.0, true),
            chapter("b", 100.0, 200.0, true),
        ];

        let path = local.layout().media_path("item", "shared");
        tokio::fs::create_dir_all(path.parent().unwrap())
            .await
            .unwrap();
        tokio::fs::write(&path, b"bytes").await.unwrap();
        local
            .cache_book(&item, &scope, &["a".to_string(), "b".to_string()], &[])
            .await
            .unwrap();

        manager
            .drop_chapter(&item, &item.chapters[0], &scope)
            .await
            .unwrap();

        // b still needs the shared file.
        assert!(tokio::fs::try_exists(&path).await.unwrap());
        assert!(!local.is_chapter_cached("item", "a").await.unwrap());
        assert!(local.is_chapter_cached("item", "b").await.unwrap());

        manager
            .drop_chapter(&item, &item.chapters[1], &scope)
            .await
            .unwrap();

        // Last reference gone: the whole item root is removed.
        assert!(!tokio::fs::try_exists(&path).await.unwrap());
        assert!(!local.has_cached_chapters("item").await.unwrap());
    }

    #[tokio::test]
    async fn repeated_item_drop_is_idempotent() {
        let (local, manager, _dir) = setup().await;
        let scope = AccountScope::new("host", "user");
        let item = two_file_item();

        let path = local.layout().media_path("item", "f1");
        tokio::fs::create_dir_all(path.parent().unwrap())
            .await
            .unwrap();
        tokio::fs::write(&path, b"bytes").await.unwrap();
        local
            .cache_book(&item, &scope, &["a".to_string()], &[])
            .await
            .unwrap();

        manager.drop_item("item", &scope).await.unwrap();
        assert!(!local.has_cached_chapters("item").await.unwrap());
        assert!(!tokio::fs::try_exists(&path).await.unwrap());

        // Second drop finds nothing to do and reports success.
        manager.drop_item("item", &scope).await.unwrap();
        manager.drop_item("missing-item", &scope).await.unwrap();
    }

    #[tokio::test]
    async fn completed_chapters_are_reclaimed() {
        let (local, manager, _dir) = setup().await;
        let scope = AccountScope::new("host", "user");

        let mut item = two_file_item();
        item.chapters = vec![
            chapter("a", 0.0, 100.0, true),
            chapter("b", 100.0, 200.0, true),
        ];
        item.progress = Some(bridge_traits::types::MediaProgress {
            current_time: 150.0,
            is_finished: false,
            last_update: 1,
        });

        for file_id in ["f1", "f2"] {
            let path = local.layout().media_path("item", file_id);
            tokio::fs::create_dir_all(path.parent().unwrap())
                .await
                .unwrap();
            tokio::fs::write(&path, b"bytes").await.unwrap();
        }
        local
            .cache_book(&item, &scope, &["a".to_string(), "b".to_string()], &[])
            .await
            .unwrap();

        manager.drop_completed_chapters(&item, &scope).await.unwrap();

        // a ended before the playhead, b has not.
        assert!(!local.is_chapter_cached("item", "a").await.unwrap());
        assert!(local.is_chapter_cached("item", "b").await.unwrap());
        assert!(local.provide_file_uri("item", "f1").await.is_none());
        assert!(local.provide_file_uri("item", "f2").await.is_some());
    }
}
