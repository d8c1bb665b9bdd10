//! Hand-written fakes with call recording, shared by the crate's tests.

use async_trait::async_trait;
use bridge_traits::error::{ChannelError, Result as ChannelResult};
use bridge_traits::playback::{PlayerHandle, PlayerSnapshot};
use bridge_traits::types::{
    Book, BookFile, Chapter, DetailedItem, Library, PagedItems, PlaybackProgress, PlaybackSession,
    RecentBook,
};
use bridge_traits::{MediaChannel, NetworkMonitor};
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;

/// Scriptable channel fake recording every remote interaction.
#[derive(Default)]
pub(crate) struct FakeChannel {
    pub books: Mutex<HashMap<String, DetailedItem>>,
    pub libraries: Mutex<Vec<Library>>,
    pub minified: Mutex<Vec<Book>>,
    pub recents: Mutex<Vec<RecentBook>>,
    pub paged: Mutex<Vec<Book>>,
    pub search_results: Mutex<Vec<Book>>,
    /// When set, every call fails with a transient network error.
    pub offline: AtomicBool,
    /// Scripted outcomes for `sync_progress`, consumed in order;
    /// exhausted scripts answer `Ok`.
    pub scripted_sync: Mutex<VecDeque<ChannelResult<()>>>,
    pub sync_delay: Mutex<Duration>,

    pub fetch_book_calls: Mutex<Vec<String>>,
    pub fetch_books_calls: AtomicUsize,
    pub search_calls: AtomicUsize,
    pub sync_calls: Mutex<Vec<(String, String, f64)>>,
    pub start_playback_calls: Mutex<Vec<(String, String)>>,
    pub concurrent_syncs: AtomicUsize,
    pub max_concurrent_syncs: AtomicUsize,
    session_counter: AtomicUsize,
}

impl FakeChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_online(&self) -> ChannelResult<()> {
        match self.offline.load(Ordering::SeqCst) {
            true => Err(ChannelError::Network("offline".into())),
            false => Ok(()),
        }
    }
}

#[async_trait]
impl MediaChannel for FakeChannel {
    async fn fetch_libraries(&self) -> ChannelResult<Vec<Library>> {
        self.check_online()?;
        Ok(self.libraries.lock().unwrap().clone())
    }

    async fn fetch_book(&self, item_id: &str) -> ChannelResult<DetailedItem> {
        self.fetch_book_calls
            .lock()
            .unwrap()
            .push(item_id.to_string());
        self.check_online()?;
        self.books
            .lock()
            .unwrap()
            .get(item_id)
            .cloned()
            .ok_or_else(|| ChannelError::NotFound(item_id.to_string()))
    }

    async fn fetch_books(
        &self,
        _library_id: &str,
        _page_size: u32,
        page_number: u32,
    ) -> ChannelResult<PagedItems<Book>> {
        self.fetch_books_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        let items = self.paged.lock().unwrap().clone();
        Ok(PagedItems {
            total_items: items.len() as u64,
            current_page: page_number,
            items,
        })
    }

    async fn fetch_library_minified(&self, _library_id: &str) -> ChannelResult<Vec<Book>> {
        self.check_online()?;
        Ok(self.minified.lock().unwrap().clone())
    }

    async fn fetch_recent_listened_books(
        &self,
        _library_id: &str,
    ) -> ChannelResult<Vec<RecentBook>> {
        self.check_online()?;
        Ok(self.recents.lock().unwrap().clone())
    }

    async fn search_books(
        &self,
        _library_id: &str,
        _query: &str,
        _limit: u32,
    ) -> ChannelResult<Vec<Book>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        Ok(self.search_results.lock().unwrap().clone())
    }

    async fn start_playback(
        &self,
        item_id: &str,
        chapter_id: &str,
        _device_id: &str,
        _supported_mime_types: &[String],
    ) -> ChannelResult<PlaybackSession> {
        self.start_playback_calls
            .lock()
            .unwrap()
            .push((item_id.to_string(), chapter_id.to_string()));
        self.check_online()?;
        let count = self.session_counter.fetch_add(1, Ordering::SeqCst);
        Ok(PlaybackSession {
            session_id: format!("session-{count}"),
            item_id: item_id.to_string(),
        })
    }

    async fn sync_progress(
        &self,
        session_id: &str,
        item_id: &str,
        progress: &PlaybackProgress,
    ) -> ChannelResult<()> {
        let current = self.concurrent_syncs.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent_syncs
            .fetch_max(current, Ordering::SeqCst);

        let delay = *self.sync_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.concurrent_syncs.fetch_sub(1, Ordering::SeqCst);
        self.sync_calls.lock().unwrap().push((
            session_id.to_string(),
            item_id.to_string(),
            progress.current_total_time,
        ));

        if let Err(offline) = self.check_online() {
            return Err(offline);
        }
        self.scripted_sync
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn fetch_book_cover(
        &self,
        _item_id: &str,
        _width: Option<u32>,
    ) -> ChannelResult<Bytes> {
        self.check_online()?;
        Ok(Bytes::from_static(b"cover-bytes"))
    }

    async fn provide_file_uri(&self, item_id: &str, file_id: &str) -> ChannelResult<String> {
        self.check_online()?;
        Ok(format!("http://remote/{item_id}/{file_id}"))
    }
}

/// Network monitor with directly settable state.
pub(crate) struct StaticNetwork {
    network: watch::Sender<bool>,
    server: watch::Sender<bool>,
}

impl StaticNetwork {
    pub fn new(network: bool, server: bool) -> Self {
        Self {
            network: watch::channel(network).0,
            server: watch::channel(server).0,
        }
    }

    pub fn set_server(&self, available: bool) {
        self.server.send_replace(available);
    }
}

#[async_trait]
impl NetworkMonitor for StaticNetwork {
    fn is_network_available(&self) -> bool {
        *self.network.borrow()
    }

    fn is_server_available(&self) -> bool {
        *self.server.borrow()
    }

    fn subscribe_network(&self) -> watch::Receiver<bool> {
        self.network.subscribe()
    }

    fn subscribe_server(&self) -> watch::Receiver<bool> {
        self.server.subscribe()
    }

    async fn refresh(&self) {}
}

/// Player handle fed from the test body.
#[derive(Default)]
pub(crate) struct FakePlayer {
    snapshot: Mutex<Option<PlayerSnapshot>>,
}

impl FakePlayer {
    pub fn set(&self, snapshot: Option<PlayerSnapshot>) {
        *self.snapshot.lock().unwrap() = snapshot;
    }
}

impl PlayerHandle for FakePlayer {
    fn snapshot(&self) -> Option<PlayerSnapshot> {
        *self.snapshot.lock().unwrap()
    }
}

pub(crate) fn chapter(id: &str, start: f64, end: f64) -> Chapter {
    Chapter {
        id: id.to_string(),
        title: id.to_string(),
        start,
        end,
        duration: end - start,
        available: false,
    }
}

pub(crate) fn file(id: &str, duration: f64) -> BookFile {
    BookFile {
        id: id.to_string(),
        name: format!("{id}.mp3"),
        duration,
        mime_type: "audio/mpeg".to_string(),
        size: 0,
    }
}

pub(crate) fn item(id: &str, chapters: Vec<Chapter>, files: Vec<BookFile>) -> DetailedItem {
    DetailedItem {
        id: id.to_string(),
        title: format!("Title {id}"),
        subtitle: None,
        author: Some("Author".to_string()),
        narrator: None,
        publisher: None,
        year: None,
        synopsis: None,
        series: vec![],
        files,
        chapters,
        progress: None,
        library_id: Some("lib-1".to_string()),
        library_type: None,
        created_at: 100,
        updated_at: 200,
    }
}

pub(crate) fn book(id: &str, updated_at: i64) -> Book {
    Book {
        id: id.to_string(),
        title: format!("Title {id}"),
        subtitle: None,
        author: Some("Author".to_string()),
        series: None,
        duration: 100.0,
        library_id: Some("lib-1".to_string()),
        added_at: updated_at,
        updated_at,
    }
}
