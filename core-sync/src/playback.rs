//! Playback synchronization service.
//!
//! While an item plays, progress is pushed to the server on an adaptive
//! cadence: player events trigger an immediate attempt, and a background
//! loop re-triggers on a short interval near the edges of the current
//! file and a longer one otherwise.
//!
//! Every attempt passes through a non-blocking try-lock. A skipped
//! attempt is *not* queued; that is deliberate, bounding the service to
//! at most one in-flight remote sync call and ruling out duplicate or
//! out-of-order session creation. Each iteration catches its own
//! failures, so no single error kills the loop.

use crate::repository::MediaRepository;
use bridge_traits::playback::{PlayerHandle, PlayerSnapshot};
use bridge_traits::types::{DetailedItem, PlaybackProgress, PlaybackSession};
use core_cache::chapters::{calculate_chapter_index, calculate_chapter_position};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Cadence tuning for the sync loop.
#[derive(Debug, Clone)]
pub struct PlaybackSyncConfig {
    /// Steady-state interval between sync attempts.
    pub interval_long: Duration,
    /// Interval near the start or end of the current file.
    pub interval_short: Duration,
    /// Distance from a file edge that counts as "near".
    pub edge_window: Duration,
    /// Mime types advertised when opening playback sessions.
    pub supported_mime_types: Vec<String>,
}

impl Default for PlaybackSyncConfig {
    fn default() -> Self {
        let interval_long = Duration::from_secs(10);
        Self {
            interval_long,
            interval_short: Duration::from_secs(5),
            edge_window: interval_long * 2 - Duration::from_millis(1),
            supported_mime_types: vec![
                "audio/flac".to_string(),
                "audio/mp4".to_string(),
                "audio/aac".to_string(),
                "audio/mpeg".to_string(),
                "audio/ogg".to_string(),
            ],
        }
    }
}

#[derive(Default)]
struct SyncState {
    current_item: Option<DetailedItem>,
    chapter_index: Option<usize>,
    session: Option<PlaybackSession>,
}

struct SyncInner {
    repository: Arc<MediaRepository>,
    player: Arc<dyn PlayerHandle>,
    config: PlaybackSyncConfig,
    state: Mutex<SyncState>,
    sync_guard: Mutex<()>,
    loop_running: AtomicBool,
    loop_token: std::sync::Mutex<Option<CancellationToken>>,
}

/// Keeps remote progress approximately current while an item plays.
pub struct PlaybackSyncService {
    inner: Arc<SyncInner>,
}

impl PlaybackSyncService {
    pub fn new(
        repository: Arc<MediaRepository>,
        player: Arc<dyn PlayerHandle>,
        config: PlaybackSyncConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                repository,
                player,
                config,
                state: Mutex::new(SyncState::default()),
                sync_guard: Mutex::new(()),
                loop_running: AtomicBool::new(false),
                loop_token: std::sync::Mutex::new(None),
            }),
        }
    }

    /// Begin synchronizing a newly prepared item. Any loop for the
    /// previous item is cancelled and its session forgotten.
    pub async fn start_synchronization(&self, item: DetailedItem) {
        self.cancel_loop();
        {
            let mut state = self.inner.state.lock().await;
            *state = SyncState {
                current_item: Some(item),
                chapter_index: None,
                session: None,
            };
        }
        sync_once(self.inner.clone()).await;
    }

    /// Stop the loop (service shutdown, playback teardown).
    pub fn cancel(&self) {
        self.cancel_loop();
    }

    /// Player event of interest (transition, play/pause, state change,
    /// seek): trigger an immediate attempt and make sure the loop runs
    /// while playback is ongoing.
    pub fn on_player_event(&self) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            sync_once(inner).await;
        });

        self.ensure_loop();
    }

    /// One guarded sync attempt, awaited to completion. Skipped entirely
    /// when another attempt is still in flight.
    pub async fn sync_now(&self) {
        sync_once(self.inner.clone()).await;
    }

    fn cancel_loop(&self) {
        if let Some(token) = self.inner.loop_token.lock().expect("loop token lock").take() {
            token.cancel();
        }
    }

    fn ensure_loop(&self) {
        let inner = self.inner.clone();
        if inner.loop_running.swap(true, Ordering::SeqCst) {
            return;
        }

        let token = CancellationToken::new();
        *inner.loop_token.lock().expect("loop token lock") = Some(token.clone());

        tokio::spawn(async move {
            loop {
                let Some(snapshot) = inner.player.snapshot() else {
                    break;
                };
                if !snapshot.is_playing || snapshot.ended {
                    break;
                }

                let edge = inner.config.edge_window.as_secs_f64();
                let near_start = snapshot.position_in_file < edge;
                let near_end = snapshot.file_duration - snapshot.position_in_file < edge;
                let interval = match near_start || near_end {
                    true => inner.config.interval_short,
                    false => inner.config.interval_long,
                };

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                sync_once(inner.clone()).await;
            }

            inner.loop_running.store(false, Ordering::SeqCst);
        });
    }
}

/// Total time is the sum of the durations of the files preceding the
/// current one plus the elapsed time within it; chapter-local time is
/// total time minus the active chapter's start offset.
pub(crate) fn compute_progress(item: &DetailedItem, snapshot: &PlayerSnapshot) -> PlaybackProgress {
    let preceding: f64 = item
        .files
        .iter()
        .take(snapshot.file_index)
        .map(|file| file.duration)
        .sum();
    let current_total_time = preceding + snapshot.position_in_file;

    PlaybackProgress {
        current_total_time,
        current_chapter_time: calculate_chapter_position(item, current_total_time),
    }
}

async fn sync_once(inner: Arc<SyncInner>) {
    let Some(snapshot) = inner.player.snapshot() else {
        return;
    };

    let (item, session, last_index) = {
        let state = inner.state.lock().await;
        (
            state.current_item.clone(),
            state.session.clone(),
            state.chapter_index,
        )
    };
    let Some(item) = item else {
        return;
    };

    let progress = compute_progress(&item, &snapshot);
    debug!(item_id = %item.id, total = progress.current_total_time, "sync attempt");

    // Non-blocking: a concurrent attempt skips instead of queueing.
    let Ok(_guard) = inner.sync_guard.try_lock() else {
        debug!("sync already in flight, skipping");
        return;
    };

    let current_index = calculate_chapter_index(&item, progress.current_total_time);

    let mut active_session = session.filter(|session| session.item_id == item.id);
    if active_session.is_none() || last_index != Some(current_index) {
        active_session = open_session(&inner, &item, current_index).await;
        let mut state = inner.state.lock().await;
        state.session = active_session.clone();
        state.chapter_index = Some(current_index);
    }

    // Local progress is never skipped, whatever the network is doing.
    if let Err(err) = inner
        .repository
        .sync_local_progress(&item.id, &progress)
        .await
    {
        warn!(%err, "failed to record local progress");
    }

    let Some(active_session) = active_session else {
        return;
    };

    match inner
        .repository
        .sync_progress(&active_session.session_id, &item.id, &progress)
        .await
    {
        Ok(()) => {}
        Err(err) if err.is_not_found() => {
            // The server dropped the session; open a replacement and let
            // the next tick retry rather than looping here.
            debug!("session rejected, reopening for the next tick");
            let replacement = open_session(&inner, &item, current_index).await;
            inner.state.lock().await.session = replacement;
        }
        Err(err) => debug!(%err, "remote progress push failed"),
    }
}

async fn open_session(
    inner: &Arc<SyncInner>,
    item: &DetailedItem,
    chapter_index: usize,
) -> Option<PlaybackSession> {
    let chapter = item.chapters.get(chapter_index)?;
    match inner
        .repository
        .start_playback(&item.id, &chapter.id, &inner.config.supported_mime_types)
        .await
    {
        Ok(session) => Some(session),
        Err(err) => {
            debug!(%err, "failed to open playback session");
            None
        }
    }
}
