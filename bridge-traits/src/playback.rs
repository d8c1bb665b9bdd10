//! Player engine seam.
//!
//! The audio engine itself lives in the host. The sync service only needs
//! to know where the playhead is, so the seam is a cheap snapshot getter
//! rather than a full player surface.

/// Instantaneous view of the player state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerSnapshot {
    /// Index into the item's ordered file list.
    pub file_index: usize,
    /// Seconds elapsed within the current file.
    pub position_in_file: f64,
    /// Total duration of the current file in seconds.
    pub file_duration: f64,
    /// Whether playback is currently advancing.
    pub is_playing: bool,
    /// Whether the player has reached the end of the queue.
    pub ended: bool,
}

/// Source of player snapshots.
pub trait PlayerHandle: Send + Sync {
    /// Current snapshot, or `None` when nothing is prepared.
    fn snapshot(&self) -> Option<PlayerSnapshot>;
}
