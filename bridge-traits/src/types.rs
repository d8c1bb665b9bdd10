//! Domain types exchanged with the remote media channel.
//!
//! These are plain values: the metadata store keeps its own row
//! representations and converts at its boundary.

use serde::{Deserialize, Serialize};

/// Kind of a remote library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LibraryType {
    Library,
    Podcast,
    Unknown,
}

impl LibraryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LibraryType::Library => "LIBRARY",
            LibraryType::Podcast => "PODCAST",
            LibraryType::Unknown => "UNKNOWN",
        }
    }

    /// Parse a persisted value; anything unrecognized maps to `Unknown`.
    pub fn parse(value: &str) -> Self {
        match value {
            "LIBRARY" => LibraryType::Library,
            "PODCAST" => LibraryType::Podcast,
            _ => LibraryType::Unknown,
        }
    }
}

/// A user-facing grouping of items on the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Library {
    pub id: String,
    pub title: String,
    pub library_type: LibraryType,
}

/// Series membership of an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookSeries {
    pub name: String,
    pub serial_number: Option<String>,
}

/// A physical media unit belonging to an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookFile {
    pub id: String,
    pub name: String,
    /// Seconds.
    pub duration: f64,
    pub mime_type: String,
    /// Bytes, zero when the server did not report one.
    pub size: i64,
}

/// A logical playback segment with a time range within an item.
///
/// `available` means the chapter can start playing right now: either all
/// of its related files are on disk, or the caller has widened the flag
/// because the server is reachable. Only the on-disk state is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: String,
    pub title: String,
    /// Seconds from the start of the whole item.
    pub start: f64,
    pub end: f64,
    pub duration: f64,
    pub available: bool,
}

/// Listening progress for one item. Exactly one per item; conflicts are
/// resolved last-write-wins on `last_update`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MediaProgress {
    /// Seconds into the whole item.
    pub current_time: f64,
    pub is_finished: bool,
    /// Wall-clock timestamp, epoch milliseconds.
    pub last_update: i64,
}

/// Full item detail: metadata, ordered chapters and files, progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedItem {
    pub id: String,
    pub title: String,
    pub subtitle: Option<String>,
    pub author: Option<String>,
    pub narrator: Option<String>,
    pub publisher: Option<String>,
    pub year: Option<String>,
    pub synopsis: Option<String>,
    pub series: Vec<BookSeries>,
    pub files: Vec<BookFile>,
    pub chapters: Vec<Chapter>,
    pub progress: Option<MediaProgress>,
    pub library_id: Option<String>,
    pub library_type: Option<LibraryType>,
    /// Epoch milliseconds, as reported by the server.
    pub created_at: i64,
    pub updated_at: i64,
}

impl DetailedItem {
    /// Total playable duration in seconds, summed over chapters.
    pub fn total_duration(&self) -> f64 {
        self.chapters.iter().map(|chapter| chapter.duration).sum()
    }

    /// Whether every chapter is currently marked available.
    pub fn all_chapters_available(&self) -> bool {
        self.chapters.iter().all(|chapter| chapter.available)
    }

    /// Collapse to the summary representation used by list views.
    pub fn to_summary(&self) -> Book {
        Book {
            id: self.id.clone(),
            title: self.title.clone(),
            subtitle: self.subtitle.clone(),
            author: self.author.clone(),
            series: match self.series.is_empty() {
                true => None,
                false => Some(
                    self.series
                        .iter()
                        .map(|series| series.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                ),
            },
            duration: self.total_duration(),
            library_id: self.library_id.clone(),
            added_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Summary of an item, as shown in library listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: String,
    pub title: String,
    pub subtitle: Option<String>,
    pub author: Option<String>,
    /// Display form of the series names, if any.
    pub series: Option<String>,
    /// Seconds.
    pub duration: f64,
    pub library_id: Option<String>,
    /// Epoch milliseconds.
    pub added_at: i64,
    pub updated_at: i64,
}

/// An item with in-progress listening activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentBook {
    pub id: String,
    pub title: String,
    pub author: Option<String>,
    /// Fraction of the item listened, when a duration is known.
    pub listened_percentage: Option<f64>,
    /// Epoch milliseconds of the latest progress write.
    pub listened_last_update: Option<i64>,
}

/// One page of a listing query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagedItems<T> {
    pub items: Vec<T>,
    pub current_page: u32,
    pub total_items: u64,
}

/// Position payload pushed to the server while playing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaybackProgress {
    /// Seconds into the whole item.
    pub current_total_time: f64,
    /// Seconds into the active chapter.
    pub current_chapter_time: f64,
}

/// Server-issued token correlating progress pushes with one playback start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackSession {
    pub session_id: String,
    pub item_id: String,
}
