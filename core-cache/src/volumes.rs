//! Storage-shape classification.
//!
//! Items arrive from servers in three physical shapes, and download UIs
//! present them differently: one big archive, a handful of multi-chapter
//! volumes, or one file per chapter.

use crate::chapters::{file_start_times, find_related_files_by_start_times};
use crate::layout::StorageLayout;
use bridge_traits::types::{Chapter, DetailedItem};
use serde::{Deserialize, Serialize};

/// How an item is physically stored on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookStorageType {
    /// The entire item is a single physical file.
    Monolith,
    /// Multiple files, each spanning several chapters.
    Segmented,
    /// Exactly one file per chapter.
    Atomic,
}

/// A physical file presented as a user-facing volume, carrying the
/// chapters it serves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookVolume {
    pub id: String,
    pub name: String,
    pub size: i64,
    pub chapters: Vec<Chapter>,
    pub is_downloaded: bool,
}

/// Classify an item's physical shape.
pub fn storage_type(item: &DetailedItem) -> BookStorageType {
    match item.files.len() {
        0 | 1 => BookStorageType::Monolith,
        n if n == item.chapters.len() => BookStorageType::Atomic,
        _ => BookStorageType::Segmented,
    }
}

/// Map an item's files to volumes, checking the layout for on-disk
/// presence.
pub async fn map_chapters_to_volumes(
    item: &DetailedItem,
    layout: &StorageLayout,
) -> Vec<BookVolume> {
    let start_times = file_start_times(&item.files);
    let mut volumes = Vec::with_capacity(item.files.len());

    for file in &item.files {
        let chapters: Vec<Chapter> = item
            .chapters
            .iter()
            .filter(|chapter| {
                find_related_files_by_start_times(chapter, &item.files, &start_times)
                    .iter()
                    .any(|related| related.id == file.id)
            })
            .cloned()
            .collect();

        let path = layout.media_path(&item.id, &file.id);
        let is_downloaded = tokio::fs::try_exists(&path).await.unwrap_or(false);

        volumes.push(BookVolume {
            id: file.id.clone(),
            name: file.name.clone(),
            size: file.size,
            chapters,
            is_downloaded,
        });
    }

    volumes
}
