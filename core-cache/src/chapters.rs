//! Chapter index math and the chapter↔file time-overlap relation.
//!
//! A chapter maps to one or more files by overlap of their time ranges.
//! File start positions are derived from the ordered file list (running
//! sum of durations). The relation is computed, never stored, so it
//! cannot drift from the metadata it was derived from.

use crate::options::DownloadOption;
use bridge_traits::types::{BookFile, Chapter, DetailedItem};

/// Cumulative start position of each file, in item order.
pub fn file_start_times(files: &[BookFile]) -> Vec<f64> {
    let mut starts = Vec::with_capacity(files.len());
    let mut acc = 0.0;
    for file in files {
        starts.push(acc);
        acc += file.duration;
    }
    starts
}

fn is_related(chapter: &Chapter, file_start: f64, file_duration: f64) -> bool {
    let file_end = file_start + file_duration;
    let starts_within = file_start >= chapter.start && file_start < chapter.end;
    let spans_overlap = file_start < chapter.end && file_end > chapter.start;
    starts_within || spans_overlap
}

/// Files related to a chapter, given precomputed start times.
pub fn find_related_files_by_start_times<'a>(
    chapter: &Chapter,
    files: &'a [BookFile],
    start_times: &[f64],
) -> Vec<&'a BookFile> {
    files
        .iter()
        .zip(start_times)
        .filter(|(file, start)| is_related(chapter, **start, file.duration))
        .map(|(file, _)| file)
        .collect()
}

/// Files related to a chapter, deriving start times from the file order.
pub fn find_related_files<'a>(chapter: &Chapter, files: &'a [BookFile]) -> Vec<&'a BookFile> {
    let start_times = file_start_times(files);
    find_related_files_by_start_times(chapter, files, &start_times)
}

/// Index of the chapter containing `total_position`, falling back to the
/// last chapter when the position runs past the end. Zero for an item
/// without chapters; pair with `.get()` lookups.
pub fn calculate_chapter_index(item: &DetailedItem, total_position: f64) -> usize {
    item.chapters
        .iter()
        .position(|chapter| total_position >= chapter.start && total_position < chapter.end)
        .unwrap_or_else(|| item.chapters.len().saturating_sub(1))
}

/// Chapter-local position: total time minus the active chapter's start.
pub fn calculate_chapter_position(item: &DetailedItem, total_position: f64) -> f64 {
    match item.chapters.get(calculate_chapter_index(item, total_position)) {
        Some(chapter) => (total_position - chapter.start).max(0.0),
        None => total_position,
    }
}

/// Resolve which chapters a download option asks for, relative to the
/// current playback position.
pub fn calculate_requested_chapters(
    item: &DetailedItem,
    option: &DownloadOption,
    current_total_position: f64,
) -> Vec<Chapter> {
    let index = calculate_chapter_index(item, current_total_position);
    let chapters = &item.chapters;

    match option {
        DownloadOption::All => chapters.clone(),
        DownloadOption::Current => chapters.get(index).cloned().into_iter().collect(),
        DownloadOption::NextN(count) => {
            let start = index.min(chapters.len());
            let end = (index + *count as usize).min(chapters.len());
            chapters[start..end].to_vec()
        }
        DownloadOption::Remaining => {
            let start = index.min(chapters.len());
            chapters[start..].to_vec()
        }
        DownloadOption::SpecificFiles(file_ids) => {
            let start_times = file_start_times(&item.files);
            chapters
                .iter()
                .filter(|chapter| {
                    find_related_files_by_start_times(chapter, &item.files, &start_times)
                        .iter()
                        .any(|file| file_ids.contains(&file.id))
                })
                .cloned()
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapter(id: &str, start: f64, end: f64) -> Chapter {
        Chapter {
            id: id.to_string(),
            title: id.to_string(),
            start,
            end,
            duration: end - start,
            available: false,
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

    /// Item with 3 chapters (0–100, 100–250, 250–400) over 2 files
    /// (0–180, 180–400).
    fn item() -> DetailedItem {
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
            files: vec![file("f1", 180.0), file("f2", 220.0)],
            chapters: vec![
                chapter("c0", 0.0, 100.0),
                chapter("c1", 100.0, 250.0),
                chapter("c2", 250.0, 400.0),
            ],
            progress: None,
            library_id: None,
            library_type: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn chapter_index_contains_position() {
        let item = item();
        assert_eq!(calculate_chapter_index(&item, 0.0), 0);
        assert_eq!(calculate_chapter_index(&item, 99.9), 0);
        assert_eq!(calculate_chapter_index(&item, 100.0), 1);
        assert_eq!(calculate_chapter_index(&item, 260.0), 2);
    }

    #[test]
    fn chapter_index_falls_back_to_last_chapter() {
        let item = item();
        assert_eq!(calculate_chapter_index(&item, 400.0), 2);
        assert_eq!(calculate_chapter_index(&item, 9_999.0), 2);
    }

    #[test]
    fn chapter_position_is_relative_to_chapter_start() {
        let item = item();
        assert_eq!(calculate_chapter_position(&item, 260.0), 10.0);
        assert_eq!(calculate_chapter_position(&item, 50.0), 50.0);
    }

    #[test]
    fn related_files_follow_time_overlap() {
        let item = item();
        // c0 (0–100) lies entirely in f1 (0–180).
        let related = find_related_files(&item.chapters[0], &item.files);
        assert_eq!(
            related.iter().map(|f| f.id.as_str()).collect::<Vec<_>>(),
            vec!["f1"]
        );

        // c1 (100–250) straddles the f1/f2 boundary at 180.
        let related = find_related_files(&item.chapters[1], &item.files);
        assert_eq!(
            related.iter().map(|f| f.id.as_str()).collect::<Vec<_>>(),
            vec!["f1", "f2"]
        );

        // c2 (250–400) lies entirely in f2 (180–400).
        let related = find_related_files(&item.chapters[2], &item.files);
        assert_eq!(
            related.iter().map(|f| f.id.as_str()).collect::<Vec<_>>(),
            vec!["f2"]
        );
    }

    #[test]
    fn next_n_from_last_chapter_clamps() {
        // Position 260s sits in chapter index 2; Next-2 yields only
        // chapter 2 because there is no chapter 3.
        let item = item();
        let requested =
            calculate_requested_chapters(&item, &DownloadOption::NextN(2), 260.0);
        let ids: Vec<_> = requested.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c2"]);
    }

    #[test]
    fn option_resolution_shapes() {
        let item = item();

        let all = calculate_requested_chapters(&item, &DownloadOption::All, 0.0);
        assert_eq!(all.len(), 3);

        let current = calculate_requested_chapters(&item, &DownloadOption::Current, 120.0);
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].id, "c1");

        let remaining =
            calculate_requested_chapters(&item, &DownloadOption::Remaining, 120.0);
        let ids: Vec<_> = remaining.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);

        let next = calculate_requested_chapters(&item, &DownloadOption::NextN(2), 0.0);
        let ids: Vec<_> = next.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c0", "c1"]);
    }

    #[test]
    fn specific_files_selects_chapters_by_relation() {
        let item = item();
        let requested = calculate_requested_chapters(
            &item,
            &DownloadOption::SpecificFiles(vec!["f2".to_string()]),
            0.0,
        );
        let ids: Vec<_> = requested.iter().map(|c| c.id.as_str()).collect();
        // Every chapter f2 serves, including the straddling one.
        assert_eq!(ids, vec!["c1", "c2"]);
    }

    #[test]
    fn empty_item_resolves_to_empty_sets() {
        let mut empty = item();
        empty.chapters.clear();
        empty.files.clear();

        assert_eq!(calculate_chapter_index(&empty, 10.0), 0);
        assert!(calculate_requested_chapters(&empty, &DownloadOption::Current, 0.0).is_empty());
        assert!(calculate_requested_chapters(&empty, &DownloadOption::All, 0.0).is_empty());
        assert!(
            calculate_requested_chapters(&empty, &DownloadOption::Remaining, 0.0).is_empty()
        );
    }
}
