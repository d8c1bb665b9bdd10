//! Download policies and their persisted string form.
//!
//! The encoding is a stable id saved as a user preference. File ids are
//! base64-encoded inside `specific_files_` so ids containing commas
//! survive the list separator. Malformed input decodes to `None` rather
//! than failing: a corrupt preference falls back to "no option".

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

/// Which chapters a cache run should fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOption {
    /// Every chapter of the item.
    All,
    /// Only the chapter containing the current position.
    Current,
    /// The current chapter and everything after it.
    Remaining,
    /// The current chapter plus the following `n - 1`, clamped to the end.
    NextN(u32),
    /// Chapters served by any of the given file ids.
    SpecificFiles(Vec<String>),
}

const ALL_ID: &str = "all_items";
const CURRENT_ID: &str = "current_item";
const REMAINING_ID: &str = "remaining_items";
const NUMBER_PREFIX: &str = "number_items_";
const SPECIFIC_PREFIX: &str = "specific_files_";

impl DownloadOption {
    /// Stable string id, used as a persisted preference value.
    pub fn encode(&self) -> String {
        match self {
            DownloadOption::All => ALL_ID.to_string(),
            DownloadOption::Current => CURRENT_ID.to_string(),
            DownloadOption::Remaining => REMAINING_ID.to_string(),
            DownloadOption::NextN(count) => format!("{NUMBER_PREFIX}{count}"),
            DownloadOption::SpecificFiles(file_ids) => {
                let encoded = file_ids
                    .iter()
                    .map(|id| STANDARD.encode(id.as_bytes()))
                    .collect::<Vec<_>>()
                    .join(",");
                format!("{SPECIFIC_PREFIX}{encoded}")
            }
        }
    }

    /// Decode a persisted id. Unrecognized or malformed input yields
    /// `None`.
    pub fn decode(raw: &str) -> Option<Self> {
        match raw {
            ALL_ID => return Some(DownloadOption::All),
            CURRENT_ID => return Some(DownloadOption::Current),
            REMAINING_ID => return Some(DownloadOption::Remaining),
            _ => {}
        }

        if let Some(count) = raw.strip_prefix(NUMBER_PREFIX) {
            return count.parse().ok().map(DownloadOption::NextN);
        }

        if let Some(encoded) = raw.strip_prefix(SPECIFIC_PREFIX) {
            if encoded.is_empty() {
                return Some(DownloadOption::SpecificFiles(Vec::new()));
            }

            let mut file_ids = Vec::new();
            for part in encoded.split(',') {
                let bytes = STANDARD.decode(part).ok()?;
                file_ids.push(String::from_utf8(bytes).ok()?);
            }
            return Some(DownloadOption::SpecificFiles(file_ids));
        }

        None
    }
}
