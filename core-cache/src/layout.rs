//! Cache storage layout.
//!
//! Pure mapping from (item id, file id) to on-disk locations. The only
//! I/O is directory creation when the root is resolved; everything else
//! is deterministic path math, so concurrent runs for different items
//! can never collide on disk.

use crate::error::{CacheError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const MEDIA_CACHE_FOLDER: &str = "media_cache";
const COVER_RAW_NAME: &str = "cover_raw.img";
const COVER_THUMB_NAME: &str = "cover_thumb.img";

/// Width requested for the thumbnail cover variant.
pub const COVER_THUMB_WIDTH: u32 = 300;

/// Cover variant stored alongside an item's media files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverVariant {
    /// Full-resolution cover.
    Raw,
    /// Downscaled cover for list views.
    Thumb,
}

/// Resolved cache root plus the path scheme below it.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    base: PathBuf,
}

impl StorageLayout {
    /// Resolve the cache root, preferring `preferred` (an app-external
    /// storage area) and falling back to the platform-local data
    /// directory when it is missing or not writable.
    pub fn resolve(preferred: Option<PathBuf>) -> Result<Self> {
        if let Some(root) = preferred {
            let base = root.join(MEDIA_CACHE_FOLDER);
            if is_usable(&base) {
                debug!(base = %base.display(), "using preferred cache root");
                return Ok(Self { base });
            }
            warn!(root = %root.display(), "preferred cache root not writable, falling back");
        }

        let dirs = directories::ProjectDirs::from("", "", "offshelf")
            .ok_or(CacheError::NoWritableRoot)?;
        let base = dirs.data_local_dir().join(MEDIA_CACHE_FOLDER);
        match is_usable(&base) {
            true => Ok(Self { base }),
            false => Err(CacheError::NoWritableRoot),
        }
    }

    /// Use an explicit base directory (tests, embedded hosts).
    pub fn with_base(base: impl Into<PathBuf>) -> Result<Self> {
        let base = base.into();
        match is_usable(&base) {
            true => Ok(Self { base }),
            false => Err(CacheError::NoWritableRoot),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Directory owning everything cached for one item.
    pub fn item_root(&self, item_id: &str) -> PathBuf {
        self.base.join(item_id)
    }

    /// On-disk location of one media file of an item.
    pub fn media_path(&self, item_id: &str, file_id: &str) -> PathBuf {
        self.item_root(item_id).join(file_id)
    }

    pub fn cover_path(&self, item_id: &str, variant: CoverVariant) -> PathBuf {
        let name = match variant {
            CoverVariant::Raw => COVER_RAW_NAME,
            CoverVariant::Thumb => COVER_THUMB_NAME,
        };
        self.item_root(item_id).join(name)
    }
}

fn is_usable(base: &Path) -> bool {
    if fs::create_dir_all(base).is_err() {
        return false;
    }
    fs::metadata(base)
        .map(|meta| !meta.permissions().readonly())
        .unwrap_or(false)
}
