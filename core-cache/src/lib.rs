//! # Core Cache
//!
//! Selective on-disk caching of media content.
//!
//! ## Overview
//!
//! - [`layout`]: deterministic mapping from (item, file) to disk paths
//! - [`options`]: the closed set of download policies and their stable
//!   string encoding
//! - [`chapters`]: chapter index math and the time-overlap relation
//!   between chapters and files, the basis for every download and
//!   eviction decision
//! - [`manager`]: orchestrates cache runs: resolve requested chapters,
//!   stream the missing files, persist cache flags, evict safely
//! - [`repository`]: local cache facade combining the metadata store
//!   with the on-disk layout (file URIs, disk-verified metadata caching,
//!   size accounting)
//! - [`volumes`]: storage-shape classification for download UIs
//!
//! A cache run moves through `Queued → Caching(0..1) → Completed | Error`
//! and reports state live through a `watch` channel per item id. Failed
//! runs evict everything they touched: a chapter is either fully cached
//! or not cached at all.

pub mod chapters;
pub mod error;
pub mod layout;
pub mod manager;
pub mod options;
pub mod repository;
pub mod state;
pub mod volumes;

pub use error::{CacheError, Result};
pub use layout::{CoverVariant, StorageLayout, COVER_THUMB_WIDTH};
pub use manager::{CachingConfig, ContentCachingManager};
pub use options::DownloadOption;
pub use repository::LocalCacheRepository;
pub use state::CacheState;
pub use volumes::{map_chapters_to_volumes, storage_type, BookStorageType, BookVolume};
