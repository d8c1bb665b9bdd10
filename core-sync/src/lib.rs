//! # Core Sync
//!
//! The online half of the offline-first engine.
//!
//! ## Overview
//!
//! - [`repository`]: local-first façade: every read tries the local
//!   mirror before the remote channel, every write lands locally before
//!   it is mirrored out; includes full-library and recent-items
//!   reconciliation
//! - [`playback`]: the playback synchronization service: a single-flight
//!   progress push loop driven by player events
//! - [`network`]: server reachability probing behind the
//!   `NetworkMonitor` seam
//!
//! Remote failures degrade to local-only behavior throughout; they are
//! fatal only when there is no local fallback to serve.

pub mod error;
pub mod network;
pub mod playback;
pub mod repository;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{Result, SyncError};
pub use network::{ReachabilityConfig, ServerReachability};
pub use playback::{PlaybackSyncConfig, PlaybackSyncService};
pub use repository::{FileSource, MediaRepository, RepositoryConfig};
