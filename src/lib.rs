//! Workspace facade crate.
//!
//! Re-exports the member crates so hosts can depend on `offshelf` alone:
//! the metadata store (`core-library`), the content cache (`core-cache`),
//! the local-first repository and playback sync (`core-sync`), runtime
//! infrastructure (`core-runtime`), and the external seams the host must
//! implement (`bridge-traits`).

pub use bridge_traits;
pub use core_cache;
pub use core_library;
pub use core_runtime;
pub use core_sync;
