//! # Core Library
//!
//! The Local Metadata Store: a durable SQLite mirror of library items,
//! chapters, files, libraries, and listening progress.
//!
//! ## Overview
//!
//! - [`db`]: connection pool configuration, embedded migrations
//! - [`request`]: parameterized builders for the three read-query shapes
//!   (paged listing, recent activity, search)
//! - [`repositories`]: store-level CRUD, including the detailed upsert
//!   that carries cached-chapter flags forward across metadata refreshes
//!
//! All multi-row mutations run inside a single transaction; the store is
//! the single source of truth for everything the engine persists.

pub mod db;
pub mod error;
pub mod repositories;
pub mod request;

pub use db::{create_pool, create_test_pool, DatabaseConfig};
pub use error::{LibraryError, Result};
pub use repositories::{AccountScope, BookRepository, LibraryRepository};
pub use request::{
    FetchRequest, LibraryOrdering, OrderDirection, OrderField, RecentRequest, SearchRequest,
};
