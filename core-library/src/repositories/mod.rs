//! Store-level repositories.

pub mod book;
pub mod library;

pub use book::BookRepository;
pub use library::LibraryRepository;

/// Account the caller is operating as. Both parts are optional to support
/// anonymous and legacy rows; scoped queries treat an absent part as a
/// match on NULL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountScope {
    pub host: Option<String>,
    pub username: Option<String>,
}

impl AccountScope {
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            username: Some(username.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }
}
