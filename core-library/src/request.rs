//! Parameterized query builders for the store's three read shapes.
//!
//! Filter, ordering, and pagination combinations are assembled here and
//! nowhere else. Every value is bound as a parameter; the only text that
//! reaches the SQL string directly comes from closed keyword whitelists
//! (column names and sort directions).
//!
//! The isolation clause deliberately widens per-account filtering: an item
//! with at least one cached chapter stays visible regardless of which
//! account downloaded it.

use serde::{Deserialize, Serialize};

/// Field a listing can be ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OrderField {
    #[default]
    Title,
    Author,
    CreatedAt,
    UpdatedAt,
}

impl OrderField {
    fn column(self) -> &'static str {
        match self {
            OrderField::Title => "detailed_books.title",
            OrderField::Author => "detailed_books.author",
            OrderField::CreatedAt => "detailed_books.created_at",
            OrderField::UpdatedAt => "detailed_books.updated_at",
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OrderDirection {
    #[default]
    Ascending,
    Descending,
}

impl OrderDirection {
    fn keyword(self) -> &'static str {
        match self {
            OrderDirection::Ascending => "ASC",
            OrderDirection::Descending => "DESC",
        }
    }
}

/// User-chosen listing order, persisted as a preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LibraryOrdering {
    pub field: OrderField,
    pub direction: OrderDirection,
}

/// A value bound into a built query.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BindValue {
    Text(String),
    Integer(i64),
}

/// A built query: SQL plus its bind values, and the matching count query.
#[derive(Debug, Clone)]
pub(crate) struct QuerySpec {
    pub select_sql: String,
    pub count_sql: String,
    pub binds: Vec<BindValue>,
}

fn library_clause(library_id: &Option<String>, binds: &mut Vec<BindValue>) -> &'static str {
    match library_id {
        None => "detailed_books.library_id IS NULL",
        Some(id) => {
            binds.push(BindValue::Text(id.clone()));
            "(detailed_books.library_id = ? OR detailed_books.library_id IS NULL)"
        }
    }
}

pub(crate) const CACHED_CLAUSE: &str = "EXISTS (SELECT 1 FROM book_chapters \
     WHERE book_chapters.book_id = detailed_books.id AND book_chapters.is_cached = 1)";

fn isolation_clause(
    downloaded_only: bool,
    host: &Option<String>,
    username: &Option<String>,
    binds: &mut Vec<BindValue>,
) -> String {
    if downloaded_only {
        return CACHED_CLAUSE.to_string();
    }

    match (host, username) {
        (Some(host), Some(username)) if !host.is_empty() && !username.is_empty() => {
            binds.push(BindValue::Text(host.clone()));
            binds.push(BindValue::Text(username.clone()));
            format!(
                "((detailed_books.host = ? AND detailed_books.username = ?) OR {CACHED_CLAUSE})"
            )
        }
        _ => CACHED_CLAUSE.to_string(),
    }
}

/// Paged library listing.
#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    library_id: Option<String>,
    page_number: u32,
    page_size: u32,
    ordering: LibraryOrdering,
    downloaded_only: bool,
    host: Option<String>,
    username: Option<String>,
}

impl FetchRequest {
    pub fn new() -> Self {
        Self {
            page_size: 20,
            ..Self::default()
        }
    }

    pub fn library_id(mut self, id: Option<String>) -> Self {
        self.library_id = id;
        self
    }

    pub fn page_number(mut self, number: u32) -> Self {
        self.page_number = number;
        self
    }

    pub fn page_size(mut self, size: u32) -> Self {
        self.page_size = size;
        self
    }

    pub fn ordering(mut self, ordering: LibraryOrdering) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn downloaded_only(mut self, enabled: bool) -> Self {
        self.downloaded_only = enabled;
        self
    }

    pub fn account(mut self, host: Option<String>, username: Option<String>) -> Self {
        self.host = host;
        self.username = username;
        self
    }

    pub(crate) fn page(&self) -> (u32, u32) {
        (self.page_number, self.page_size)
    }

    pub(crate) fn build(&self) -> QuerySpec {
        let mut binds = Vec::new();
        let library = library_clause(&self.library_id, &mut binds);
        let isolation =
            isolation_clause(self.downloaded_only, &self.host, &self.username, &mut binds);

        let where_clause = format!("WHERE {library} AND {isolation}");
        let select_sql = format!(
            "SELECT detailed_books.* FROM detailed_books {where_clause} \
             ORDER BY {field} {direction}, detailed_books.id ASC LIMIT ? OFFSET ?",
            field = self.ordering.field.column(),
            direction = self.ordering.direction.keyword(),
        );
        let count_sql =
            format!("SELECT COUNT(*) FROM detailed_books {where_clause}");

        let mut select_binds = binds.clone();
        select_binds.push(BindValue::Integer(self.page_size as i64));
        select_binds.push(BindValue::Integer(
            self.page_number as i64 * self.page_size as i64,
        ));

        QuerySpec {
            select_sql,
            count_sql,
            // Count reuses the prefix of the select binds; the repository
            // truncates the trailing limit/offset pair.
            binds: select_binds,
        }
    }
}

/// Recent-activity listing: in-progress items, most recently updated first.
#[derive(Debug, Clone)]
pub struct RecentRequest {
    library_id: Option<String>,
    downloaded_only: bool,
    limit: u32,
    host: Option<String>,
    username: Option<String>,
}

impl Default for RecentRequest {
    fn default() -> Self {
        Self {
            library_id: None,
            downloaded_only: false,
            limit: 10,
            host: None,
            username: None,
        }
    }
}

impl RecentRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn library_id(mut self, id: Option<String>) -> Self {
        self.library_id = id;
        self
    }

    pub fn downloaded_only(mut self, enabled: bool) -> Self {
        self.downloaded_only = enabled;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn account(mut self, host: Option<String>, username: Option<String>) -> Self {
        self.host = host;
        self.username = username;
        self
    }

    pub(crate) fn build(&self) -> QuerySpec {
        let mut binds = Vec::new();
        let library = library_clause(&self.library_id, &mut binds);
        let isolation =
            isolation_clause(self.downloaded_only, &self.host, &self.username, &mut binds);

        let select_sql = format!(
            "SELECT DISTINCT detailed_books.* FROM detailed_books \
             INNER JOIN media_progress ON detailed_books.id = media_progress.book_id \
             WHERE {library} AND {isolation} \
             AND media_progress.current_position > 0 \
             AND media_progress.is_finished = 0 \
             ORDER BY media_progress.last_update DESC \
             LIMIT ?"
        );

        binds.push(BindValue::Integer(self.limit as i64));

        QuerySpec {
            count_sql: String::new(),
            select_sql,
            binds,
        }
    }
}

/// Case-insensitive substring search over title, author, and series names.
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    library_id: Option<String>,
    query: String,
    ordering: LibraryOrdering,
    host: Option<String>,
    username: Option<String>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn library_id(mut self, id: Option<String>) -> Self {
        self.library_id = id;
        self
    }

    pub fn ordering(mut self, ordering: LibraryOrdering) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn account(mut self, host: Option<String>, username: Option<String>) -> Self {
        self.host = host;
        self.username = username;
        self
    }

    pub(crate) fn build(&self) -> QuerySpec {
        let mut binds = Vec::new();
        let library = library_clause(&self.library_id, &mut binds);

        let pattern = format!("%{}%", self.query);
        let search = "(detailed_books.title LIKE ? \
             OR detailed_books.author LIKE ? \
             OR detailed_books.series_names LIKE ?)";
        binds.push(BindValue::Text(pattern.clone()));
        binds.push(BindValue::Text(pattern.clone()));
        binds.push(BindValue::Text(pattern));

        let isolation = isolation_clause(false, &self.host, &self.username, &mut binds);

        let select_sql = format!(
            "SELECT detailed_books.* FROM detailed_books \
             WHERE {library} AND {search} AND {isolation} \
             ORDER BY {field} {direction}, detailed_books.id ASC",
            field = self.ordering.field.column(),
            direction = self.ordering.direction.keyword(),
        );

        QuerySpec {
            count_sql: String::new(),
            select_sql,
            binds,
        }
    }
}
