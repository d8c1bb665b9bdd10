//! Repository for items, their chapters, files, and listening progress.
//!
//! The detailed upsert is the store's core invariant-keeper: a metadata
//! refresh replaces chapter rows wholesale, but the persisted `is_cached`
//! flag of every chapter that survives the refresh is carried forward
//! unless the caller explicitly drops it (eviction) or forces it
//! (a cache run just fetched it). Metadata refreshes therefore never
//! silently lose cache state.

use crate::error::{LibraryError, Result};
use crate::request::{
    BindValue, FetchRequest, QuerySpec, RecentRequest, SearchRequest, CACHED_CLAUSE,
};
use crate::repositories::AccountScope;
use bridge_traits::types::{
    Book, BookFile, BookSeries, Chapter, DetailedItem, LibraryType, MediaProgress, PagedItems,
    PlaybackProgress, RecentBook,
};
use chrono::Utc;
use sqlx::{FromRow, SqlitePool};
use tracing::{debug, instrument};

#[derive(Debug, FromRow)]
struct BookRow {
    id: String,
    title: String,
    subtitle: Option<String>,
    author: Option<String>,
    narrator: Option<String>,
    year: Option<String>,
    synopsis: Option<String>,
    publisher: Option<String>,
    duration: f64,
    library_id: Option<String>,
    library_type: Option<String>,
    series_names: Option<String>,
    series_json: String,
    created_at: i64,
    updated_at: i64,
    #[allow(dead_code)]
    host: Option<String>,
    #[allow(dead_code)]
    username: Option<String>,
}

#[derive(Debug, FromRow)]
struct ChapterRow {
    chapter_id: String,
    title: String,
    start_time: f64,
    end_time: f64,
    duration: f64,
    is_cached: bool,
}

#[derive(Debug, FromRow)]
struct FileRow {
    file_id: String,
    name: String,
    duration: f64,
    mime_type: String,
    size: i64,
}

#[derive(Debug, FromRow)]
struct ProgressRow {
    current_position: f64,
    is_finished: bool,
    last_update: i64,
}

impl BookRow {
    fn to_summary(&self) -> Book {
        Book {
            id: self.id.clone(),
            title: self.title.clone(),
            subtitle: self.subtitle.clone(),
            author: self.author.clone(),
            series: self.series_names.clone(),
            duration: self.duration,
            library_id: self.library_id.clone(),
            added_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

fn bind_rows<'q>(
    sql: &'q str,
    binds: &[BindValue],
) -> sqlx::query::QueryAs<'q, sqlx::Sqlite, BookRow, sqlx::sqlite::SqliteArguments<'q>> {
    let mut query = sqlx::query_as::<_, BookRow>(sql);
    for bind in binds {
        query = match bind {
            BindValue::Text(value) => query.bind(value.clone()),
            BindValue::Integer(value) => query.bind(*value),
        };
    }
    query
}

fn bind_count<'q>(
    sql: &'q str,
    binds: &[BindValue],
) -> sqlx::query::QueryScalar<'q, sqlx::Sqlite, i64, sqlx::sqlite::SqliteArguments<'q>> {
    let mut query = sqlx::query_scalar::<_, i64>(sql);
    for bind in binds {
        query = match bind {
            BindValue::Text(value) => query.bind(value.clone()),
            BindValue::Integer(value) => query.bind(*value),
        };
    }
    query
}

/// Store-level repository for items.
#[derive(Clone)]
pub struct BookRepository {
    pool: SqlitePool,
}

impl BookRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Upsert a full item in one transaction.
    ///
    /// `fetched` chapter ids are forced cached, `dropped` ids are forced
    /// uncached; every other chapter id present both in the new payload
    /// and in the previously cached set keeps its flag.
    #[instrument(skip_all, fields(item_id = %item.id))]
    pub async fn upsert_detailed(
        &self,
        item: &DetailedItem,
        scope: &AccountScope,
        fetched: &[String],
        dropped: &[String],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let existing_cached: Vec<String> = sqlx::query_scalar(
            "SELECT chapter_id FROM book_chapters WHERE book_id = ? AND is_cached = 1",
        )
        .bind(&item.id)
        .fetch_all(&mut *tx)
        .await?;

        let series_json =
            serde_json::to_string(&item.series).map_err(|e| LibraryError::Corrupt {
                field: "series_json",
                message: e.to_string(),
            })?;
        let series_names = match item.series.is_empty() {
            true => None,
            false => Some(
                item.series
                    .iter()
                    .map(|series| series.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
        };

        sqlx::query(
            r#"
            INSERT INTO detailed_books (
                id, title, subtitle, author, narrator, year, synopsis, publisher,
                duration, library_id, library_type, series_names, series_json,
                created_at, updated_at, host, username
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                subtitle = excluded.subtitle,
                author = excluded.author,
                narrator = excluded.narrator,
                year = excluded.year,
                synopsis = excluded.synopsis,
                publisher = excluded.publisher,
                duration = excluded.duration,
                library_id = excluded.library_id,
                library_type = excluded.library_type,
                series_names = excluded.series_names,
                series_json = excluded.series_json,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                host = excluded.host,
                username = excluded.username
            "#,
        )
        .bind(&item.id)
        .bind(&item.title)
        .bind(&item.subtitle)
        .bind(&item.author)
        .bind(&item.narrator)
        .bind(&item.year)
        .bind(&item.synopsis)
        .bind(&item.publisher)
        .bind(item.total_duration())
        .bind(&item.library_id)
        .bind(item.library_type.map(|t| t.as_str()))
        .bind(&series_names)
        .bind(&series_json)
        .bind(item.created_at)
        .bind(item.updated_at)
        .bind(&scope.host)
        .bind(&scope.username)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM book_files WHERE book_id = ?")
            .bind(&item.id)
            .execute(&mut *tx)
            .await?;

        for (ordinal, file) in item.files.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO book_files (file_id, book_id, name, duration, mime_type, ordinal, size)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&file.id)
            .bind(&item.id)
            .bind(&file.name)
            .bind(file.duration)
            .bind(&file.mime_type)
            .bind(ordinal as i64)
            .bind(file.size)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("DELETE FROM book_chapters WHERE book_id = ?")
            .bind(&item.id)
            .execute(&mut *tx)
            .await?;

        for chapter in &item.chapters {
            let is_dropped = dropped.iter().any(|id| id == &chapter.id);
            let is_fetched = fetched.iter().any(|id| id == &chapter.id);
            let was_cached = existing_cached.iter().any(|id| id == &chapter.id);
            let cached = match is_dropped {
                true => false,
                false => is_fetched || was_cached,
            };

            sqlx::query(
                r#"
                INSERT INTO book_chapters
                    (chapter_id, book_id, title, start_time, end_time, duration, is_cached)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chapter.id)
            .bind(&item.id)
            .bind(&chapter.title)
            .bind(chapter.start)
            .bind(chapter.end)
            .bind(chapter.duration)
            .bind(cached)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(progress) = &item.progress {
            upsert_progress_tx(&mut tx, &item.id, progress, scope).await?;
        }

        tx.commit().await?;
        debug!("upserted detailed item");
        Ok(())
    }

    /// Lightweight upsert used when only summary data is available
    /// (library listing sync). Touches item-level summary fields only,
    /// preserving stored details and timestamps; new rows are inserted
    /// with zero timestamps so the detail pass still sees them as stale.
    pub async fn upsert_summaries(&self, books: &[Book], scope: &AccountScope) -> Result<()> {
        if books.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for book in books {
            let exists: Option<String> =
                sqlx::query_scalar("SELECT id FROM detailed_books WHERE id = ?")
                    .bind(&book.id)
                    .fetch_optional(&mut *tx)
                    .await?;

            match exists {
                Some(_) => {
                    sqlx::query(
                        r#"
                        UPDATE detailed_books SET
                            title = ?, subtitle = ?, author = ?,
                            series_names = ?, duration = ?
                        WHERE id = ?
                        "#,
                    )
                    .bind(&book.title)
                    .bind(&book.subtitle)
                    .bind(&book.author)
                    .bind(&book.series)
                    .bind(book.duration)
                    .bind(&book.id)
                    .execute(&mut *tx)
                    .await?;
                }
                None => {
                    sqlx::query(
                        r#"
                        INSERT INTO detailed_books (
                            id, title, subtitle, author, series_names, duration,
                            library_id, created_at, updated_at, host, username
                        ) VALUES (?, ?, ?, ?, ?, ?, ?, 0, 0, ?, ?)
                        "#,
                    )
                    .bind(&book.id)
                    .bind(&book.title)
                    .bind(&book.subtitle)
                    .bind(&book.author)
                    .bind(&book.series)
                    .bind(book.duration)
                    .bind(&book.library_id)
                    .bind(&scope.host)
                    .bind(&scope.username)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn fetch_book(&self, book_id: &str) -> Result<Option<DetailedItem>> {
        let row = sqlx::query_as::<_, BookRow>("SELECT * FROM detailed_books WHERE id = ?")
            .bind(book_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn hydrate(&self, row: BookRow) -> Result<DetailedItem> {
        let files = sqlx::query_as::<_, FileRow>(
            "SELECT * FROM book_files WHERE book_id = ? ORDER BY ordinal ASC, file_id ASC",
        )
        .bind(&row.id)
        .fetch_all(&self.pool)
        .await?;

        let chapters = sqlx::query_as::<_, ChapterRow>(
            "SELECT * FROM book_chapters WHERE book_id = ? ORDER BY start_time ASC, chapter_id ASC",
        )
        .bind(&row.id)
        .fetch_all(&self.pool)
        .await?;

        let progress =
            sqlx::query_as::<_, ProgressRow>("SELECT * FROM media_progress WHERE book_id = ?")
                .bind(&row.id)
                .fetch_optional(&self.pool)
                .await?;

        let series: Vec<BookSeries> =
            serde_json::from_str(&row.series_json).map_err(|e| LibraryError::Corrupt {
                field: "series_json",
                message: e.to_string(),
            })?;

        Ok(DetailedItem {
            id: row.id,
            title: row.title,
            subtitle: row.subtitle,
            author: row.author,
            narrator: row.narrator,
            publisher: row.publisher,
            year: row.year,
            synopsis: row.synopsis,
            series,
            files: files
                .into_iter()
                .map(|file| BookFile {
                    id: file.file_id,
                    name: file.name,
                    duration: file.duration,
                    mime_type: file.mime_type,
                    size: file.size,
                })
                .collect(),
            chapters: chapters
                .into_iter()
                .map(|chapter| Chapter {
                    id: chapter.chapter_id,
                    title: chapter.title,
                    start: chapter.start_time,
                    end: chapter.end_time,
                    duration: chapter.duration,
                    available: chapter.is_cached,
                })
                .collect(),
            progress: progress.map(|progress| MediaProgress {
                current_time: progress.current_position,
                is_finished: progress.is_finished,
                last_update: progress.last_update,
            }),
            library_id: row.library_id,
            library_type: row.library_type.as_deref().map(LibraryType::parse),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    /// Paged listing per the request's filter/order/isolation settings.
    pub async fn fetch_books(&self, request: &FetchRequest) -> Result<PagedItems<Book>> {
        let spec: QuerySpec = request.build();
        // The last two binds are the limit/offset pair, absent from the
        // count query.
        let count_binds = &spec.binds[..spec.binds.len() - 2];

        let total = bind_count(&spec.count_sql, count_binds)
            .fetch_one(&self.pool)
            .await?;

        let rows = bind_rows(&spec.select_sql, &spec.binds)
            .fetch_all(&self.pool)
            .await?;

        Ok(PagedItems {
            items: rows.iter().map(BookRow::to_summary).collect(),
            current_page: request.page().0,
            total_items: total.max(0) as u64,
        })
    }

    pub async fn search_books(&self, request: &SearchRequest) -> Result<Vec<Book>> {
        let spec = request.build();
        let rows = bind_rows(&spec.select_sql, &spec.binds)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(BookRow::to_summary).collect())
    }

    pub async fn fetch_recent_books(&self, request: &RecentRequest) -> Result<Vec<RecentBook>> {
        let spec = request.build();
        let rows = bind_rows(&spec.select_sql, &spec.binds)
            .fetch_all(&self.pool)
            .await?;

        let mut recents = Vec::with_capacity(rows.len());
        for row in rows {
            let progress =
                sqlx::query_as::<_, ProgressRow>("SELECT * FROM media_progress WHERE book_id = ?")
                    .bind(&row.id)
                    .fetch_optional(&self.pool)
                    .await?;

            recents.push(RecentBook {
                listened_percentage: progress.as_ref().and_then(|progress| {
                    (row.duration > 0.0).then(|| progress.current_position / row.duration)
                }),
                listened_last_update: progress.as_ref().map(|progress| progress.last_update),
                id: row.id,
                title: row.title,
                author: row.author,
            });
        }

        Ok(recents)
    }

    /// Page over items that have at least one cached chapter.
    pub async fn fetch_cached_items(
        &self,
        page_size: u32,
        page_number: u32,
    ) -> Result<PagedItems<DetailedItem>> {
        let select_sql = format!(
            "SELECT detailed_books.* FROM detailed_books WHERE {CACHED_CLAUSE} \
             ORDER BY detailed_books.title ASC, detailed_books.id ASC LIMIT ? OFFSET ?"
        );
        let rows = sqlx::query_as::<_, BookRow>(&select_sql)
            .bind(page_size as i64)
            .bind(page_number as i64 * page_size as i64)
            .fetch_all(&self.pool)
            .await?;

        let count_sql = format!("SELECT COUNT(*) FROM detailed_books WHERE {CACHED_CLAUSE}");
        let total: i64 = sqlx::query_scalar(&count_sql).fetch_one(&self.pool).await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            items.push(self.hydrate(row).await?);
        }

        Ok(PagedItems {
            items,
            current_page: page_number,
            total_items: total.max(0) as u64,
        })
    }

    pub async fn has_cached_chapters(&self, book_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM book_chapters WHERE book_id = ? AND is_cached = 1",
        )
        .bind(book_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    pub async fn is_chapter_cached(&self, book_id: &str, chapter_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM book_chapters \
             WHERE book_id = ? AND chapter_id = ? AND is_cached = 1",
        )
        .bind(book_id)
        .bind(chapter_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    pub async fn cached_chapter_ids(&self, book_id: &str) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar(
            "SELECT chapter_id FROM book_chapters WHERE book_id = ? AND is_cached = 1",
        )
        .bind(book_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    /// Latest progress write within a library, if any.
    pub async fn fetch_latest_update(&self, library_id: &str) -> Result<Option<i64>> {
        let latest: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(media_progress.last_update) \
             FROM detailed_books \
             INNER JOIN media_progress ON detailed_books.id = media_progress.book_id \
             WHERE detailed_books.library_id IS NULL OR detailed_books.library_id = ?",
        )
        .bind(library_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(latest)
    }

    /// Record playback progress for an item the store knows about.
    /// Finished state is derived from the item's total chapter duration.
    /// Unknown items are skipped silently: progress rows may not outlive
    /// their item.
    pub async fn sync_progress(
        &self,
        book_id: &str,
        progress: &PlaybackProgress,
        scope: &AccountScope,
    ) -> Result<()> {
        let exists: Option<String> = sqlx::query_scalar("SELECT id FROM detailed_books WHERE id = ?")
            .bind(book_id)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Ok(());
        }

        let total: Option<f64> =
            sqlx::query_scalar("SELECT SUM(duration) FROM book_chapters WHERE book_id = ?")
                .bind(book_id)
                .fetch_one(&self.pool)
                .await?;
        let total = total.unwrap_or(0.0);

        let media_progress = MediaProgress {
            current_time: progress.current_total_time,
            is_finished: total > 0.0 && progress.current_total_time >= total,
            last_update: Utc::now().timestamp_millis(),
        };

        self.upsert_progress(book_id, &media_progress, scope).await
    }

    /// Write a progress record verbatim (used when mirroring a remote
    /// record whose `last_update` must be preserved).
    pub async fn upsert_progress(
        &self,
        book_id: &str,
        progress: &MediaProgress,
        scope: &AccountScope,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        upsert_progress_tx(&mut tx, book_id, progress, scope).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn delete_book(&self, book_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM detailed_books WHERE id = ?")
            .bind(book_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Reclaim metadata-only rows: delete every item with zero cached
    /// chapters. Never touches user downloads.
    pub async fn delete_non_downloaded(&self) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM detailed_books WHERE id NOT IN \
             (SELECT DISTINCT book_id FROM book_chapters WHERE is_cached = 1)",
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

async fn upsert_progress_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    book_id: &str,
    progress: &MediaProgress,
    scope: &AccountScope,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO media_progress (book_id, current_position, is_finished, last_update, host, username)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(book_id) DO UPDATE SET
            current_position = excluded.current_position,
            is_finished = excluded.is_finished,
            last_update = excluded.last_update,
            host = excluded.host,
            username = excluded.username
        "#,
    )
    .bind(book_id)
    .bind(progress.current_time)
    .bind(progress.is_finished)
    .bind(progress.last_update)
    .bind(&scope.host)
    .bind(&scope.username)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
