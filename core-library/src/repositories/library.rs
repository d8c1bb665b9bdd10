//! Repository for the per-account library list.
//!
//! Caching a fetched list is a replacement for that account: rows are
//! upserted and anything the server no longer reports is deleted, but
//! only within the account's scope.

use crate::error::Result;
use crate::repositories::AccountScope;
use bridge_traits::types::{Library, LibraryType};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

#[derive(Debug, FromRow)]
struct LibraryRow {
    id: String,
    title: String,
    library_type: String,
}

#[derive(Clone)]
pub struct LibraryRepository {
    pool: SqlitePool,
}

impl LibraryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn cache_libraries(
        &self,
        libraries: &[Library],
        scope: &AccountScope,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for library in libraries {
            sqlx::query(
                r#"
                INSERT INTO libraries (id, title, library_type, host, username)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    library_type = excluded.library_type,
                    host = excluded.host,
                    username = excluded.username
                "#,
            )
            .bind(&library.id)
            .bind(&library.title)
            .bind(library.library_type.as_str())
            .bind(&scope.host)
            .bind(&scope.username)
            .execute(&mut *tx)
            .await?;
        }

        let delete_sql = match libraries.is_empty() {
            true => "DELETE FROM libraries \
                 WHERE ((? IS NULL AND host IS NULL) OR host = ?) \
                 AND ((? IS NULL AND username IS NULL) OR username = ?)"
                .to_string(),
            false => {
                let placeholders = std::iter::repeat("?")
                    .take(libraries.len())
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "DELETE FROM libraries \
                     WHERE ((? IS NULL AND host IS NULL) OR host = ?) \
                     AND ((? IS NULL AND username IS NULL) OR username = ?) \
                     AND id NOT IN ({placeholders})"
                )
            }
        };

        let mut query = sqlx::query(&delete_sql)
            .bind(&scope.host)
            .bind(&scope.host)
            .bind(&scope.username)
            .bind(&scope.username);
        for library in libraries {
            query = query.bind(&library.id);
        }
        query.execute(&mut *tx).await?;

        tx.commit().await?;
        debug!(count = libraries.len(), "cached library list");
        Ok(())
    }

    pub async fn fetch_libraries(&self, scope: &AccountScope) -> Result<Vec<Library>> {
        let rows = sqlx::query_as::<_, LibraryRow>(
            "SELECT * FROM libraries \
             WHERE ((? IS NULL AND host IS NULL) OR host = ?) \
             AND ((? IS NULL AND username IS NULL) OR username = ?) \
             ORDER BY title ASC, id ASC",
        )
        .bind(&scope.host)
        .bind(&scope.host)
        .bind(&scope.username)
        .bind(&scope.username)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Library {
                id: row.id,
                title: row.title,
                library_type: LibraryType::parse(&row.library_type),
            })
            .collect())
    }
}
