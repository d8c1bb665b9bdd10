//! # Settings Store
//!
//! Durable key/value preferences backed by SQLite, with typed accessors
//! and per-key change subscriptions.
//!
//! Values are stored as text alongside a type tag; reading a key with the
//! wrong type is an error rather than a silent coercion. Every key can be
//! observed through a `watch` channel that replays the current value to
//! new subscribers and broadcasts each subsequent write, so components
//! react to preference changes without polling.
//!
//! The store owns its connection pool; its lifecycle is tied to the
//! hosting process and ends when the store is dropped.

use crate::error::{Result, RuntimeError};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{sqlite::SqlitePoolOptions, Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tokio::sync::watch;
use tracing::debug;

/// Well-known preference keys used by the sync and caching engine.
pub mod keys {
    /// Base URL of the configured media server.
    pub const HOST: &str = "server.host";
    /// Account username on the configured server.
    pub const USERNAME: &str = "server.username";
    /// Stable per-install device identifier.
    pub const DEVICE_ID: &str = "device.id";
    /// Identifier of the library the user browses by default.
    pub const PREFERRED_LIBRARY_ID: &str = "library.preferred";
    /// When true, remote sync outcomes are ignored and the local mirror
    /// is treated as authoritative.
    pub const FORCE_OFFLINE: &str = "cache.force_offline";
    /// Library listing order, JSON `{ "field": …, "direction": … }`.
    pub const LIBRARY_ORDERING: &str = "library.ordering";
    /// Persisted download option id, see `core-cache`.
    pub const AUTO_DOWNLOAD_OPTION: &str = "cache.auto_download";
}

/// SQLite-backed settings store.
pub struct SettingsStore {
    pool: SqlitePool,
    watchers: Mutex<HashMap<String, watch::Sender<Option<String>>>>,
}

impl SettingsStore {
    /// Open (or create) a settings database at the given path.
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let path_str = db_path.to_string_lossy().replace('\\', "/");
        let url = format!("sqlite://{}?mode=rwc", path_str);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&url)
            .await?;

        Self::initialize(pool).await
    }

    /// In-memory store, for tests.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        Self::initialize(pool).await
    }

    async fn initialize(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                value_type TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        debug!("initialized settings store");
        Ok(Self {
            pool,
            watchers: Mutex::new(HashMap::new()),
        })
    }

    fn now() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }

    async fn set_value(&self, key: &str, value: &str, value_type: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, value_type, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                value_type = excluded.value_type,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(value_type)
        .bind(Self::now())
        .execute(&self.pool)
        .await?;

        self.notify(key, Some(value.to_string()));
        debug!(key, value_type, "stored setting");
        Ok(())
    }

    async fn get_value(&self, key: &str, expected_type: &'static str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value, value_type FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let value: String = row.get(0);
                let value_type: String = row.get(1);

                if value_type != expected_type {
                    return Err(RuntimeError::TypeMismatch {
                        key: key.to_string(),
                        expected: expected_type,
                        actual: value_type,
                    });
                }

                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Raw value regardless of type, used for subscriptions.
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| row.get(0)))
    }

    fn notify(&self, key: &str, value: Option<String>) {
        let watchers = self.watchers.lock().expect("settings watcher lock");
        if let Some(sender) = watchers.get(key) {
            sender.send_replace(value);
        }
    }

    pub async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.set_value(key, value, "string").await
    }

    pub async fn get_string(&self, key: &str) -> Result<Option<String>> {
        self.get_value(key, "string").await
    }

    pub async fn set_bool(&self, key: &str, value: bool) -> Result<()> {
        self.set_value(key, &value.to_string(), "bool").await
    }

    pub async fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.get_value(key, "bool").await? {
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|e: std::str::ParseBoolError| RuntimeError::Parse {
                    key: key.to_string(),
                    message: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    pub async fn set_i64(&self, key: &str, value: i64) -> Result<()> {
        self.set_value(key, &value.to_string(), "i64").await
    }

    pub async fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        match self.get_value(key, "i64").await? {
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|e: std::num::ParseIntError| RuntimeError::Parse {
                    key: key.to_string(),
                    message: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    pub async fn set_f64(&self, key: &str, value: f64) -> Result<()> {
        self.set_value(key, &value.to_string(), "f64").await
    }

    pub async fn get_f64(&self, key: &str) -> Result<Option<f64>> {
        match self.get_value(key, "f64").await? {
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|e: std::num::ParseFloatError| RuntimeError::Parse {
                    key: key.to_string(),
                    message: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Store a structured value as JSON.
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value).map_err(|e| RuntimeError::Parse {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        self.set_value(key, &json, "json").await
    }

    /// Read back a structured JSON value.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_value(key, "json").await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| RuntimeError::Parse {
                    key: key.to_string(),
                    message: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM settings WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;

        self.notify(key, None);
        debug!(key, "deleted setting");
        Ok(())
    }

    /// Subscribe to changes of one key. The receiver immediately holds the
    /// current value; skipped intermediate values are not replayed.
    pub async fn subscribe(&self, key: &str) -> Result<watch::Receiver<Option<String>>> {
        let current = self.get_raw(key).await?;

        let mut watchers = self.watchers.lock().expect("settings watcher lock");
        let sender = watchers
            .entry(key.to_string())
            .or_insert_with(|| watch::channel(current).0);
        Ok(sender.subscribe())
    }

    // ------------------------------------------------------------------
    // Typed accessors for the preferences the engine relies on
    // ------------------------------------------------------------------

    pub async fn host(&self) -> Result<Option<String>> {
        self.get_string(keys::HOST).await
    }

    pub async fn set_host(&self, host: &str) -> Result<()> {
        self.set_string(keys::HOST, host).await
    }

    pub async fn username(&self) -> Result<Option<String>> {
        self.get_string(keys::USERNAME).await
    }

    pub async fn set_username(&self, username: &str) -> Result<()> {
        self.set_string(keys::USERNAME, username).await
    }

    pub async fn preferred_library_id(&self) -> Result<Option<String>> {
        self.get_string(keys::PREFERRED_LIBRARY_ID).await
    }

    pub async fn set_preferred_library_id(&self, library_id: &str) -> Result<()> {
        self.set_string(keys::PREFERRED_LIBRARY_ID, library_id).await
    }

    /// Whether the user pinned the app to local-only operation.
    pub async fn force_offline(&self) -> Result<bool> {
        Ok(self.get_bool(keys::FORCE_OFFLINE).await?.unwrap_or(false))
    }

    pub async fn set_force_offline(&self, enabled: bool) -> Result<()> {
        self.set_bool(keys::FORCE_OFFLINE, enabled).await
    }

    /// Persisted download-option id (see `core-cache` for the codec).
    pub async fn auto_download_option(&self) -> Result<Option<String>> {
        self.get_string(keys::AUTO_DOWNLOAD_OPTION).await
    }

    pub async fn set_auto_download_option(&self, option_id: &str) -> Result<()> {
        self.set_string(keys::AUTO_DOWNLOAD_OPTION, option_id).await
    }

    /// Stable device identifier, generated on first access.
    pub async fn device_id(&self) -> Result<String> {
        if let Some(existing) = self.get_string(keys::DEVICE_ID).await? {
            return Ok(existing);
        }

        let generated = uuid::Uuid::new_v4().to_string();
        self.set_string(keys::DEVICE_ID, &generated).await?;
        Ok(generated)
    }
}
