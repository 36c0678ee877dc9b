//! SQLite-backed `UserStore`.

use super::{
    truncate, unix_now, validate_setting_key, validate_user_id, StoreError, StoreResult,
    UserRecord, UserStore, MAX_FIRST_NAME_LEN, MAX_PENDING_LIMIT, MAX_USERNAME_LEN,
};
use crate::chat::traits::{MessageId, UserId};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        user_id INTEGER PRIMARY KEY,
        username TEXT,
        first_name TEXT NOT NULL DEFAULT '',
        introduced INTEGER NOT NULL DEFAULT 0,
        introduced_at INTEGER,
        intro_msg_id INTEGER,
        joined_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_users_pending ON users (introduced, joined_at)",
    "CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )",
];

/// Durable store over SQLite.
///
/// The pool is capped at one connection so writes to the same row can
/// never interleave, even if the caller dispatches handlers concurrently.
pub struct SqliteUserStore {
    pool: SqlitePool,
}

impl SqliteUserStore {
    /// Open (creating if missing) the database at `path`.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// In-memory database, used by tests.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn row_to_record(row: &SqliteRow) -> Result<UserRecord, sqlx::Error> {
    Ok(UserRecord {
        user_id: UserId(row.try_get("user_id")?),
        username: row.try_get("username")?,
        first_name: row.try_get("first_name")?,
        introduced: row.try_get::<i64, _>("introduced")? != 0,
        introduced_at: row.try_get("introduced_at")?,
        intro_msg_id: row.try_get("intro_msg_id")?,
        joined_at: row.try_get("joined_at")?,
    })
}

#[async_trait]
impl UserStore for SqliteUserStore {
    async fn get_user(&self, user_id: UserId) -> StoreResult<Option<UserRecord>> {
        validate_user_id(user_id)?;
        let row = sqlx::query("SELECT * FROM users WHERE user_id = ?1")
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(row_to_record(&row).map_err(StoreError::Database)?)),
            None => Ok(None),
        }
    }

    async fn upsert_user(
        &self,
        user_id: UserId,
        username: Option<&str>,
        first_name: Option<&str>,
    ) -> StoreResult<()> {
        validate_user_id(user_id)?;
        let username = username.map(|u| truncate(u, MAX_USERNAME_LEN));
        let first_name = first_name.map(|f| truncate(f, MAX_FIRST_NAME_LEN));
        sqlx::query(
            "INSERT INTO users (user_id, username, first_name, joined_at)
             VALUES (?1, ?2, COALESCE(?3, ''), ?4)
             ON CONFLICT(user_id) DO UPDATE SET
                 username = COALESCE(?2, username),
                 first_name = COALESCE(?3, first_name)",
        )
        .bind(user_id.0)
        .bind(username)
        .bind(first_name)
        .bind(unix_now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_introduced(
        &self,
        user_id: UserId,
        intro_msg_id: Option<MessageId>,
    ) -> StoreResult<()> {
        validate_user_id(user_id)?;
        let result = sqlx::query(
            "UPDATE users SET introduced = 1, introduced_at = ?2, intro_msg_id = ?3
             WHERE user_id = ?1",
        )
        .bind(user_id.0)
        .bind(unix_now())
        .bind(intro_msg_id.map(|m| m.0))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::UserNotFound(user_id));
        }
        Ok(())
    }

    async fn reset_user(&self, user_id: UserId) -> StoreResult<()> {
        validate_user_id(user_id)?;
        let result = sqlx::query(
            "UPDATE users SET introduced = 0, introduced_at = NULL, intro_msg_id = NULL
             WHERE user_id = ?1",
        )
        .bind(user_id.0)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::UserNotFound(user_id));
        }
        Ok(())
    }

    async fn get_pending(&self, limit: u32) -> StoreResult<Vec<UserRecord>> {
        let limit = limit.min(MAX_PENDING_LIMIT);
        let rows = sqlx::query(
            "SELECT * FROM users WHERE introduced = 0
             ORDER BY joined_at ASC, user_id ASC LIMIT ?1",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| row_to_record(row).map_err(StoreError::Database))
            .collect()
    }

    async fn get_setting(&self, key: &str) -> StoreResult<Option<String>> {
        validate_setting_key(key)?;
        let row = sqlx::query("SELECT value FROM settings WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(row.try_get("value").map_err(StoreError::Database)?)),
            None => Ok(None),
        }
    }

    async fn set_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        validate_setting_key(key)?;
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
