//! Persistent user and settings store.
//!
//! The engine consumes the [`UserStore`] trait; `SqliteUserStore` is the
//! durable implementation and `MemoryUserStore` backs tests. Both apply
//! the same validation: positive user ids, a fixed allow-list of setting
//! keys, and name truncation on write.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryUserStore;
pub use sqlite::SqliteUserStore;

use crate::chat::traits::{MessageId, UserId};
use async_trait::async_trait;

/// Maximum stored username length, in chars.
pub const MAX_USERNAME_LEN: usize = 64;

/// Maximum stored first-name length, in chars.
pub const MAX_FIRST_NAME_LEN: usize = 128;

/// Hard cap on `get_pending` results.
pub const MAX_PENDING_LIMIT: u32 = 50;

/// Setting keys the store accepts. Anything else is a programmer error.
pub const SETTING_KEYS: &[&str] = &["main_chat_id", "intro_chat_id"];

/// A stored chat participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub user_id: UserId,
    pub username: Option<String>,
    pub first_name: String,
    pub introduced: bool,
    /// Unix seconds of the accepted introduction, if any.
    pub introduced_at: Option<i64>,
    /// Message id of the accepted introduction, if any.
    pub intro_msg_id: Option<i64>,
    /// Unix seconds of the first time this user was recorded.
    pub joined_at: i64,
}

impl UserRecord {
    /// Whether the user still owes an introduction.
    pub fn is_pending(&self) -> bool {
        !self.introduced
    }
}

/// Store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid user id: {0}")]
    InvalidUserId(i64),

    #[error("invalid setting key: {0}")]
    InvalidSettingKey(String),

    #[error("user {0} not found")]
    UserNotFound(UserId),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Persistent store consumed by the decision engine.
///
/// Implementations must serialize concurrent writes to the same user row;
/// the SQLite backend does this with a single-connection pool.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Load a user record. Errors on non-positive ids.
    async fn get_user(&self, user_id: UserId) -> StoreResult<Option<UserRecord>>;

    /// Create or update a user record. Passing `None` for a name field
    /// preserves the stored value; `joined_at` is set on first insert
    /// only. Names are truncated to the stored maximum lengths.
    async fn upsert_user(
        &self,
        user_id: UserId,
        username: Option<&str>,
        first_name: Option<&str>,
    ) -> StoreResult<()>;

    /// Mark a user introduced, recording the triggering message if known.
    async fn mark_introduced(
        &self,
        user_id: UserId,
        intro_msg_id: Option<MessageId>,
    ) -> StoreResult<()>;

    /// Revert a user to pending, clearing the introduction timestamp and
    /// message reference. Errors with `UserNotFound` when absent.
    async fn reset_user(&self, user_id: UserId) -> StoreResult<()>;

    /// Pending users, oldest joined first, capped at [`MAX_PENDING_LIMIT`].
    async fn get_pending(&self, limit: u32) -> StoreResult<Vec<UserRecord>>;

    /// Read a setting. The key must be on [`SETTING_KEYS`].
    async fn get_setting(&self, key: &str) -> StoreResult<Option<String>>;

    /// Write a setting. The key must be on [`SETTING_KEYS`].
    async fn set_setting(&self, key: &str, value: &str) -> StoreResult<()>;
}

pub(crate) fn validate_user_id(user_id: UserId) -> StoreResult<()> {
    if user_id.0 <= 0 {
        return Err(StoreError::InvalidUserId(user_id.0));
    }
    Ok(())
}

pub(crate) fn validate_setting_key(key: &str) -> StoreResult<()> {
    if SETTING_KEYS.contains(&key) {
        Ok(())
    } else {
        Err(StoreError::InvalidSettingKey(key.to_string()))
    }
}

/// Truncate to at most `max` chars, respecting char boundaries.
pub(crate) fn truncate(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

/// Current unix time in seconds.
pub(crate) fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
