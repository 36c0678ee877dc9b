//! In-memory `UserStore` used by engine tests.

use super::{
    truncate, unix_now, validate_setting_key, validate_user_id, StoreError, StoreResult,
    UserRecord, UserStore, MAX_FIRST_NAME_LEN, MAX_PENDING_LIMIT, MAX_USERNAME_LEN,
};
use crate::chat::traits::{MessageId, UserId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// HashMap-backed store with the same validation rules as the SQLite
/// implementation.
#[derive(Default)]
pub struct MemoryUserStore {
    inner: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    users: HashMap<i64, UserRecord>,
    settings: HashMap<String, String>,
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn get_user(&self, user_id: UserId) -> StoreResult<Option<UserRecord>> {
        validate_user_id(user_id)?;
        Ok(self.inner.lock().unwrap().users.get(&user_id.0).cloned())
    }

    async fn upsert_user(
        &self,
        user_id: UserId,
        username: Option<&str>,
        first_name: Option<&str>,
    ) -> StoreResult<()> {
        validate_user_id(user_id)?;
        let mut state = self.inner.lock().unwrap();
        let record = state.users.entry(user_id.0).or_insert_with(|| UserRecord {
            user_id,
            username: None,
            first_name: String::new(),
            introduced: false,
            introduced_at: None,
            intro_msg_id: None,
            joined_at: unix_now(),
        });
        if let Some(username) = username {
            record.username = Some(truncate(username, MAX_USERNAME_LEN));
        }
        if let Some(first_name) = first_name {
            record.first_name = truncate(first_name, MAX_FIRST_NAME_LEN);
        }
        Ok(())
    }

    async fn mark_introduced(
        &self,
        user_id: UserId,
        intro_msg_id: Option<MessageId>,
    ) -> StoreResult<()> {
        validate_user_id(user_id)?;
        let mut state = self.inner.lock().unwrap();
        let record = state
            .users
            .get_mut(&user_id.0)
            .ok_or(StoreError::UserNotFound(user_id))?;
        record.introduced = true;
        record.introduced_at = Some(unix_now());
        record.intro_msg_id = intro_msg_id.map(|m| m.0);
        Ok(())
    }

    async fn reset_user(&self, user_id: UserId) -> StoreResult<()> {
        validate_user_id(user_id)?;
        let mut state = self.inner.lock().unwrap();
        let record = state
            .users
            .get_mut(&user_id.0)
            .ok_or(StoreError::UserNotFound(user_id))?;
        record.introduced = false;
        record.introduced_at = None;
        record.intro_msg_id = None;
        Ok(())
    }

    async fn get_pending(&self, limit: u32) -> StoreResult<Vec<UserRecord>> {
        let state = self.inner.lock().unwrap();
        let mut pending: Vec<UserRecord> = state
            .users
            .values()
            .filter(|record| record.is_pending())
            .cloned()
            .collect();
        pending.sort_by_key(|record| (record.joined_at, record.user_id.0));
        pending.truncate(limit.min(MAX_PENDING_LIMIT) as usize);
        Ok(pending)
    }

    async fn get_setting(&self, key: &str) -> StoreResult<Option<String>> {
        validate_setting_key(key)?;
        Ok(self.inner.lock().unwrap().settings.get(key).cloned())
    }

    async fn set_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        validate_setting_key(key)?;
        self.inner
            .lock()
            .unwrap()
            .settings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_then_get_roundtrip() {
        let store = MemoryUserStore::default();
        store
            .upsert_user(UserId(1), Some("alice"), Some("Alice"))
            .await
            .unwrap();

        let record = store.get_user(UserId(1)).await.unwrap().unwrap();
        assert_eq!(record.username.as_deref(), Some("alice"));
        assert_eq!(record.first_name, "Alice");
        assert!(record.is_pending());
        assert!(record.introduced_at.is_none());
        assert!(record.intro_msg_id.is_none());
    }

    #[tokio::test]
    async fn upsert_preserves_introduction_state() {
        let store = MemoryUserStore::default();
        store.upsert_user(UserId(1), None, None).await.unwrap();
        store
            .mark_introduced(UserId(1), Some(MessageId(9)))
            .await
            .unwrap();

        store
            .upsert_user(UserId(1), Some("alice"), None)
            .await
            .unwrap();

        let record = store.get_user(UserId(1)).await.unwrap().unwrap();
        assert!(record.introduced);
        assert_eq!(record.intro_msg_id, Some(9));
    }

    #[tokio::test]
    async fn reset_clears_introduction_fields() {
        let store = MemoryUserStore::default();
        store.upsert_user(UserId(1), None, None).await.unwrap();
        store
            .mark_introduced(UserId(1), Some(MessageId(9)))
            .await
            .unwrap();

        store.reset_user(UserId(1)).await.unwrap();

        let record = store.get_user(UserId(1)).await.unwrap().unwrap();
        assert!(!record.introduced);
        assert!(record.introduced_at.is_none());
        assert!(record.intro_msg_id.is_none());
    }

    #[tokio::test]
    async fn reset_of_missing_user_errors() {
        let store = MemoryUserStore::default();
        assert!(matches!(
            store.reset_user(UserId(404)).await,
            Err(StoreError::UserNotFound(UserId(404)))
        ));
    }

    #[tokio::test]
    async fn invalid_ids_are_rejected() {
        let store = MemoryUserStore::default();
        assert!(store.get_user(UserId(0)).await.is_err());
        assert!(store.upsert_user(UserId(-1), None, None).await.is_err());
    }
}
