//! Admin-status cache.
//!
//! Whether a sender administers a chat is resolved through the transport
//! (a remote round trip), so results are cached per (chat, user) pair for
//! a fixed TTL. Resolution failures map to "not an admin" and are never
//! cached, so a transient outage cannot grant or permanently deny
//! privileges. Same eviction discipline as the window cache: bounded
//! capacity, least-recently-inserted out first, periodic purge.

use crate::chat::traits::{ChatClient, ChatId, UserId};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tracing::debug;

/// Tuning for an [`AdminStatusCache`].
#[derive(Debug, Clone)]
pub struct AdminCacheConfig {
    /// How long a resolved status stays valid.
    pub ttl: Duration,
    /// Hard cap on resident entries.
    pub max_entries: usize,
    /// The periodic purge runs every `ttl * cleanup_multiplier`.
    pub cleanup_multiplier: u32,
}

impl Default for AdminCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_entries: 512,
            cleanup_multiplier: 2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct AdminEntry {
    is_admin: bool,
    expires_at: SystemTime,
}

struct AdminInner {
    entries: HashMap<(ChatId, UserId), AdminEntry>,
    insertion_order: VecDeque<(ChatId, UserId)>,
}

impl AdminInner {
    fn insert(&mut self, key: (ChatId, UserId), entry: AdminEntry, max_entries: usize) {
        if !self.entries.contains_key(&key) {
            if self.entries.len() >= max_entries {
                if let Some(oldest) = self.insertion_order.pop_front() {
                    self.entries.remove(&oldest);
                }
            }
            self.insertion_order.push_back(key);
        }
        self.entries.insert(key, entry);
    }

    fn purge(&mut self, now: SystemTime) {
        self.entries.retain(|_, entry| now < entry.expires_at);
        let entries = &self.entries;
        self.insertion_order.retain(|key| entries.contains_key(key));
    }
}

/// TTL cache for externally-resolved admin status.
pub struct AdminStatusCache {
    inner: Arc<Mutex<AdminInner>>,
    ttl: Duration,
    max_entries: usize,
    purge_task: Mutex<Option<JoinHandle<()>>>,
}

impl AdminStatusCache {
    fn build(config: &AdminCacheConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(AdminInner {
                entries: HashMap::new(),
                insertion_order: VecDeque::new(),
            })),
            ttl: config.ttl,
            max_entries: config.max_entries.max(1),
            purge_task: Mutex::new(None),
        }
    }

    /// Create a cache and start its periodic purge task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: AdminCacheConfig) -> Self {
        let cache = Self::build(&config);
        let period =
            (cache.ttl * config.cleanup_multiplier.max(1)).max(Duration::from_millis(1));
        let inner = Arc::clone(&cache.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let now = SystemTime::now();
                inner.lock().unwrap().purge(now);
            }
        });
        *cache.purge_task.lock().unwrap() = Some(handle);
        cache
    }

    /// Whether `user` administers `chat`, resolving through `resolver` on
    /// a cache miss.
    ///
    /// Zero ids short-circuit to `false` without resolving. A cached,
    /// unexpired entry answers without resolving. Owner and administrator
    /// statuses map to `true`; every other status and every resolver
    /// failure maps to `false`. Only successful resolutions are cached.
    pub async fn is_admin<C: ChatClient>(
        &self,
        resolver: &C,
        chat: ChatId,
        user: UserId,
    ) -> bool {
        if chat.0 == 0 || user.0 == 0 {
            return false;
        }

        let now = SystemTime::now();
        if let Some(entry) = self.inner.lock().unwrap().entries.get(&(chat, user)) {
            if now < entry.expires_at {
                return entry.is_admin;
            }
        }

        match resolver.member_status(chat, user).await {
            Ok(status) => {
                let is_admin = status.is_elevated();
                let entry = AdminEntry {
                    is_admin,
                    expires_at: now + self.ttl,
                };
                let max_entries = self.max_entries;
                self.inner
                    .lock()
                    .unwrap()
                    .insert((chat, user), entry, max_entries);
                is_admin
            }
            Err(e) => {
                debug!(
                    chat = chat.0,
                    user = user.0,
                    error = %e,
                    "membership resolution failed; treating as non-admin"
                );
                false
            }
        }
    }

    /// Drop expired entries.
    pub fn purge(&self) {
        let now = SystemTime::now();
        self.inner.lock().unwrap().purge(now);
    }

    /// Current number of resident entries.
    pub fn size(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    /// Stop the periodic purge task. Idempotent; never panics.
    pub fn destroy(&self) {
        if let Some(handle) = self.purge_task.lock().unwrap().take() {
            handle.abort();
        }
    }
}

impl Drop for AdminStatusCache {
    fn drop(&mut self) {
        self.destroy();
    }
}
