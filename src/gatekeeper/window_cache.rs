//! Time-windowed rate-limit cache.
//!
//! One keyed cache serving the two access patterns the gatekeeper needs:
//!
//! - *Timestamp mode* (`touch`/`is_limited`): a key is limited while the
//!   last touch lies inside the window. Used for welcome and reminder
//!   cooldowns.
//! - *Counter mode* (`increment`): counts attempts per window and reports
//!   when the count exceeds a maximum. Used for introduction attempts.
//!
//! A cache instance must be used in one mode consistently; both shapes
//! share the expiry and eviction paths, keyed on the instant the entry's
//! window started. Entries expire lazily, a periodic task purges stale
//! windows, and insertion beyond capacity evicts the least-recently
//! inserted key.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;

/// Tuning for a [`TimeWindowCache`] instance.
#[derive(Debug, Clone)]
pub struct WindowCacheConfig {
    /// Width of the rate-limit window.
    pub window: Duration,
    /// Hard cap on resident entries.
    pub max_entries: usize,
    /// The periodic purge runs every `window * cleanup_multiplier`.
    pub cleanup_multiplier: u32,
}

impl Default for WindowCacheConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_entries: 1024,
            cleanup_multiplier: 2,
        }
    }
}

/// Cache entry state.
///
/// The tag tells the expiry paths which anchor to measure from: timestamp
/// entries anchor on the touch instant, counter entries on the explicit
/// window start. Inspecting a value's shape instead of a tag is exactly
/// how the anchor can end up undefined, so the tag is the contract.
#[derive(Debug, Clone, Copy)]
enum WindowEntry {
    Timestamp(SystemTime),
    Counter { count: u32, window_start: SystemTime },
}

impl WindowEntry {
    fn anchor(&self) -> SystemTime {
        match self {
            WindowEntry::Timestamp(at) => *at,
            WindowEntry::Counter { window_start, .. } => *window_start,
        }
    }
}

struct Inner<K> {
    entries: HashMap<K, WindowEntry>,
    /// Keys in insertion order; every map key appears here exactly once.
    insertion_order: VecDeque<K>,
}

impl<K: Eq + Hash + Clone> Inner<K> {
    fn insert(&mut self, key: K, entry: WindowEntry, max_entries: usize) {
        if !self.entries.contains_key(&key) {
            if self.entries.len() >= max_entries {
                if let Some(oldest) = self.insertion_order.pop_front() {
                    self.entries.remove(&oldest);
                }
            }
            self.insertion_order.push_back(key.clone());
        }
        self.entries.insert(key, entry);
    }

    fn purge(&mut self, now: SystemTime, window: Duration) {
        self.entries.retain(|_, entry| {
            now.duration_since(entry.anchor()).unwrap_or(Duration::ZERO) <= window
        });
        let entries = &self.entries;
        self.insertion_order.retain(|key| entries.contains_key(key));
    }
}

/// Keyed cooldown/counter cache with TTL expiry and bounded eviction.
pub struct TimeWindowCache<K> {
    inner: Arc<Mutex<Inner<K>>>,
    window: Duration,
    max_entries: usize,
    purge_task: Mutex<Option<JoinHandle<()>>>,
}

impl<K> TimeWindowCache<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    fn build(config: &WindowCacheConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: HashMap::new(),
                insertion_order: VecDeque::new(),
            })),
            window: config.window,
            max_entries: config.max_entries.max(1),
            purge_task: Mutex::new(None),
        }
    }

    /// Create a cache and start its periodic purge task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: WindowCacheConfig) -> Self {
        let cache = Self::build(&config);
        let window = cache.window;
        let period = (window * config.cleanup_multiplier.max(1)).max(Duration::from_millis(1));
        let inner = Arc::clone(&cache.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let now = SystemTime::now();
                inner.lock().unwrap().purge(now, window);
            }
        });
        *cache.purge_task.lock().unwrap() = Some(handle);
        cache
    }

    /// Record `now` as the cooldown anchor for `key` (timestamp mode).
    pub fn touch(&self, key: K) {
        let now = SystemTime::now();
        let max_entries = self.max_entries;
        self.inner
            .lock()
            .unwrap()
            .insert(key, WindowEntry::Timestamp(now), max_entries);
    }

    /// Whether `key` is inside its cooldown window (timestamp mode).
    ///
    /// Absent keys are never limited. Pure read: no mutation, no purge.
    pub fn is_limited(&self, key: &K) -> bool {
        let now = SystemTime::now();
        let inner = self.inner.lock().unwrap();
        match inner.entries.get(key) {
            Some(entry) => {
                now.duration_since(entry.anchor()).unwrap_or(Duration::ZERO) < self.window
            }
            None => false,
        }
    }

    /// Count an attempt for `key` (counter mode).
    ///
    /// Returns true iff the attempt count within the current window now
    /// exceeds `max`. A window whose start lies further back than the
    /// configured width restarts at count 1.
    pub fn increment(&self, key: K, max: u32) -> bool {
        let now = SystemTime::now();
        let mut inner = self.inner.lock().unwrap();
        if let Some(WindowEntry::Counter {
            count,
            window_start,
        }) = inner.entries.get_mut(&key)
        {
            let elapsed = now.duration_since(*window_start).unwrap_or(Duration::ZERO);
            if elapsed > self.window {
                *count = 1;
                *window_start = now;
            } else {
                *count = count.saturating_add(1);
            }
            return *count > max;
        }
        let max_entries = self.max_entries;
        inner.insert(
            key,
            WindowEntry::Counter {
                count: 1,
                window_start: now,
            },
            max_entries,
        );
        1 > max
    }

    /// Drop every entry whose window anchor is older than the configured
    /// window. Correct for both entry shapes.
    pub fn purge(&self) {
        let now = SystemTime::now();
        self.inner.lock().unwrap().purge(now, self.window);
    }

    /// Current number of resident entries.
    pub fn size(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }
}

impl<K> TimeWindowCache<K> {
    /// Stop the periodic purge task. Idempotent; never panics.
    pub fn destroy(&self) {
        if let Some(handle) = self.purge_task.lock().unwrap().take() {
            handle.abort();
        }
    }
}

impl<K> Drop for TimeWindowCache<K> {
    fn drop(&mut self) {
        self.destroy();
    }
}
