//! Active-session cache with LRU eviction.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::session::Session;

/// Key/value cache for session snapshots.
///
/// Implementations must tolerate concurrent `get`/`put`/`remove` from many
/// callers. The cache is an optimization only; the backing store stays
/// authoritative.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Look up a cached session.
    async fn get(&self, key: &str) -> Option<Session>;

    /// Insert or replace a cached session.
    async fn put(&self, key: &str, value: Session);

    /// Remove a cached session, failing if it was not cached.
    async fn remove(&self, key: &str) -> Result<Session>;

    /// Snapshot of all cached sessions.
    async fn values(&self) -> Vec<Session>;
}

/// Source of named caches.
pub trait CacheManager: Send + Sync {
    /// Resolve the cache registered under `name`.
    fn get_cache(&self, name: &str) -> Result<Arc<dyn Cache>>;
}

/// Entry stored in the cache.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Cached session snapshot.
    pub value: Session,

    /// When this entry was inserted into cache.
    pub cached_at: Instant,
}

impl CacheEntry {
    fn new(value: Session) -> Self {
        Self {
            value,
            cached_at: Instant::now(),
        }
    }
}

/// Session cache with LRU eviction.
///
/// The lock guards only the in-memory map and is never held across an
/// `.await`.
pub struct LruSessionCache {
    lru: Mutex<LruCache<String, CacheEntry>>,
    capacity: usize,
}

impl LruSessionCache {
    /// Create a cache holding at most `capacity` sessions (minimum one).
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            lru: Mutex::new(LruCache::new(cap)),
            capacity: cap.get(),
        }
    }

    /// Current number of cached sessions.
    pub fn len(&self) -> usize {
        self.lru.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lru.lock().is_empty()
    }

    /// Whether `key` is cached, without touching LRU order.
    pub fn contains(&self, key: &str) -> bool {
        self.lru.lock().contains(key)
    }

    /// Peek at a cache entry without updating LRU order.
    pub fn peek_entry(&self, key: &str) -> Option<CacheEntry> {
        self.lru.lock().peek(key).cloned()
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.len(),
            capacity: self.capacity,
        }
    }
}

#[async_trait]
impl Cache for LruSessionCache {
    async fn get(&self, key: &str) -> Option<Session> {
        let mut lru = self.lru.lock();
        match lru.get(key) {
            Some(entry) => {
                trace!(
                    session_id = %key,
                    age_ms = entry.cached_at.elapsed().as_millis() as u64,
                    "Session cache hit"
                );
                Some(entry.value.clone())
            }
            None => {
                trace!(session_id = %key, "Session cache miss");
                None
            }
        }
    }

    async fn put(&self, key: &str, value: Session) {
        let mut lru = self.lru.lock();
        if let Some((evicted, _)) = lru.push(key.to_string(), CacheEntry::new(value)) {
            if evicted != key {
                debug!(session_id = %evicted, "Evicting LRU session to make room");
            }
        }
        trace!(session_id = %key, cache_size = lru.len(), "Session cached");
    }

    async fn remove(&self, key: &str) -> Result<Session> {
        self.lru
            .lock()
            .pop(key)
            .map(|entry| entry.value)
            .ok_or_else(|| Error::Cache(format!("session [{key}] is not cached")))
    }

    async fn values(&self) -> Vec<Session> {
        self.lru
            .lock()
            .iter()
            .map(|(_, entry)| entry.value.clone())
            .collect()
    }
}

/// Cache statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Current number of cached sessions.
    pub size: usize,

    /// Maximum capacity.
    pub capacity: usize,
}

/// In-memory [`CacheManager`] handing out one [`LruSessionCache`] per name.
pub struct MemoryCacheManager {
    capacity: usize,
    caches: Mutex<HashMap<String, Arc<LruSessionCache>>>,
}

impl MemoryCacheManager {
    /// Create a manager whose caches hold at most `capacity` sessions each.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            caches: Mutex::new(HashMap::new()),
        }
    }
}

impl CacheManager for MemoryCacheManager {
    fn get_cache(&self, name: &str) -> Result<Arc<dyn Cache>> {
        if name.is_empty() {
            return Err(Error::IllegalArgument("cache name must not be empty".into()));
        }
        let mut caches = self.caches.lock();
        let cache: Arc<dyn Cache> = caches
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(cache = %name, capacity = self.capacity, "Creating session cache");
                Arc::new(LruSessionCache::new(self.capacity))
            })
            .clone();
        Ok(cache)
    }
}
