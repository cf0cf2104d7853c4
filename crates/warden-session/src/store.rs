//! Session store abstraction and the cache-aside store.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::cache::{Cache, CacheManager};
use crate::dao::SessionDao;
use crate::error::Result;
use crate::session::Session;

/// Name of the active-session cache resolved from a [`CacheManager`].
pub const ACTIVE_SESSION_CACHE_NAME: &str = "warden_active_session_cache";

/// Persistence contract used by the session handler.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a new session, assigning its id, and return that id.
    async fn create(&self, session: &mut Session) -> Result<String>;

    /// Read a session, failing with `UnknownSession` if it does not exist.
    async fn read(&self, session_id: &str) -> Result<Session>;

    /// Write back a changed session.
    async fn update(&self, session: &Session) -> Result<()>;

    /// Remove a session.
    async fn delete(&self, session: &Session) -> Result<()>;

    /// Point-in-time snapshot of the sessions known to the store.
    async fn get_active_sessions(&self) -> Result<Vec<Session>>;
}

/// Cache-aside layer in front of a backing [`SessionDao`].
///
/// - `create` writes the backing store, then caches the new session.
/// - `read` serves cache hits, otherwise reads the backing store and
///   populates the cache.
/// - `update` always writes the backing store, then caches the session if it
///   is still valid and evicts it otherwise.
/// - `delete` evicts first, then deletes from the backing store.
///
/// Without a cache every operation goes straight to the backing store.
/// Cache and backing store are not updated atomically; concurrent misses
/// for the same id both populate the cache and the last write wins.
pub struct CachingSessionStore {
    dao: Arc<dyn SessionDao>,
    cache: Option<Arc<dyn Cache>>,
}

impl CachingSessionStore {
    /// Create a store over `dao`, optionally fronted by `cache`.
    pub fn new(dao: Arc<dyn SessionDao>, cache: Option<Arc<dyn Cache>>) -> Self {
        Self { dao, cache }
    }

    /// Create a store that goes straight to the backing repository.
    pub fn without_cache(dao: Arc<dyn SessionDao>) -> Self {
        Self::new(dao, None)
    }

    /// Create a store whose active-session cache comes from `manager`.
    pub fn from_cache_manager(dao: Arc<dyn SessionDao>, manager: &dyn CacheManager) -> Result<Self> {
        let cache = manager.get_cache(ACTIVE_SESSION_CACHE_NAME)?;
        Ok(Self::new(dao, Some(cache)))
    }

    /// The backing repository.
    pub fn dao(&self) -> &Arc<dyn SessionDao> {
        &self.dao
    }

    /// The active-session cache, if configured.
    pub fn cache(&self) -> Option<&Arc<dyn Cache>> {
        self.cache.as_ref()
    }

    /// Sessions currently held in the active-session cache.
    pub async fn cached_sessions(&self) -> Vec<Session> {
        match &self.cache {
            Some(cache) => cache.values().await,
            None => Vec::new(),
        }
    }

    async fn cache_session(&self, session: &Session) {
        let (Some(cache), Some(session_id)) = (&self.cache, session.session_id()) else {
            return;
        };
        cache.put(session_id, session.clone()).await;
    }

    async fn uncache(&self, session: &Session) {
        let Some(cache) = &self.cache else {
            return;
        };
        let Some(session_id) = session.session_id() else {
            debug!("Tried to uncache a session without an id");
            return;
        };
        if let Err(e) = cache.remove(session_id).await {
            trace!(session_id = %session_id, error = %e, "Session was not cached");
        }
    }
}

#[async_trait]
impl SessionStore for CachingSessionStore {
    async fn create(&self, session: &mut Session) -> Result<String> {
        let session_id = self.dao.create(session).await?;
        self.cache_session(session).await;
        Ok(session_id)
    }

    async fn read(&self, session_id: &str) -> Result<Session> {
        if let Some(cache) = &self.cache {
            if let Some(session) = cache.get(session_id).await {
                trace!(session_id = %session_id, "Session served from cache");
                return Ok(session);
            }
        }

        debug!(session_id = %session_id, "Session cache miss, reading backing store");
        let session = self.dao.read_session(session_id).await?;
        self.cache_session(&session).await;
        Ok(session)
    }

    async fn update(&self, session: &Session) -> Result<()> {
        self.dao.update(session).await?;
        if session.is_valid() {
            self.cache_session(session).await;
        } else {
            self.uncache(session).await;
        }
        Ok(())
    }

    async fn delete(&self, session: &Session) -> Result<()> {
        self.uncache(session).await;
        self.dao.delete(session).await
    }

    async fn get_active_sessions(&self) -> Result<Vec<Session>> {
        self.dao.get_active_sessions().await
    }
}
