//! Public session manager API.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::cache::{Cache, LruSessionCache};
use crate::config::SessionManagerConfig;
use crate::dao::MemorySessionDao;
use crate::delegating::DelegatingSession;
use crate::error::{Error, Result};
use crate::events::{EventBus, InMemoryEventBus, SessionEventHandler};
use crate::factory::{SessionContext, SessionFactory, SimpleSessionFactory};
use crate::handler::SessionHandler;
use crate::key::SessionKey;
use crate::session::Session;
use crate::store::{CachingSessionStore, SessionStore};
use crate::validation::{
    ExecutorSessionValidationScheduler, SessionValidationScheduler, ValidatingSessionManager,
    ValidationSummary,
};

/// Session operations exposed to application code.
///
/// Every operation addresses the session by key. Reads resolve the session
/// through the validating lookup; mutations also write it back.
#[async_trait]
pub trait NativeSessionManager: Send + Sync {
    /// Create, persist and announce a new session.
    async fn start(&self, context: SessionContext) -> Result<DelegatingSession>;

    /// Look up a session. `None` when it does not exist.
    async fn get_session(&self, key: &SessionKey) -> Result<Option<DelegatingSession>>;

    async fn get_start_timestamp(&self, key: &SessionKey) -> Result<DateTime<Utc>>;

    async fn get_last_access_time(&self, key: &SessionKey) -> Result<DateTime<Utc>>;

    async fn get_idle_timeout(&self, key: &SessionKey) -> Result<TimeDelta>;

    async fn set_idle_timeout(&self, key: &SessionKey, timeout: TimeDelta) -> Result<()>;

    async fn get_absolute_timeout(&self, key: &SessionKey) -> Result<TimeDelta>;

    async fn set_absolute_timeout(&self, key: &SessionKey, timeout: TimeDelta) -> Result<()>;

    async fn touch(&self, key: &SessionKey) -> Result<()>;

    async fn get_host(&self, key: &SessionKey) -> Result<Option<String>>;

    async fn get_attribute_keys(&self, key: &SessionKey) -> Result<Vec<String>>;

    async fn get_attribute(&self, key: &SessionKey, attribute_key: &str) -> Result<Option<Value>>;

    /// Set an attribute. `None` is the same as [`Self::remove_attribute`].
    async fn set_attribute(
        &self,
        key: &SessionKey,
        attribute_key: &str,
        value: Option<Value>,
    ) -> Result<()>;

    /// Remove an attribute, returning the removed value.
    async fn remove_attribute(
        &self,
        key: &SessionKey,
        attribute_key: &str,
    ) -> Result<Option<Value>>;

    async fn get_internal_attribute_keys(&self, key: &SessionKey) -> Result<Vec<String>>;

    async fn get_internal_attribute(
        &self,
        key: &SessionKey,
        attribute_key: &str,
    ) -> Result<Option<Value>>;

    async fn set_internal_attribute(
        &self,
        key: &SessionKey,
        attribute_key: &str,
        value: Option<Value>,
    ) -> Result<()>;

    async fn remove_internal_attribute(
        &self,
        key: &SessionKey,
        attribute_key: &str,
    ) -> Result<Option<Value>>;

    /// Whether the session exists and is valid. Never fails.
    async fn is_valid(&self, key: &SessionKey) -> bool;

    /// Fail unless the session exists and is valid.
    async fn check_valid(&self, key: &SessionKey) -> Result<()>;

    /// Stop the session, notify, and apply the delete policy.
    async fn stop(&self, key: &SessionKey) -> Result<()>;
}

/// Number of per-session write locks. Sessions hashing to the same stripe
/// share a lock.
const WRITE_LOCK_STRIPES: usize = 64;

/// Builder for [`DefaultNativeSessionManager`].
pub struct SessionManagerBuilder {
    config: SessionManagerConfig,
    store: Option<Arc<dyn SessionStore>>,
    event_handler: SessionEventHandler,
    factory: Arc<dyn SessionFactory>,
}

impl SessionManagerBuilder {
    fn new(config: SessionManagerConfig) -> Self {
        Self {
            config,
            store: None,
            event_handler: SessionEventHandler::new(Arc::new(InMemoryEventBus::new())),
            factory: Arc::new(SimpleSessionFactory),
        }
    }

    /// Use a custom store instead of the in-memory caching store.
    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<dyn EventBus>) -> Self {
        self.event_handler = SessionEventHandler::new(event_bus);
        self
    }

    /// Run without an event bus. Every lifecycle notification then fails.
    pub fn without_event_bus(mut self) -> Self {
        self.event_handler = SessionEventHandler::without_event_bus();
        self
    }

    pub fn with_factory(mut self, factory: Arc<dyn SessionFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn build(self) -> Arc<DefaultNativeSessionManager> {
        let config = self.config;
        let store: Arc<dyn SessionStore> = match self.store {
            Some(store) => store,
            None => {
                let cache: Arc<dyn Cache> = Arc::new(LruSessionCache::new(config.cache_capacity));
                Arc::new(CachingSessionStore::new(
                    Arc::new(MemorySessionDao::new()),
                    Some(cache),
                ))
            }
        };
        let handler = SessionHandler::new(store, self.event_handler)
            .with_auto_touch(config.auto_touch)
            .with_delete_invalid_sessions(config.delete_invalid_sessions);
        let factory = self.factory;

        Arc::new_cyclic(|me| DefaultNativeSessionManager {
            me: me.clone(),
            handler,
            factory,
            config,
            scheduler: Mutex::new(None),
            write_locks: (0..WRITE_LOCK_STRIPES).map(|_| AsyncMutex::new(())).collect(),
        })
    }
}

/// Default session manager with background validation.
///
/// Always handled through an `Arc`: exposed sessions and the validation
/// scheduler refer back to it.
pub struct DefaultNativeSessionManager {
    me: Weak<DefaultNativeSessionManager>,
    handler: SessionHandler,
    factory: Arc<dyn SessionFactory>,
    config: SessionManagerConfig,
    scheduler: Mutex<Option<Arc<dyn SessionValidationScheduler>>>,
    /// Serializes read-modify-write cycles on the same session.
    write_locks: Box<[AsyncMutex<()>]>,
}

impl DefaultNativeSessionManager {
    /// Manager over the default in-memory store and event bus.
    pub fn new(config: SessionManagerConfig) -> Arc<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: SessionManagerConfig) -> SessionManagerBuilder {
        SessionManagerBuilder::new(config)
    }

    pub fn config(&self) -> &SessionManagerConfig {
        &self.config
    }

    pub fn session_handler(&self) -> &SessionHandler {
        &self.handler
    }

    /// Install a custom scheduler, replacing (without disabling) any current one.
    pub fn set_session_validation_scheduler(&self, scheduler: Arc<dyn SessionValidationScheduler>) {
        *self.scheduler.lock() = Some(scheduler);
    }

    pub fn session_validation_scheduler(&self) -> Option<Arc<dyn SessionValidationScheduler>> {
        self.scheduler.lock().clone()
    }

    /// Snapshot of every session in the store.
    pub async fn get_active_sessions(&self) -> Result<Vec<Session>> {
        self.handler.store().get_active_sessions().await
    }

    /// Validating lookup; `None` when the session does not exist.
    pub async fn lookup_session(&self, key: &SessionKey) -> Result<Option<Session>> {
        self.handler.do_get_session(key).await
    }

    /// Validating lookup that treats absence as an error.
    pub async fn lookup_required_session(&self, key: &SessionKey) -> Result<Session> {
        self.lookup_session(key)
            .await?
            .ok_or_else(|| Error::UnknownSession(key.to_string()))
    }

    async fn create_session(&self, context: &SessionContext) -> Result<Session> {
        self.enable_session_validation_if_necessary()?;
        let mut session = self.factory.create_session(context);
        let session_id = self.handler.create_session(&mut session).await?;
        debug!(session_id = %session_id, "Session created");
        Ok(session)
    }

    async fn apply_session_timeouts(&self, session: &mut Session) -> Result<()> {
        session.set_idle_timeout(self.config.idle_timeout);
        session.set_absolute_timeout(self.config.absolute_timeout);
        self.handler.on_change(session).await
    }

    /// Hook run after a session is created and before it is announced.
    fn on_start(&self, session: &Session, context: &SessionContext) {
        debug!(
            session_id = ?session.session_id(),
            host = ?context.host(),
            "Session started"
        );
    }

    fn create_exposed_session(&self, session: &Session) -> Result<DelegatingSession> {
        let manager: Arc<dyn NativeSessionManager> = self
            .me
            .upgrade()
            .ok_or_else(|| Error::IllegalState("session manager has been dropped".into()))?;
        Ok(DelegatingSession::new(
            manager,
            self.create_session_key(session),
            session.start_timestamp(),
            session.host().map(str::to_string),
        ))
    }

    /// Stop `session`, always running the post-stop policy afterwards.
    ///
    /// The first error wins: a failure to stop is reported even when the
    /// cleanup also fails.
    async fn stop_session(&self, session: &mut Session, key: &SessionKey) -> Result<()> {
        let stopped = self.stop_and_notify(session, key).await;
        let cleaned = self.handler.after_stopped(session).await;
        stopped.and(cleaned)
    }

    async fn stop_and_notify(&self, session: &mut Session, key: &SessionKey) -> Result<()> {
        debug!(session_id = ?session.session_id(), "Stopping session");
        session.stop().map_err(Error::Invalid)?;
        self.handler.on_stop(session).await?;
        self.handler
            .event_handler()
            .notify_stop(self.handler.session_tuple(session, key.clone()))
            .await
    }

    fn write_lock(&self, key: &SessionKey) -> &AsyncMutex<()> {
        let mut hasher = DefaultHasher::new();
        key.session_id().hash(&mut hasher);
        let stripe = (hasher.finish() % self.write_locks.len() as u64) as usize;
        &self.write_locks[stripe]
    }

    /// Read, change and write back one session while holding its write lock.
    async fn mutate<F, T>(&self, key: &SessionKey, mutation: F) -> Result<T>
    where
        F: FnOnce(&mut Session) -> T + Send,
        T: Send,
    {
        let _guard = self.write_lock(key).lock().await;
        let mut session = self.lookup_required_session(key).await?;
        let result = mutation(&mut session);
        self.handler.on_change(&session).await?;
        Ok(result)
    }

    /// Like [`Self::mutate`], but only writes back when something was removed.
    async fn remove<F>(&self, key: &SessionKey, removal: F) -> Result<Option<Value>>
    where
        F: FnOnce(&mut Session) -> Option<Value> + Send,
    {
        let _guard = self.write_lock(key).lock().await;
        let mut session = self.lookup_required_session(key).await?;
        let removed = removal(&mut session);
        if removed.is_some() {
            self.handler.on_change(&session).await?;
        }
        Ok(removed)
    }

    fn create_session_validation_scheduler(&self) -> Result<Arc<dyn SessionValidationScheduler>> {
        let manager: Weak<dyn ValidatingSessionManager> = self.me.clone();
        let scheduler =
            ExecutorSessionValidationScheduler::new(manager, self.config.validation_interval)?;
        Ok(Arc::new(scheduler))
    }

    fn after_session_validation_enabled(&self) {
        debug!("Session validation enabled");
    }

    fn before_session_validation_disabled(&self) {
        debug!("Disabling session validation");
    }

    /// Validate one session during a sweep.
    ///
    /// The listed session only supplies the key; the current record is read
    /// again so a session touched since the listing is judged on its latest
    /// state. Sessions removed in the meantime are skipped.
    async fn sweep_one(&self, listed: Session) -> Result<()> {
        let key = self.create_session_key(&listed);
        let _guard = self.write_lock(&key).lock().await;
        let Some(mut session) = self.handler.retrieve_session(&key).await? else {
            debug!(session_key = %key, "Session removed before it was validated");
            return Ok(());
        };
        self.handler.validate(&mut session, &key).await
    }
}

#[async_trait]
impl NativeSessionManager for DefaultNativeSessionManager {
    async fn start(&self, context: SessionContext) -> Result<DelegatingSession> {
        let mut session = self.create_session(&context).await?;
        self.apply_session_timeouts(&mut session).await?;
        self.on_start(&session, &context);
        self.handler.event_handler().notify_start(&session).await?;
        self.create_exposed_session(&session)
    }

    async fn get_session(&self, key: &SessionKey) -> Result<Option<DelegatingSession>> {
        match self.lookup_session(key).await? {
            Some(session) => self.create_exposed_session(&session).map(Some),
            None => Ok(None),
        }
    }

    async fn get_start_timestamp(&self, key: &SessionKey) -> Result<DateTime<Utc>> {
        Ok(self.lookup_required_session(key).await?.start_timestamp())
    }

    async fn get_last_access_time(&self, key: &SessionKey) -> Result<DateTime<Utc>> {
        Ok(self.lookup_required_session(key).await?.last_access_time())
    }

    async fn get_idle_timeout(&self, key: &SessionKey) -> Result<TimeDelta> {
        Ok(self.lookup_required_session(key).await?.idle_timeout())
    }

    async fn set_idle_timeout(&self, key: &SessionKey, timeout: TimeDelta) -> Result<()> {
        self.mutate(key, |session| session.set_idle_timeout(timeout))
            .await
    }

    async fn get_absolute_timeout(&self, key: &SessionKey) -> Result<TimeDelta> {
        Ok(self.lookup_required_session(key).await?.absolute_timeout())
    }

    async fn set_absolute_timeout(&self, key: &SessionKey, timeout: TimeDelta) -> Result<()> {
        self.mutate(key, |session| session.set_absolute_timeout(timeout))
            .await
    }

    async fn touch(&self, key: &SessionKey) -> Result<()> {
        self.mutate(key, Session::touch).await
    }

    async fn get_host(&self, key: &SessionKey) -> Result<Option<String>> {
        Ok(self
            .lookup_required_session(key)
            .await?
            .host()
            .map(str::to_string))
    }

    async fn get_attribute_keys(&self, key: &SessionKey) -> Result<Vec<String>> {
        Ok(self.lookup_required_session(key).await?.attribute_keys())
    }

    async fn get_attribute(&self, key: &SessionKey, attribute_key: &str) -> Result<Option<Value>> {
        Ok(self
            .lookup_required_session(key)
            .await?
            .get_attribute(attribute_key)
            .cloned())
    }

    async fn set_attribute(
        &self,
        key: &SessionKey,
        attribute_key: &str,
        value: Option<Value>,
    ) -> Result<()> {
        let Some(value) = value else {
            return self.remove_attribute(key, attribute_key).await.map(|_| ());
        };
        self.mutate(key, |session| {
            session.set_attribute(attribute_key, Some(value));
        })
        .await
    }

    async fn remove_attribute(
        &self,
        key: &SessionKey,
        attribute_key: &str,
    ) -> Result<Option<Value>> {
        self.remove(key, |session| session.remove_attribute(attribute_key))
            .await
    }

    async fn get_internal_attribute_keys(&self, key: &SessionKey) -> Result<Vec<String>> {
        Ok(self
            .lookup_required_session(key)
            .await?
            .internal_attribute_keys())
    }

    async fn get_internal_attribute(
        &self,
        key: &SessionKey,
        attribute_key: &str,
    ) -> Result<Option<Value>> {
        Ok(self
            .lookup_required_session(key)
            .await?
            .get_internal_attribute(attribute_key)
            .cloned())
    }

    async fn set_internal_attribute(
        &self,
        key: &SessionKey,
        attribute_key: &str,
        value: Option<Value>,
    ) -> Result<()> {
        let Some(value) = value else {
            return self
                .remove_internal_attribute(key, attribute_key)
                .await
                .map(|_| ());
        };
        self.mutate(key, |session| {
            session.set_internal_attribute(attribute_key, Some(value));
        })
        .await
    }

    async fn remove_internal_attribute(
        &self,
        key: &SessionKey,
        attribute_key: &str,
    ) -> Result<Option<Value>> {
        self.remove(key, |session| session.remove_internal_attribute(attribute_key))
            .await
    }

    async fn is_valid(&self, key: &SessionKey) -> bool {
        match self.check_valid(key).await {
            Ok(()) => true,
            Err(e) if e.is_invalid_session() => false,
            Err(e) => {
                warn!(session_key = %key, error = %e, "Session validity check failed");
                false
            }
        }
    }

    async fn check_valid(&self, key: &SessionKey) -> Result<()> {
        self.lookup_required_session(key).await.map(|_| ())
    }

    async fn stop(&self, key: &SessionKey) -> Result<()> {
        let _guard = self.write_lock(key).lock().await;
        let mut session = self.lookup_required_session(key).await?;
        self.stop_session(&mut session, key).await
    }
}

#[async_trait]
impl ValidatingSessionManager for DefaultNativeSessionManager {
    async fn validate_sessions(&self) -> Result<ValidationSummary> {
        info!("Validating all active sessions");
        let sessions = self.get_active_sessions().await?;
        let mut summary = ValidationSummary::new(sessions.len());

        let outcomes: Vec<Result<()>> = stream::iter(sessions)
            .map(|session| self.sweep_one(session))
            .buffer_unordered(self.config.validation_concurrency.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                Ok(()) => {}
                Err(e) if e.is_invalid_session() => {
                    debug!(cause = ?e.validation_cause(), "Session invalidated by sweep");
                    summary.invalidated += 1;
                }
                Err(e) => {
                    warn!(error = %e, "Session could not be validated during sweep");
                    summary.errors += 1;
                }
            }
        }
        Ok(summary)
    }

    fn enable_session_validation(&self) -> Result<()> {
        let scheduler = {
            let mut slot = self.scheduler.lock();
            match slot.as_ref() {
                Some(scheduler) => scheduler.clone(),
                None => {
                    let scheduler = self.create_session_validation_scheduler()?;
                    *slot = Some(scheduler.clone());
                    scheduler
                }
            }
        };
        scheduler.enable_session_validation()?;
        self.after_session_validation_enabled();
        Ok(())
    }

    fn disable_session_validation(&self) {
        self.before_session_validation_disabled();
        let scheduler = self.scheduler.lock().take();
        if let Some(scheduler) = scheduler {
            if let Err(e) = scheduler.disable_session_validation() {
                warn!(error = %e, "Unable to disable session validation scheduler");
            }
        }
    }

    fn enable_session_validation_if_necessary(&self) -> Result<()> {
        if !self.is_session_validation_scheduler_enabled() {
            return Ok(());
        }
        let running = self
            .scheduler
            .lock()
            .as_ref()
            .is_some_and(|scheduler| scheduler.is_enabled());
        if running {
            return Ok(());
        }
        self.enable_session_validation()
    }

    fn is_session_validation_scheduler_enabled(&self) -> bool {
        self.config.session_validation_scheduler_enabled
    }
}
