//! Session lifecycle integration tests.
//!
//! These tests drive the public manager API end to end over the in-memory
//! store, cache and event bus:
//!
//! - Idle expiry on lookup (notification and deletion)
//! - Background sweeps, both on demand and on the scheduler
//! - Cache eviction of sessions that stop being valid
//! - Attribute semantics through the delegating view

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{TimeDelta, Utc};
use serde_json::json;
use warden_session::{
    CachingSessionStore, DefaultNativeSessionManager, Error, EventPayload, InMemoryEventBus,
    LruSessionCache, MemorySessionDao, NativeSessionManager, Session, SessionContext, SessionDao,
    SessionKey, SessionManagerConfig, SessionStore, SessionValidationScheduler,
    ValidatingSessionManager, ValidationError, topics,
};

// ─────────────────────────────────────────────────────────────────────────────
// Fixtures
// ─────────────────────────────────────────────────────────────────────────────

struct Harness {
    manager: Arc<DefaultNativeSessionManager>,
    store: Arc<CachingSessionStore>,
    dao: Arc<MemorySessionDao>,
    bus: Arc<InMemoryEventBus>,
}

impl Harness {
    fn new(config: SessionManagerConfig) -> Self {
        init_tracing();
        let dao = Arc::new(MemorySessionDao::new());
        let cache = Arc::new(LruSessionCache::new(100));
        let store = Arc::new(CachingSessionStore::new(dao.clone(), Some(cache)));
        let bus = Arc::new(InMemoryEventBus::new());
        let manager = DefaultNativeSessionManager::builder(config)
            .with_store(store.clone())
            .with_event_bus(bus.clone())
            .build();
        Self {
            manager,
            store,
            dao,
            bus,
        }
    }

    /// Manager that never starts the background scheduler on its own.
    fn manual() -> Self {
        Self::new(
            SessionManagerConfig::new()
                .with_idle_timeout(TimeDelta::minutes(15))
                .with_absolute_timeout(TimeDelta::minutes(60))
                .with_session_validation_scheduler_enabled(false),
        )
    }

    async fn start(&self) -> Result<SessionKey> {
        let session = self.manager.start(SessionContext::new()).await?;
        Ok(session.session_key().clone())
    }

    /// Rewind the stored session's last access time by `idle`.
    async fn idle_for(&self, key: &SessionKey, idle: TimeDelta) -> Result<()> {
        let id = key.session_id().expect("key has an id");
        let mut session = self.dao.read_session(id).await?;
        session.set_last_access_time(Utc::now() - idle);
        self.store.update(&session).await?;
        Ok(())
    }

    /// Mark the stored session stopped without going through the manager.
    async fn stop_behind_manager(&self, key: &SessionKey) -> Result<()> {
        let id = key.session_id().expect("key has an id");
        let mut session = self.dao.read_session(id).await?;
        session.stop()?;
        self.store.update(&session).await?;
        Ok(())
    }

    async fn active_ids(&self) -> Result<Vec<String>> {
        Ok(self
            .manager
            .get_active_sessions()
            .await?
            .iter()
            .filter_map(|s| s.session_id().map(str::to_string))
            .collect())
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ─────────────────────────────────────────────────────────────────────────────
// Expiry on lookup
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_idle_session_expires_on_lookup() -> Result<()> {
    let harness = Harness::manual();
    let mut expired_rx = harness.bus.subscribe(topics::SESSION_EXPIRE);
    let key = harness.start().await?;

    harness.idle_for(&key, TimeDelta::minutes(16)).await?;
    let result = harness.manager.get_session(&key).await;

    assert!(matches!(
        result,
        Err(Error::Expired(ValidationError::IdleExpired { .. }))
    ));
    let event = expired_rx.recv().await?;
    let EventPayload::Session(tuple) = event.results else {
        panic!("expire event should carry the session tuple");
    };
    assert_eq!(tuple.session_key, key);
    assert!(harness.active_ids().await?.is_empty());

    // Gone for good once deleted
    assert!(harness.manager.get_session(&key).await?.is_none());
    assert!(!harness.manager.is_valid(&key).await);
    Ok(())
}

#[tokio::test]
async fn test_idle_within_timeout_stays_valid() -> Result<()> {
    let harness = Harness::manual();
    let key = harness.start().await?;

    harness.idle_for(&key, TimeDelta::minutes(14)).await?;

    assert!(harness.manager.get_session(&key).await?.is_some());
    assert!(harness.manager.is_valid(&key).await);
    Ok(())
}

#[tokio::test]
async fn test_expired_session_kept_when_deletion_disabled() -> Result<()> {
    let harness = Harness::new(
        SessionManagerConfig::new()
            .with_session_validation_scheduler_enabled(false)
            .with_delete_invalid_sessions(false),
    );
    let key = harness.start().await?;

    harness.idle_for(&key, TimeDelta::minutes(16)).await?;

    assert!(harness.manager.get_session(&key).await.is_err());
    assert_eq!(harness.active_ids().await?.len(), 1);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Sweeps
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_sweep_counts_expired_and_stopped() -> Result<()> {
    let harness = Harness::manual();
    let mut stop_rx = harness.bus.subscribe(topics::SESSION_STOP);
    let mut expire_rx = harness.bus.subscribe(topics::SESSION_EXPIRE);

    let valid = harness.start().await?;
    let expired = harness.start().await?;
    let stopped = harness.start().await?;
    harness.idle_for(&expired, TimeDelta::minutes(16)).await?;
    harness.stop_behind_manager(&stopped).await?;

    let summary = harness.manager.validate_sessions().await?;

    assert_eq!(summary.validated, 3);
    assert_eq!(summary.invalidated, 2);
    assert!(summary.to_string().contains("[2] sessions"));

    assert_eq!(expire_rx.recv().await?.event_topic, "SESSION.EXPIRE");
    assert_eq!(stop_rx.recv().await?.event_topic, "SESSION.STOP");
    assert_eq!(
        harness.active_ids().await?,
        vec![valid.session_id().unwrap_or_default().to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn test_scheduler_sweeps_in_background() -> Result<()> {
    let harness = Harness::new(
        SessionManagerConfig::new().with_validation_interval(Duration::from_millis(30)),
    );
    let mut expire_rx = harness.bus.subscribe(topics::SESSION_EXPIRE);

    // Starting a session enables validation
    let keep = harness.start().await?;
    let expire = harness.start().await?;
    assert!(
        harness
            .manager
            .session_validation_scheduler()
            .is_some_and(|scheduler| scheduler.is_enabled())
    );

    harness.idle_for(&expire, TimeDelta::minutes(16)).await?;

    let event = tokio::time::timeout(Duration::from_secs(2), expire_rx.recv()).await??;
    assert_eq!(event.event_topic, "SESSION.EXPIRE");
    assert_eq!(
        harness.active_ids().await?,
        vec![keep.session_id().unwrap_or_default().to_string()]
    );

    harness.manager.disable_session_validation();
    harness.manager.disable_session_validation();
    assert!(harness.manager.session_validation_scheduler().is_none());
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Store and cache
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_invalid_update_evicts_from_cache() -> Result<()> {
    let harness = Harness::manual();
    let key = harness.start().await?;
    let id = key.session_id().unwrap_or_default().to_string();
    assert!(
        harness
            .store
            .cached_sessions()
            .await
            .iter()
            .any(|s| s.session_id() == Some(id.as_str()))
    );

    harness.stop_behind_manager(&key).await?;

    assert!(
        harness
            .store
            .cached_sessions()
            .await
            .iter()
            .all(|s| s.session_id() != Some(id.as_str()))
    );
    assert!(harness.dao.read_session(&id).await?.is_stopped());
    Ok(())
}

#[tokio::test]
async fn test_store_round_trip_from_cache_and_backing_store() -> Result<()> {
    let dao = Arc::new(MemorySessionDao::new());
    let cache = Arc::new(LruSessionCache::new(10));
    let store = CachingSessionStore::new(dao.clone(), Some(cache));

    let mut session = Session::new(Some("10.1.1.1".to_string()));
    session.set_attribute("cart", Some(json!([1, 2, 3])));
    let id = store.create(&mut session).await?;

    assert_eq!(store.read(&id).await?, session);

    // Force the backing-store path
    let fresh = CachingSessionStore::new(dao, Some(Arc::new(LruSessionCache::new(10))));
    assert_eq!(fresh.read(&id).await?, session);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Delegating view
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_set_attribute_none_is_remove() -> Result<()> {
    let harness = Harness::manual();
    let session = harness
        .manager
        .start(SessionContext::new().with_host("127.0.0.1"))
        .await?;

    session.set_attribute("k", Some(json!("v"))).await?;
    session.set_attribute("other", Some(json!(2))).await?;
    session.set_attribute("k", None).await?;
    let via_set = session.attribute_keys().await?;

    session.set_attribute("k", Some(json!("v"))).await?;
    session.remove_attribute("k").await?;
    let via_remove = session.attribute_keys().await?;

    assert_eq!(via_set, via_remove);
    assert_eq!(via_set, vec!["other".to_string()]);
    assert_eq!(session.host(), Some("127.0.0.1"));
    Ok(())
}

#[tokio::test]
async fn test_view_reflects_store_not_snapshot() -> Result<()> {
    let harness = Harness::manual();
    let session = harness.manager.start(SessionContext::new()).await?;
    let other_view = harness
        .manager
        .get_session(session.session_key())
        .await?
        .expect("session exists");

    session.set_idle_timeout(TimeDelta::minutes(3)).await?;

    assert_eq!(other_view.idle_timeout().await?, TimeDelta::minutes(3));

    other_view.stop().await?;
    assert!(!session.is_valid().await);
    assert!(matches!(
        session.touch().await,
        Err(Error::UnknownSession(_))
    ));
    Ok(())
}
