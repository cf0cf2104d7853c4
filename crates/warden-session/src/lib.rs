//! Server-side session management.
//!
//! This crate provides the session lifecycle for Warden:
//! - `Session` records with idle and absolute timeouts
//! - A cache-aside `CachingSessionStore` over a backing `SessionDao`
//! - A `SessionHandler` that routes expired and stopped sessions through
//!   notification and the delete policy
//! - `DefaultNativeSessionManager`, the key-addressed public API
//! - A background validation scheduler that sweeps all active sessions
//!
//! # Example
//!
//! ```rust,ignore
//! use warden_session::{DefaultNativeSessionManager, NativeSessionManager, SessionContext, SessionManagerConfig};
//!
//! let manager = DefaultNativeSessionManager::new(
//!     SessionManagerConfig::default().with_idle_timeout(TimeDelta::minutes(30)),
//! );
//!
//! let session = manager.start(SessionContext::new().with_host("10.0.0.7")).await?;
//! session.set_attribute("theme", Some(json!("dark"))).await?;
//! ```

mod cache;
mod config;
mod dao;
mod delegating;
mod error;
mod events;
mod factory;
mod handler;
mod key;
mod manager;
mod session;
mod store;
mod validation;

pub use cache::{Cache, CacheEntry, CacheManager, CacheStats, LruSessionCache, MemoryCacheManager};
pub use config::{
    DEFAULT_ABSOLUTE_TIMEOUT, DEFAULT_CACHE_CAPACITY, DEFAULT_IDLE_TIMEOUT,
    DEFAULT_VALIDATION_CONCURRENCY, DEFAULT_VALIDATION_INTERVAL, SessionManagerConfig,
};
pub use dao::{
    MemorySessionDao, RandomSessionIdGenerator, SessionDao, SessionIdGenerator,
    assign_session_id, generate_session_id, require_session, verify_session_id,
};
pub use delegating::DelegatingSession;
pub use error::{Error, Result, ValidationError};
pub use events::{
    Event, EventBus, EventBusError, EventPayload, InMemoryEventBus, SessionEventHandler,
    SessionTuple, topics,
};
pub use factory::{SessionContext, SessionFactory, SimpleSessionFactory};
pub use handler::{Expiration, SessionHandler};
pub use key::SessionKey;
pub use manager::{DefaultNativeSessionManager, NativeSessionManager, SessionManagerBuilder};
pub use session::{IDENTIFIERS_SESSION_KEY, Session};
pub use store::{ACTIVE_SESSION_CACHE_NAME, CachingSessionStore, SessionStore};
pub use validation::{
    ExecutorSessionValidationScheduler, SessionValidationScheduler, ValidatingSessionManager,
    ValidationSummary,
};
