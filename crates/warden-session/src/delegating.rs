//! Caller-facing session view.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;

use crate::error::Result;
use crate::key::SessionKey;
use crate::manager::NativeSessionManager;

/// Capability-limited handle to a managed session.
///
/// Holds only the session key plus the immutable start timestamp and host.
/// Every other read and every mutation is routed back through the manager,
/// so the view never aliases stored state and always reflects the store.
#[derive(Clone)]
pub struct DelegatingSession {
    key: SessionKey,
    manager: Arc<dyn NativeSessionManager>,
    start_timestamp: DateTime<Utc>,
    host: Option<String>,
}

impl DelegatingSession {
    pub fn new(
        manager: Arc<dyn NativeSessionManager>,
        key: SessionKey,
        start_timestamp: DateTime<Utc>,
        host: Option<String>,
    ) -> Self {
        Self {
            key,
            manager,
            start_timestamp,
            host,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.key.session_id()
    }

    pub fn session_key(&self) -> &SessionKey {
        &self.key
    }

    pub fn start_timestamp(&self) -> DateTime<Utc> {
        self.start_timestamp
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub async fn last_access_time(&self) -> Result<DateTime<Utc>> {
        self.manager.get_last_access_time(&self.key).await
    }

    pub async fn idle_timeout(&self) -> Result<TimeDelta> {
        self.manager.get_idle_timeout(&self.key).await
    }

    pub async fn set_idle_timeout(&self, timeout: TimeDelta) -> Result<()> {
        self.manager.set_idle_timeout(&self.key, timeout).await
    }

    pub async fn absolute_timeout(&self) -> Result<TimeDelta> {
        self.manager.get_absolute_timeout(&self.key).await
    }

    pub async fn set_absolute_timeout(&self, timeout: TimeDelta) -> Result<()> {
        self.manager.set_absolute_timeout(&self.key, timeout).await
    }

    pub async fn touch(&self) -> Result<()> {
        self.manager.touch(&self.key).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.manager.stop(&self.key).await
    }

    pub async fn is_valid(&self) -> bool {
        self.manager.is_valid(&self.key).await
    }

    pub async fn attribute_keys(&self) -> Result<Vec<String>> {
        self.manager.get_attribute_keys(&self.key).await
    }

    pub async fn get_attribute(&self, attribute_key: &str) -> Result<Option<Value>> {
        self.manager.get_attribute(&self.key, attribute_key).await
    }

    /// Set an attribute; `None` removes it.
    pub async fn set_attribute(&self, attribute_key: &str, value: Option<Value>) -> Result<()> {
        self.manager
            .set_attribute(&self.key, attribute_key, value)
            .await
    }

    pub async fn remove_attribute(&self, attribute_key: &str) -> Result<Option<Value>> {
        self.manager.remove_attribute(&self.key, attribute_key).await
    }
}

impl fmt::Debug for DelegatingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegatingSession")
            .field("key", &self.key)
            .field("start_timestamp", &self.start_timestamp)
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}
