//! The server-side session record.

use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;

use crate::config::{DEFAULT_ABSOLUTE_TIMEOUT, DEFAULT_IDLE_TIMEOUT};
use crate::error::ValidationError;

/// Internal attribute under which the framework binds the session's identity.
pub const IDENTIFIERS_SESSION_KEY: &str = "identifiers_session_key";

/// A server-side session with timeout policy and attribute state.
///
/// Sessions are plain values. The store owns the persisted copy; everything
/// else works on snapshots and writes changes back through the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    session_id: Option<String>,
    start_timestamp: DateTime<Utc>,
    stop_timestamp: Option<DateTime<Utc>>,
    last_access_time: DateTime<Utc>,
    idle_timeout: TimeDelta,
    absolute_timeout: TimeDelta,
    host: Option<String>,
    attributes: HashMap<String, Value>,
    internal_attributes: HashMap<String, Value>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Session {
    /// Create a new, not yet persisted session originating from `host`.
    pub fn new(host: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: None,
            start_timestamp: now,
            stop_timestamp: None,
            last_access_time: now,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            absolute_timeout: DEFAULT_ABSOLUTE_TIMEOUT,
            host,
            attributes: HashMap::new(),
            internal_attributes: HashMap::new(),
        }
    }

    /// Override the start timestamp of a session that has not been persisted.
    pub fn with_start_timestamp(mut self, started: DateTime<Utc>) -> Self {
        self.start_timestamp = started;
        self.last_access_time = started;
        self
    }

    /// The session identifier, once assigned by the store.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub(crate) fn set_session_id(&mut self, session_id: String) {
        self.session_id = Some(session_id);
    }

    pub fn start_timestamp(&self) -> DateTime<Utc> {
        self.start_timestamp
    }

    pub fn stop_timestamp(&self) -> Option<DateTime<Utc>> {
        self.stop_timestamp
    }

    pub fn last_access_time(&self) -> DateTime<Utc> {
        self.last_access_time
    }

    pub fn set_last_access_time(&mut self, at: DateTime<Utc>) {
        self.last_access_time = at;
    }

    pub fn idle_timeout(&self) -> TimeDelta {
        self.idle_timeout
    }

    pub fn set_idle_timeout(&mut self, timeout: TimeDelta) {
        self.idle_timeout = timeout;
    }

    pub fn absolute_timeout(&self) -> TimeDelta {
        self.absolute_timeout
    }

    pub fn set_absolute_timeout(&mut self, timeout: TimeDelta) {
        self.absolute_timeout = timeout;
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Record an access now.
    pub fn touch(&mut self) {
        self.last_access_time = Utc::now();
    }

    /// Stop the session.
    ///
    /// Stopping is one-shot: a session that is already stopped keeps its
    /// original stop timestamp and the call reports it as invalid.
    pub fn stop(&mut self) -> Result<(), ValidationError> {
        if let Some(stop_timestamp) = self.stop_timestamp {
            return Err(ValidationError::Stopped {
                session_id: self.session_id.clone().unwrap_or_default(),
                stop_timestamp,
            });
        }
        self.stop_timestamp = Some(Utc::now());
        Ok(())
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_timestamp.is_some()
    }

    /// Whether either timeout has elapsed at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry_at(now).is_some()
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Whether the session is neither stopped nor expired.
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Validate the session against the current time.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.validate_at(Utc::now())
    }

    /// Validate the session against `now`.
    ///
    /// The stop check runs first, then the absolute timeout, then the idle
    /// timeout. The first failing check is reported.
    pub fn validate_at(&self, now: DateTime<Utc>) -> Result<(), ValidationError> {
        if let Some(stop_timestamp) = self.stop_timestamp {
            return Err(ValidationError::Stopped {
                session_id: self.session_id.clone().unwrap_or_default(),
                stop_timestamp,
            });
        }
        match self.expiry_at(now) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn expiry_at(&self, now: DateTime<Utc>) -> Option<ValidationError> {
        let session_id = || self.session_id.clone().unwrap_or_default();

        if self.absolute_timeout > TimeDelta::zero()
            && now - self.start_timestamp > self.absolute_timeout
        {
            return Some(ValidationError::AbsoluteExpired {
                session_id: session_id(),
                start_timestamp: self.start_timestamp,
                timeout: self.absolute_timeout,
            });
        }

        if self.idle_timeout > TimeDelta::zero()
            && now - self.last_access_time > self.idle_timeout
        {
            return Some(ValidationError::IdleExpired {
                session_id: session_id(),
                last_access_time: self.last_access_time,
                timeout: self.idle_timeout,
            });
        }

        None
    }

    // ── Application attributes ──────────────────────────────────────────

    pub fn get_attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Set an attribute; `None` removes it. Returns the previous value.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: Option<Value>) -> Option<Value> {
        let key = key.into();
        match value {
            Some(value) => self.attributes.insert(key, value),
            None => self.attributes.remove(&key),
        }
    }

    pub fn remove_attribute(&mut self, key: &str) -> Option<Value> {
        self.attributes.remove(key)
    }

    /// Attribute keys in sorted order.
    pub fn attribute_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.attributes.keys().cloned().collect();
        keys.sort();
        keys
    }

    // ── Framework-internal attributes ───────────────────────────────────

    pub fn get_internal_attribute(&self, key: &str) -> Option<&Value> {
        self.internal_attributes.get(key)
    }

    pub fn set_internal_attribute(
        &mut self,
        key: impl Into<String>,
        value: Option<Value>,
    ) -> Option<Value> {
        let key = key.into();
        match value {
            Some(value) => self.internal_attributes.insert(key, value),
            None => self.internal_attributes.remove(&key),
        }
    }

    pub fn remove_internal_attribute(&mut self, key: &str) -> Option<Value> {
        self.internal_attributes.remove(key)
    }

    pub fn internal_attribute_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.internal_attributes.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session_with_timeouts(idle: TimeDelta, absolute: TimeDelta) -> Session {
        let mut session = Session::new(Some("127.0.0.1".to_string()));
        session.set_session_id("sid-1".to_string());
        session.set_idle_timeout(idle);
        session.set_absolute_timeout(absolute);
        session
    }

    #[test]
    fn test_new_session_is_valid() {
        let session = Session::new(None);
        assert!(session.is_valid());
        assert!(!session.is_stopped());
        assert!(session.session_id().is_none());
    }

    #[test]
    fn test_idle_expiry_boundary() {
        let session = session_with_timeouts(TimeDelta::minutes(15), TimeDelta::zero());
        let last = session.last_access_time();

        assert!(session.validate_at(last + TimeDelta::minutes(15)).is_ok());

        let err = session
            .validate_at(last + TimeDelta::minutes(15) + TimeDelta::seconds(1))
            .unwrap_err();
        assert!(matches!(err, ValidationError::IdleExpired { .. }));
        assert!(err.is_expired());
    }

    #[test]
    fn test_absolute_expiry_independent_of_access() {
        let mut session = session_with_timeouts(TimeDelta::zero(), TimeDelta::minutes(60));
        let start = session.start_timestamp();
        session.set_last_access_time(start + TimeDelta::minutes(59));

        let err = session
            .validate_at(start + TimeDelta::minutes(61))
            .unwrap_err();
        assert!(matches!(err, ValidationError::AbsoluteExpired { .. }));
    }

    #[test]
    fn test_non_positive_timeouts_disable_checks() {
        let session = session_with_timeouts(TimeDelta::zero(), TimeDelta::minutes(-1));
        let far_future = session.start_timestamp() + TimeDelta::days(365);
        assert!(session.validate_at(far_future).is_ok());
    }

    #[test]
    fn test_stopped_checked_before_expiry() {
        let mut session = session_with_timeouts(TimeDelta::minutes(1), TimeDelta::minutes(1));
        session.stop().unwrap();

        let err = session
            .validate_at(session.start_timestamp() + TimeDelta::hours(2))
            .unwrap_err();
        assert!(matches!(err, ValidationError::Stopped { .. }));
        assert_eq!(err.session_id(), "sid-1");
    }

    #[test]
    fn test_stop_twice_keeps_first_timestamp() {
        let mut session = session_with_timeouts(TimeDelta::minutes(15), TimeDelta::minutes(60));
        session.stop().unwrap();
        let first = session.stop_timestamp();

        assert!(session.stop().is_err());
        assert_eq!(session.stop_timestamp(), first);
    }

    #[test]
    fn test_touch_updates_last_access() {
        let mut session = Session::new(None);
        let old = session.last_access_time() - TimeDelta::minutes(10);
        session.set_last_access_time(old);
        session.touch();
        assert!(session.last_access_time() > old);
    }

    #[test]
    fn test_set_attribute_none_removes() {
        let mut session = Session::new(None);
        session.set_attribute("k", Some(json!(1)));
        assert_eq!(session.get_attribute("k"), Some(&json!(1)));

        let previous = session.set_attribute("k", None);
        assert_eq!(previous, Some(json!(1)));
        assert!(session.get_attribute("k").is_none());

        // Removing an absent key is not an error
        assert!(session.set_attribute("missing", None).is_none());
    }

    #[test]
    fn test_attribute_namespaces_are_separate() {
        let mut session = Session::new(None);
        session.set_attribute("a", Some(json!("app")));
        session.set_internal_attribute(IDENTIFIERS_SESSION_KEY, Some(json!(["alice"])));

        assert_eq!(session.attribute_keys(), vec!["a".to_string()]);
        assert_eq!(
            session.internal_attribute_keys(),
            vec![IDENTIFIERS_SESSION_KEY.to_string()]
        );
        assert!(session.get_attribute(IDENTIFIERS_SESSION_KEY).is_none());
    }
}
