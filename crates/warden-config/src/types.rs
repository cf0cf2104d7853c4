//! Configuration types.

use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use warden_session::{
    DEFAULT_ABSOLUTE_TIMEOUT, DEFAULT_CACHE_CAPACITY, DEFAULT_IDLE_TIMEOUT,
    DEFAULT_VALIDATION_CONCURRENCY, DEFAULT_VALIDATION_INTERVAL, SessionManagerConfig,
};

use crate::{ConfigError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Root Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration as read from one or more TOML files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    /// Session management configuration.
    pub session: Option<SessionSettings>,
}

impl WardenConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Merge another config on top of this one (other takes priority).
    pub fn merge(&mut self, other: WardenConfig) {
        if other.session.is_some() {
            self.session = other.session;
        }
    }

    /// Runtime session manager config, falling back to defaults when no
    /// `[session]` table was given.
    pub fn session_manager_config(&self) -> Result<SessionManagerConfig> {
        self.session
            .clone()
            .unwrap_or_default()
            .to_manager_config()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// The `[session]` table.
///
/// ```toml
/// [session]
/// idle_timeout_secs = 900
/// absolute_timeout_secs = 3600
/// validation_interval_secs = 3600
/// validation_scheduler_enabled = true
/// delete_invalid_sessions = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Idle timeout in seconds. Zero or negative disables the idle check.
    pub idle_timeout_secs: i64,
    /// Absolute timeout in seconds. Zero or negative disables the absolute check.
    pub absolute_timeout_secs: i64,
    /// Seconds between background validation sweeps.
    pub validation_interval_secs: u64,
    /// Whether the background validation scheduler runs.
    pub validation_scheduler_enabled: bool,
    /// Whether stopped or expired sessions are deleted.
    pub delete_invalid_sessions: bool,
    /// Whether a successful lookup also touches the session.
    pub auto_touch: bool,
    /// Sessions validated concurrently during a sweep.
    pub validation_concurrency: usize,
    /// Maximum number of sessions in the active-session cache.
    pub cache_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT.num_seconds(),
            absolute_timeout_secs: DEFAULT_ABSOLUTE_TIMEOUT.num_seconds(),
            validation_interval_secs: DEFAULT_VALIDATION_INTERVAL.as_secs(),
            validation_scheduler_enabled: true,
            delete_invalid_sessions: true,
            auto_touch: false,
            validation_concurrency: DEFAULT_VALIDATION_CONCURRENCY,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl SessionSettings {
    /// Validate and convert into the session manager's runtime config.
    pub fn to_manager_config(&self) -> Result<SessionManagerConfig> {
        if self.validation_interval_secs == 0 {
            return Err(invalid(
                "session.validation_interval_secs",
                "must be greater than zero",
            ));
        }
        if self.validation_concurrency == 0 {
            return Err(invalid(
                "session.validation_concurrency",
                "must be greater than zero",
            ));
        }
        if self.cache_capacity == 0 {
            return Err(invalid("session.cache_capacity", "must be greater than zero"));
        }
        let idle_timeout = TimeDelta::try_seconds(self.idle_timeout_secs)
            .ok_or_else(|| invalid("session.idle_timeout_secs", "out of range"))?;
        let absolute_timeout = TimeDelta::try_seconds(self.absolute_timeout_secs)
            .ok_or_else(|| invalid("session.absolute_timeout_secs", "out of range"))?;

        Ok(SessionManagerConfig::new()
            .with_idle_timeout(idle_timeout)
            .with_absolute_timeout(absolute_timeout)
            .with_validation_interval(Duration::from_secs(self.validation_interval_secs))
            .with_session_validation_scheduler_enabled(self.validation_scheduler_enabled)
            .with_delete_invalid_sessions(self.delete_invalid_sessions)
            .with_auto_touch(self.auto_touch)
            .with_validation_concurrency(self.validation_concurrency)
            .with_cache_capacity(self.cache_capacity))
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = WardenConfig::from_toml("").unwrap();
        assert!(config.session.is_none());

        let manager = config.session_manager_config().unwrap();
        assert_eq!(manager.idle_timeout, TimeDelta::minutes(15));
        assert_eq!(manager.absolute_timeout, TimeDelta::minutes(60));
        assert!(manager.delete_invalid_sessions);
        assert!(manager.session_validation_scheduler_enabled);
    }

    #[test]
    fn test_partial_session_table() {
        let config = WardenConfig::from_toml(
            r#"
[session]
idle_timeout_secs = 300
auto_touch = true
"#,
        )
        .unwrap();

        let session = config.session.as_ref().unwrap();
        assert_eq!(session.idle_timeout_secs, 300);
        assert_eq!(session.absolute_timeout_secs, 3600);

        let manager = config.session_manager_config().unwrap();
        assert_eq!(manager.idle_timeout, TimeDelta::minutes(5));
        assert!(manager.auto_touch);
        assert_eq!(manager.validation_interval, Duration::from_secs(3600));
    }

    #[test]
    fn test_negative_timeout_disables_check() {
        let settings = SessionSettings {
            idle_timeout_secs: -1,
            ..SessionSettings::default()
        };
        let manager = settings.to_manager_config().unwrap();
        assert!(manager.idle_timeout < TimeDelta::zero());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let settings = SessionSettings {
            validation_interval_secs: 0,
            ..SessionSettings::default()
        };
        let err = settings.to_manager_config().unwrap_err();
        assert!(
            matches!(err, ConfigError::Invalid { ref field, .. } if field == "session.validation_interval_secs")
        );
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let settings = SessionSettings {
            validation_concurrency: 0,
            ..SessionSettings::default()
        };
        assert!(settings.to_manager_config().is_err());
    }

    #[test]
    fn test_merge_overrides_session() {
        let mut base = WardenConfig::from_toml("[session]\nidle_timeout_secs = 60\n").unwrap();
        base.merge(WardenConfig::new());
        assert_eq!(base.session.as_ref().unwrap().idle_timeout_secs, 60);

        base.merge(WardenConfig::from_toml("[session]\nidle_timeout_secs = 120\n").unwrap());
        assert_eq!(base.session.as_ref().unwrap().idle_timeout_secs, 120);
    }

    #[test]
    fn test_unknown_type_is_parse_error() {
        let err = WardenConfig::from_toml("[session]\nidle_timeout_secs = \"soon\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
