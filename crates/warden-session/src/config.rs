//! Configuration for the session manager.

use std::time::Duration;

use chrono::TimeDelta;

/// Default idle timeout applied to new sessions (15 minutes).
pub const DEFAULT_IDLE_TIMEOUT: TimeDelta = TimeDelta::minutes(15);

/// Default absolute timeout applied to new sessions (60 minutes).
pub const DEFAULT_ABSOLUTE_TIMEOUT: TimeDelta = TimeDelta::minutes(60);

/// Default interval between validation sweeps (1 hour).
pub const DEFAULT_VALIDATION_INTERVAL: Duration = Duration::from_secs(3600);

/// Default number of sessions validated concurrently during a sweep.
pub const DEFAULT_VALIDATION_CONCURRENCY: usize = 16;

/// Default capacity of the active-session cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// Configuration for [`DefaultNativeSessionManager`](crate::DefaultNativeSessionManager).
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    /// Idle timeout stamped on every new session. Zero or negative disables it.
    pub idle_timeout: TimeDelta,

    /// Absolute timeout stamped on every new session. Zero or negative disables it.
    pub absolute_timeout: TimeDelta,

    /// Interval between background validation sweeps.
    pub validation_interval: Duration,

    /// Whether the background validation scheduler should run at all.
    pub session_validation_scheduler_enabled: bool,

    /// Whether stopped or expired sessions are deleted from the store.
    pub delete_invalid_sessions: bool,

    /// Whether a successful lookup also touches the session.
    pub auto_touch: bool,

    /// Maximum number of sessions validated concurrently during a sweep.
    pub validation_concurrency: usize,

    /// Capacity of the default active-session cache.
    pub cache_capacity: usize,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            absolute_timeout: DEFAULT_ABSOLUTE_TIMEOUT,
            validation_interval: DEFAULT_VALIDATION_INTERVAL,
            session_validation_scheduler_enabled: true,
            delete_invalid_sessions: true,
            auto_touch: false,
            validation_concurrency: DEFAULT_VALIDATION_CONCURRENCY,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl SessionManagerConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the idle timeout for new sessions.
    pub fn with_idle_timeout(mut self, timeout: TimeDelta) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the absolute timeout for new sessions.
    pub fn with_absolute_timeout(mut self, timeout: TimeDelta) -> Self {
        self.absolute_timeout = timeout;
        self
    }

    /// Set the interval between validation sweeps.
    pub fn with_validation_interval(mut self, interval: Duration) -> Self {
        self.validation_interval = interval;
        self
    }

    /// Enable or disable the background validation scheduler.
    pub fn with_session_validation_scheduler_enabled(mut self, enabled: bool) -> Self {
        self.session_validation_scheduler_enabled = enabled;
        self
    }

    /// Enable or disable deletion of invalidated sessions.
    pub fn with_delete_invalid_sessions(mut self, enabled: bool) -> Self {
        self.delete_invalid_sessions = enabled;
        self
    }

    /// Enable or disable touching sessions on lookup.
    pub fn with_auto_touch(mut self, enabled: bool) -> Self {
        self.auto_touch = enabled;
        self
    }

    /// Set the sweep concurrency.
    pub fn with_validation_concurrency(mut self, concurrency: usize) -> Self {
        self.validation_concurrency = concurrency;
        self
    }

    /// Set the capacity of the default active-session cache.
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }
}
