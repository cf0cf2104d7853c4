//! Error types for session management.

use chrono::{DateTime, TimeDelta, Utc};

/// Reason a session failed its own validity check.
///
/// This is the closed set of outcomes [`Session::validate`](crate::Session::validate)
/// can report. Callers dispatch on [`ValidationError::is_expired`] rather than
/// on the concrete variant when they only care about the expiry/stop split.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The session was idle for longer than its idle timeout.
    #[error(
        "session [{session_id}] expired: last accessed {last_access_time}, idle timeout {timeout}"
    )]
    IdleExpired {
        session_id: String,
        last_access_time: DateTime<Utc>,
        timeout: TimeDelta,
    },

    /// The session outlived its absolute timeout.
    #[error(
        "session [{session_id}] expired: started {start_timestamp}, absolute timeout {timeout}"
    )]
    AbsoluteExpired {
        session_id: String,
        start_timestamp: DateTime<Utc>,
        timeout: TimeDelta,
    },

    /// The session was explicitly stopped.
    #[error("session [{session_id}] was stopped at {stop_timestamp}")]
    Stopped {
        session_id: String,
        stop_timestamp: DateTime<Utc>,
    },
}

impl ValidationError {
    /// Whether this failure is one of the expiry kinds.
    pub fn is_expired(&self) -> bool {
        matches!(
            self,
            ValidationError::IdleExpired { .. } | ValidationError::AbsoluteExpired { .. }
        )
    }

    /// Identifier of the session that failed validation.
    pub fn session_id(&self) -> &str {
        match self {
            ValidationError::IdleExpired { session_id, .. }
            | ValidationError::AbsoluteExpired { session_id, .. }
            | ValidationError::Stopped { session_id, .. } => session_id,
        }
    }
}

/// Error type for session management operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No session exists for the requested id.
    #[error("There is no session with id [{0}]")]
    UnknownSession(String),

    /// The session exceeded its idle or absolute timeout.
    #[error("Session expired: {0}")]
    Expired(#[source] ValidationError),

    /// The session is invalid for a reason other than expiry (e.g. stopped).
    #[error("Session invalid: {0}")]
    Invalid(#[source] ValidationError),

    /// A required parameter was missing or malformed.
    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    /// A collaborator is missing or misconfigured.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// No event bus is configured, so the event could not be published.
    #[error("No event bus configured, cannot publish {topic}")]
    EventBusUnavailable { topic: String },

    /// The event could not be built or the event bus rejected it.
    #[error("Failed to publish {topic}: {reason}")]
    EventPublish { topic: String, reason: String },

    /// Error from a cache implementation.
    #[error("Cache error: {0}")]
    Cache(String),

    /// Error from a backing session store.
    #[error("Store error: {0}")]
    Store(String),
}

impl Error {
    /// Whether this error means "the addressed session is not usable".
    ///
    /// Covers unknown, expired and otherwise invalid sessions. Configuration,
    /// event and storage failures are not part of this family.
    pub fn is_invalid_session(&self) -> bool {
        matches!(
            self,
            Error::UnknownSession(_) | Error::Expired(_) | Error::Invalid(_)
        )
    }

    /// Whether this error came from event emission.
    pub fn is_event_error(&self) -> bool {
        matches!(
            self,
            Error::EventBusUnavailable { .. } | Error::EventPublish { .. }
        )
    }

    /// The validation cause, when this error wraps one.
    pub fn validation_cause(&self) -> Option<&ValidationError> {
        match self {
            Error::Expired(cause) | Error::Invalid(cause) => Some(cause),
            _ => None,
        }
    }
}

/// Result type for session management operations.
pub type Result<T> = std::result::Result<T, Error>;
