//! Single-session lifecycle policy: retrieval, validation dispatch and
//! store mutation.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{Error, Result, ValidationError};
use crate::events::{SessionEventHandler, SessionTuple};
use crate::key::SessionKey;
use crate::session::{IDENTIFIERS_SESSION_KEY, Session};
use crate::store::SessionStore;

/// Arguments of [`SessionHandler::on_expiration`].
///
/// Either the session alone (record the change only) or the session with
/// both the expiry cause and the key it was addressed by (record the change,
/// notify, then apply the delete policy).
#[derive(Debug)]
pub struct Expiration<'a> {
    session: &'a Session,
    cause: Option<(ValidationError, SessionKey)>,
}

impl<'a> Expiration<'a> {
    /// Expiration that only records the change.
    pub fn new(session: &'a Session) -> Self {
        Self {
            session,
            cause: None,
        }
    }

    /// Fully described expiration.
    pub fn with_cause(session: &'a Session, cause: ValidationError, key: SessionKey) -> Self {
        Self {
            session,
            cause: Some((cause, key)),
        }
    }

    /// Build from optional parts; the cause and key must be given together.
    pub fn from_parts(
        session: &'a Session,
        cause: Option<ValidationError>,
        key: Option<SessionKey>,
    ) -> Result<Self> {
        match (cause, key) {
            (None, None) => Ok(Self::new(session)),
            (Some(cause), Some(key)) => Ok(Self::with_cause(session, cause, key)),
            _ => Err(Error::IllegalArgument(
                "an expiration cause and session key must be supplied together".into(),
            )),
        }
    }

    pub fn session(&self) -> &Session {
        self.session
    }
}

/// Orchestrates retrieval, validation and mutation of individual sessions.
///
/// Errors propagate as they are; this layer never retries.
pub struct SessionHandler {
    store: Arc<dyn SessionStore>,
    event_handler: SessionEventHandler,
    auto_touch: bool,
    delete_invalid_sessions: bool,
}

impl SessionHandler {
    /// Create a handler that deletes invalid sessions and does not auto-touch.
    pub fn new(store: Arc<dyn SessionStore>, event_handler: SessionEventHandler) -> Self {
        Self {
            store,
            event_handler,
            auto_touch: false,
            delete_invalid_sessions: true,
        }
    }

    /// Touch sessions every time they are retrieved.
    pub fn with_auto_touch(mut self, auto_touch: bool) -> Self {
        self.auto_touch = auto_touch;
        self
    }

    /// Delete sessions from the store once they stop or expire.
    pub fn with_delete_invalid_sessions(mut self, delete: bool) -> Self {
        self.delete_invalid_sessions = delete;
        self
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn event_handler(&self) -> &SessionEventHandler {
        &self.event_handler
    }

    pub fn delete_invalid_sessions(&self) -> bool {
        self.delete_invalid_sessions
    }

    /// Persist a new session and return its assigned id.
    pub async fn create_session(&self, session: &mut Session) -> Result<String> {
        self.store.create(session).await
    }

    pub async fn delete(&self, session: &Session) -> Result<()> {
        self.store.delete(session).await
    }

    /// Read the session addressed by `key` without validating it.
    ///
    /// A key without an id, or an id the store does not know, resolves to
    /// `None`. Other store failures propagate.
    pub async fn retrieve_session(&self, key: &SessionKey) -> Result<Option<Session>> {
        let Some(session_id) = key.session_id() else {
            debug!("Unable to resolve session id from key, returning no session");
            return Ok(None);
        };

        match self.store.read(session_id).await {
            Ok(session) => Ok(Some(session)),
            Err(Error::UnknownSession(_)) => {
                debug!(session_id = %session_id, "Could not find session in store");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Retrieve and validate the session addressed by `key`.
    ///
    /// Invalid sessions are routed through the expiration or invalidation
    /// path before the validation error is returned.
    pub async fn do_get_session(&self, key: &SessionKey) -> Result<Option<Session>> {
        let Some(mut session) = self.retrieve_session(key).await? else {
            return Ok(None);
        };

        self.validate(&mut session, key).await?;

        if self.auto_touch {
            session.touch();
            self.on_change(&session).await?;
        }
        Ok(Some(session))
    }

    /// Validate `session`, running the failure side effects on error.
    ///
    /// Expiry yields [`Error::Expired`]; any other invalidity yields
    /// [`Error::Invalid`] wrapping the original cause.
    pub async fn validate(&self, session: &mut Session, key: &SessionKey) -> Result<()> {
        let cause = match session.validate() {
            Ok(()) => return Ok(()),
            Err(cause) => cause,
        };

        if cause.is_expired() {
            self.on_expiration(Expiration::with_cause(session, cause.clone(), key.clone()))
                .await?;
            Err(Error::Expired(cause))
        } else {
            self.on_invalidation(session, cause.clone(), key).await?;
            Err(Error::Invalid(cause))
        }
    }

    /// Record an expiry. With a cause, also notify and apply the delete policy.
    pub async fn on_expiration(&self, expiration: Expiration<'_>) -> Result<()> {
        let session = expiration.session;
        self.on_change(session).await?;

        if let Some((cause, key)) = expiration.cause {
            info!(session_id = %cause.session_id(), "Session has expired");
            self.event_handler
                .notify_expiration(self.session_tuple(session, key))
                .await?;
            self.after_expired(session).await?;
        }
        Ok(())
    }

    /// Handle a non-valid session: expiry kinds go to [`Self::on_expiration`],
    /// everything else is treated as a stop.
    pub async fn on_invalidation(
        &self,
        session: &mut Session,
        cause: ValidationError,
        key: &SessionKey,
    ) -> Result<()> {
        if cause.is_expired() {
            return self
                .on_expiration(Expiration::with_cause(session, cause, key.clone()))
                .await;
        }

        debug!(session_id = %cause.session_id(), "Session is no longer valid");
        self.on_stop(session).await?;
        self.event_handler
            .notify_stop(self.session_tuple(session, key.clone()))
            .await?;
        self.after_stopped(session).await
    }

    /// Pin the last access time to the stop time and write the session back.
    pub async fn on_stop(&self, session: &mut Session) -> Result<()> {
        if let Some(stopped) = session.stop_timestamp() {
            session.set_last_access_time(stopped);
        }
        self.on_change(session).await
    }

    pub async fn after_stopped(&self, session: &Session) -> Result<()> {
        if self.delete_invalid_sessions {
            self.delete(session).await?;
        }
        Ok(())
    }

    pub async fn after_expired(&self, session: &Session) -> Result<()> {
        if self.delete_invalid_sessions {
            self.delete(session).await?;
        }
        Ok(())
    }

    /// Write a changed session back to the store.
    pub async fn on_change(&self, session: &Session) -> Result<()> {
        self.store.update(session).await
    }

    /// Identity snapshot published with stop and expire events.
    pub fn session_tuple(&self, session: &Session, key: SessionKey) -> SessionTuple {
        SessionTuple {
            identifiers: session
                .get_internal_attribute(IDENTIFIERS_SESSION_KEY)
                .cloned(),
            session_key: key,
        }
    }
}
