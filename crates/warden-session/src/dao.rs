//! Backing session repositories.
//!
//! A [`SessionDao`] is the authoritative store behind the caching layer.
//! The free functions in this module carry the sanity checks every
//! implementation shares (id generation, id verification and assignment,
//! translating a missing record into [`Error::UnknownSession`]), so concrete
//! repositories call into them instead of inheriting them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::session::Session;

/// Produces unique, unpredictable session identifiers.
pub trait SessionIdGenerator: Send + Sync {
    fn generate_id(&self, session: &Session) -> String;
}

/// Random (UUID v4) session id generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSessionIdGenerator;

impl SessionIdGenerator for RandomSessionIdGenerator {
    fn generate_id(&self, _session: &Session) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Authoritative persistence for sessions.
#[async_trait]
pub trait SessionDao: Send + Sync {
    /// Persist a new session, assigning its id, and return that id.
    async fn create(&self, session: &mut Session) -> Result<String>;

    /// Read a session, failing with [`Error::UnknownSession`] if absent.
    async fn read_session(&self, session_id: &str) -> Result<Session>;

    /// Replace the stored copy of an existing session.
    async fn update(&self, session: &Session) -> Result<()>;

    /// Remove a session.
    async fn delete(&self, session: &Session) -> Result<()>;

    /// Point-in-time snapshot of every stored session.
    async fn get_active_sessions(&self) -> Result<Vec<Session>>;
}

/// Generate an id for `session`, failing if no generator is configured.
pub fn generate_session_id(
    generator: Option<&dyn SessionIdGenerator>,
    session: &Session,
) -> Result<String> {
    generator
        .map(|generator| generator.generate_id(session))
        .ok_or_else(|| {
            Error::IllegalState("session id generator has not been configured".into())
        })
}

/// Check the id produced by a repository's create step.
pub fn verify_session_id(session_id: &str) -> Result<()> {
    if session_id.is_empty() {
        return Err(Error::IllegalState(
            "session id returned from create is empty, verify the repository implementation"
                .into(),
        ));
    }
    Ok(())
}

/// Assign `session_id` to a session that does not have one yet.
pub fn assign_session_id(session: &mut Session, session_id: &str) -> Result<()> {
    if session_id.is_empty() {
        return Err(Error::IllegalArgument(
            "a session id must be supplied in order to assign it".into(),
        ));
    }
    if let Some(existing) = session.session_id() {
        return Err(Error::IllegalState(format!(
            "session already has id [{existing}], ids are assigned once"
        )));
    }
    session.set_session_id(session_id.to_string());
    Ok(())
}

/// Translate an optional lookup result into a session or [`Error::UnknownSession`].
pub fn require_session(session_id: &str, session: Option<Session>) -> Result<Session> {
    session.ok_or_else(|| Error::UnknownSession(session_id.to_string()))
}

fn stored_id(session: &Session, operation: &str) -> Result<String> {
    session
        .session_id()
        .map(str::to_string)
        .ok_or_else(|| Error::IllegalArgument(format!("cannot {operation} a session without an id")))
}

/// In-memory [`SessionDao`] backed by a hash map.
///
/// Holds every session in process memory and never pages to disk, so it
/// suits tests and single-node deployments with modest session counts.
pub struct MemorySessionDao {
    sessions: RwLock<HashMap<String, Session>>,
    id_generator: Option<Arc<dyn SessionIdGenerator>>,
}

impl Default for MemorySessionDao {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySessionDao {
    /// Create an empty repository using [`RandomSessionIdGenerator`].
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            id_generator: Some(Arc::new(RandomSessionIdGenerator)),
        }
    }

    /// Replace (or clear) the id generator.
    pub fn with_id_generator(mut self, generator: Option<Arc<dyn SessionIdGenerator>>) -> Self {
        self.id_generator = generator;
        self
    }

    /// Number of stored sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Store a session only if its id is not already taken.
    fn store_new(&self, session_id: &str, session: &Session) -> Result<()> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(session_id) {
            return Err(Error::IllegalState(format!(
                "session id [{session_id}] is already in use"
            )));
        }
        sessions.insert(session_id.to_string(), session.clone());
        Ok(())
    }
}

#[async_trait]
impl SessionDao for MemorySessionDao {
    async fn create(&self, session: &mut Session) -> Result<String> {
        let session_id = generate_session_id(self.id_generator.as_deref(), session)?;
        verify_session_id(&session_id)?;
        assign_session_id(session, &session_id)?;
        self.store_new(&session_id, session)?;
        debug!(session_id = %session_id, "Session created");
        Ok(session_id)
    }

    async fn read_session(&self, session_id: &str) -> Result<Session> {
        let session = self.sessions.read().get(session_id).cloned();
        require_session(session_id, session)
    }

    async fn update(&self, session: &Session) -> Result<()> {
        let session_id = stored_id(session, "update")?;
        let mut sessions = self.sessions.write();
        match sessions.get_mut(&session_id) {
            Some(stored) => {
                *stored = session.clone();
                trace!(session_id = %session_id, "Session updated");
                Ok(())
            }
            None => Err(Error::UnknownSession(session_id)),
        }
    }

    async fn delete(&self, session: &Session) -> Result<()> {
        let session_id = stored_id(session, "delete")?;
        if self.sessions.write().remove(&session_id).is_none() {
            debug!(session_id = %session_id, "Session to delete does not exist in memory");
        } else {
            debug!(session_id = %session_id, "Session deleted");
        }
        Ok(())
    }

    async fn get_active_sessions(&self) -> Result<Vec<Session>> {
        Ok(self.sessions.read().values().cloned().collect())
    }
}
