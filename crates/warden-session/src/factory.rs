//! Construction of new sessions.

use crate::session::Session;

/// Data describing the request that is starting a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    host: Option<String>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the originating host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }
}

/// Builds new, not yet persisted sessions.
pub trait SessionFactory: Send + Sync {
    fn create_session(&self, context: &SessionContext) -> Session;
}

/// Factory producing plain [`Session`]s stamped with the context host.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleSessionFactory;

impl SessionFactory for SimpleSessionFactory {
    fn create_session(&self, context: &SessionContext) -> Session {
        Session::new(context.host().map(str::to_string))
    }
}
