//! Session lookup keys.

use serde::{Deserialize, Serialize};

use crate::session::Session;

/// Token used to address a session without holding the session itself.
///
/// A key without a session id never resolves to a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    request_context: Option<String>,
}

impl SessionKey {
    /// Key addressing `session_id`.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            request_context: None,
        }
    }

    /// Key that carries no session id.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Key addressing the given session, if it has been assigned an id.
    pub fn for_session(session: &Session) -> Self {
        Self {
            session_id: session.session_id().map(str::to_string),
            request_context: None,
        }
    }

    /// Attach an opaque description of the originating request.
    pub fn with_request_context(mut self, context: impl Into<String>) -> Self {
        self.request_context = Some(context.into());
        self
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn request_context(&self) -> Option<&str> {
        self.request_context.as_deref()
    }
}

impl From<&str> for SessionKey {
    fn from(session_id: &str) -> Self {
        Self::new(session_id)
    }
}

impl From<String> for SessionKey {
    fn from(session_id: String) -> Self {
        Self::new(session_id)
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.session_id {
            Some(id) => write!(f, "{id}"),
            None => write!(f, "<no session id>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_key_has_no_id() {
        assert!(SessionKey::empty().session_id().is_none());
        assert!(SessionKey::for_session(&Session::new(None)).session_id().is_none());
    }

    #[test]
    fn test_request_context() {
        let key = SessionKey::new("sid").with_request_context("GET /login");
        assert_eq!(key.session_id(), Some("sid"));
        assert_eq!(key.request_context(), Some("GET /login"));
        assert_eq!(key.to_string(), "sid");
    }
}
