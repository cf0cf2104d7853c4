//! Session lifecycle events.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::key::SessionKey;
use crate::session::Session;

/// Event topics published by the session subsystem.
pub mod topics {
    pub const SESSION_START: &str = "SESSION.START";
    pub const SESSION_STOP: &str = "SESSION.STOP";
    pub const SESSION_EXPIRE: &str = "SESSION.EXPIRE";
}

/// Default capacity of each per-topic channel in [`InMemoryEventBus`].
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

const EVENT_SOURCE: &str = "SessionEventHandler";

/// Identity snapshot of a session that has ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionTuple {
    /// Identity bound to the session, if any.
    pub identifiers: Option<Value>,
    /// Key the session was addressed by.
    pub session_key: SessionKey,
}

/// Payload carried by a session event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPayload {
    /// Id of a newly started session.
    SessionId(String),
    /// Identity of a stopped or expired session.
    Session(SessionTuple),
}

/// A published event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub source: String,
    pub event_topic: String,
    pub results: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, event_topic: impl Into<String>, results: EventPayload) -> Self {
        Self {
            source: source.into(),
            event_topic: event_topic.into(),
            results,
        }
    }
}

/// Error raised by an [`EventBus`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    /// The bus no longer accepts events.
    #[error("event bus is closed")]
    Closed,
}

/// Publish/subscribe contract consumed by the session subsystem.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, topic: &str, event: Event) -> std::result::Result<(), EventBusError>;
}

/// In-process event bus with one broadcast channel per topic.
pub struct InMemoryEventBus {
    channels: RwLock<HashMap<String, broadcast::Sender<Event>>>,
    capacity: usize,
    closed: AtomicBool,
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a bus whose per-topic channels buffer `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Subscribe to every event published on `topic` from now on.
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<Event> {
        let mut channels = self.channels.write();
        channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Stop accepting events. Subsequent publishes fail with [`EventBusError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.channels.write().clear();
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, topic: &str, event: Event) -> std::result::Result<(), EventBusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EventBusError::Closed);
        }
        let sender = self.channels.read().get(topic).cloned();
        match sender {
            Some(sender) => {
                // A send error only means nobody is listening right now.
                let delivered = sender.send(event).unwrap_or(0);
                trace!(topic = %topic, delivered, "Event published");
            }
            None => trace!(topic = %topic, "Event published with no subscribers"),
        }
        Ok(())
    }
}

/// Publishes session start/stop/expire events to the configured bus.
#[derive(Clone, Default)]
pub struct SessionEventHandler {
    event_bus: Option<Arc<dyn EventBus>>,
}

impl SessionEventHandler {
    pub fn new(event_bus: Arc<dyn EventBus>) -> Self {
        Self {
            event_bus: Some(event_bus),
        }
    }

    /// Handler with no bus; every notification fails.
    pub fn without_event_bus() -> Self {
        Self { event_bus: None }
    }

    pub fn event_bus(&self) -> Option<&Arc<dyn EventBus>> {
        self.event_bus.as_ref()
    }

    /// Publish `SESSION.START` carrying the new session's id.
    pub async fn notify_start(&self, session: &Session) -> Result<()> {
        let session_id = session.session_id().ok_or_else(|| Error::EventPublish {
            topic: topics::SESSION_START.to_string(),
            reason: "session has no id".to_string(),
        })?;
        self.publish(
            topics::SESSION_START,
            EventPayload::SessionId(session_id.to_string()),
        )
        .await
    }

    /// Publish `SESSION.STOP` carrying the stopped session's identity.
    pub async fn notify_stop(&self, session: SessionTuple) -> Result<()> {
        self.publish(topics::SESSION_STOP, EventPayload::Session(session))
            .await
    }

    /// Publish `SESSION.EXPIRE` carrying the expired session's identity.
    pub async fn notify_expiration(&self, session: SessionTuple) -> Result<()> {
        self.publish(topics::SESSION_EXPIRE, EventPayload::Session(session))
            .await
    }

    async fn publish(&self, topic: &str, payload: EventPayload) -> Result<()> {
        let bus = self
            .event_bus
            .as_ref()
            .ok_or_else(|| Error::EventBusUnavailable {
                topic: topic.to_string(),
            })?;
        let event = Event::new(EVENT_SOURCE, topic, payload);
        bus.publish(topic, event)
            .await
            .map_err(|e| Error::EventPublish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;
        debug!(topic = %topic, "Session event published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tuple() -> SessionTuple {
        SessionTuple {
            identifiers: Some(json!("alice")),
            session_key: SessionKey::new("sessionkey123"),
        }
    }

    #[tokio::test]
    async fn test_notify_start_publishes() {
        let bus = Arc::new(InMemoryEventBus::new());
        let mut rx = bus.subscribe(topics::SESSION_START);
        let handler = SessionEventHandler::new(bus.clone());

        let mut session = Session::new(None);
        session.set_session_id("sid-1".to_string());
        handler.notify_start(&session).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            Event::new(
                "SessionEventHandler",
                "SESSION.START",
                EventPayload::SessionId("sid-1".to_string())
            )
        );
    }

    #[tokio::test]
    async fn test_notify_start_without_id_fails() {
        let handler = SessionEventHandler::new(Arc::new(InMemoryEventBus::new()));
        let result = handler.notify_start(&Session::new(None)).await;
        assert!(matches!(result, Err(Error::EventPublish { .. })));
    }

    #[tokio::test]
    async fn test_notify_stop_and_expiration_publish() {
        let bus = Arc::new(InMemoryEventBus::new());
        let mut stop_rx = bus.subscribe(topics::SESSION_STOP);
        let mut expire_rx = bus.subscribe(topics::SESSION_EXPIRE);
        let handler = SessionEventHandler::new(bus.clone());

        handler.notify_stop(tuple()).await.unwrap();
        handler.notify_expiration(tuple()).await.unwrap();

        let stop = stop_rx.recv().await.unwrap();
        assert_eq!(stop.event_topic, "SESSION.STOP");
        assert_eq!(stop.results, EventPayload::Session(tuple()));

        let expire = expire_rx.recv().await.unwrap();
        assert_eq!(expire.event_topic, "SESSION.EXPIRE");
    }

    #[tokio::test]
    async fn test_missing_bus_is_distinct_from_publish_failure() {
        let handler = SessionEventHandler::without_event_bus();
        assert!(matches!(
            handler.notify_stop(tuple()).await,
            Err(Error::EventBusUnavailable { .. })
        ));

        let bus = Arc::new(InMemoryEventBus::new());
        bus.close();
        let handler = SessionEventHandler::new(bus);
        assert!(matches!(
            handler.notify_expiration(tuple()).await,
            Err(Error::EventPublish { .. })
        ));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_succeeds() {
        let bus = InMemoryEventBus::new();
        let event = Event::new("test", "SESSION.STOP", EventPayload::Session(tuple()));
        assert!(bus.publish("SESSION.STOP", event).await.is_ok());
    }

    #[test]
    fn test_event_serializes() {
        let event = Event::new(
            "SessionEventHandler",
            "SESSION.EXPIRE",
            EventPayload::Session(tuple()),
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event_topic"], "SESSION.EXPIRE");
        assert_eq!(value["results"]["session"]["identifiers"], "alice");
        assert_eq!(
            value["results"]["session"]["session_key"]["session_id"],
            "sessionkey123"
        );
    }
}
