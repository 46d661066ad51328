//! Broadcaster that records deliveries instead of writing to sockets.
//!
//! # Example
//!
//! ```rust,ignore
//! let broadcaster = Arc::new(RecordingBroadcaster::new());
//! let (ns, _task) = NamespaceActor::spawn(ns_id, settings, broadcaster.clone(), persistence, token);
//! // ... drive the actor ...
//! assert_eq!(broadcaster.event_names_for(conn), vec!["participantsUpdate"]);
//! ```

use async_trait::async_trait;
use common::types::ConnectionId;
use poll_service::actors::CloseReason;
use poll_service::broadcaster::Broadcaster;
use poll_service::errors::PollError;
use poll_service::protocol::ServerEvent;
use std::collections::HashSet;
use std::sync::Mutex;

/// Captures every event and close request, in delivery order.
#[derive(Debug, Default)]
pub struct RecordingBroadcaster {
    sent: Mutex<Vec<(ConnectionId, ServerEvent)>>,
    closed: Mutex<Vec<(ConnectionId, CloseReason)>>,
    unreachable: Mutex<HashSet<ConnectionId>>,
}

impl RecordingBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make deliveries to `connection_id` fail with `TransportFailure`.
    pub fn make_unreachable(&self, connection_id: ConnectionId) {
        self.unreachable.lock().unwrap().insert(connection_id);
    }

    /// Events delivered to one connection.
    pub fn events_for(&self, connection_id: ConnectionId) -> Vec<ServerEvent> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| *c == connection_id)
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Wire names of events delivered to one connection.
    pub fn event_names_for(&self, connection_id: ConnectionId) -> Vec<&'static str> {
        self.events_for(connection_id)
            .iter()
            .map(ServerEvent::name)
            .collect()
    }

    /// Every delivery, in order.
    pub fn all_sent(&self) -> Vec<(ConnectionId, ServerEvent)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn closed(&self) -> Vec<(ConnectionId, CloseReason)> {
        self.closed.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
        self.closed.lock().unwrap().clear();
    }
}

#[async_trait]
impl Broadcaster for RecordingBroadcaster {
    async fn send_to(
        &self,
        connection_id: ConnectionId,
        event: &ServerEvent,
    ) -> Result<(), PollError> {
        if self.unreachable.lock().unwrap().contains(&connection_id) {
            return Err(PollError::TransportFailure(
                "connection unreachable".to_string(),
            ));
        }
        self.sent
            .lock()
            .unwrap()
            .push((connection_id, event.clone()));
        Ok(())
    }

    async fn disconnect(&self, connection_id: ConnectionId, reason: CloseReason) {
        self.closed.lock().unwrap().push((connection_id, reason));
    }
}
