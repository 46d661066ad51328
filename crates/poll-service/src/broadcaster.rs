//! Outbound delivery to connections.
//!
//! The namespace actor talks to connections only through [`Broadcaster`].
//! Delivery failure to one connection never aborts a fan-out to the others.

use crate::actors::{CloseReason, ConnectionActorHandle};
use crate::errors::PollError;
use crate::observability::metrics;
use crate::protocol::ServerEvent;
use async_trait::async_trait;
use common::types::ConnectionId;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Delivers events to individual connections.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Deliver one event to one connection.
    async fn send_to(&self, connection_id: ConnectionId, event: &ServerEvent)
        -> Result<(), PollError>;

    /// Force-close a connection after its queued events are flushed.
    async fn disconnect(&self, connection_id: ConnectionId, reason: CloseReason);

    /// Deliver one event to every recipient, in order.
    ///
    /// Returns the number of recipients reached. Failures are logged and
    /// counted per connection.
    async fn broadcast(&self, recipients: &[ConnectionId], event: &ServerEvent) -> usize {
        let mut delivered = 0;
        for &connection_id in recipients {
            match self.send_to(connection_id, event).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    metrics::record_broadcast_failure();
                    warn!(
                        target: "poll.transport",
                        connection_id = %connection_id,
                        event = event.name(),
                        error = %e,
                        "Broadcast delivery failed"
                    );
                }
            }
        }
        delivered
    }
}

/// Registry of live connection actors, used as the production broadcaster.
#[derive(Debug, Default)]
pub struct ConnectionHub {
    connections: RwLock<HashMap<ConnectionId, ConnectionActorHandle>>,
}

impl ConnectionHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, handle: ConnectionActorHandle) {
        self.connections
            .write()
            .await
            .insert(handle.connection_id(), handle);
    }

    pub async fn unregister(&self, connection_id: ConnectionId) -> Option<ConnectionActorHandle> {
        self.connections.write().await.remove(&connection_id)
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Close every registered connection.
    pub async fn close_all(&self, reason: CloseReason) {
        for handle in self.connections.read().await.values() {
            handle.close(reason);
        }
    }
}

#[async_trait]
impl Broadcaster for ConnectionHub {
    async fn send_to(
        &self,
        connection_id: ConnectionId,
        event: &ServerEvent,
    ) -> Result<(), PollError> {
        let connections = self.connections.read().await;
        let handle = connections
            .get(&connection_id)
            .ok_or_else(|| PollError::TransportFailure("connection not registered".to_string()))?;
        handle.send(event.clone())
    }

    async fn disconnect(&self, connection_id: ConnectionId, reason: CloseReason) {
        match self.connections.read().await.get(&connection_id) {
            Some(handle) => handle.close(reason),
            None => debug!(
                target: "poll.transport",
                connection_id = %connection_id,
                "Disconnect for unregistered connection"
            ),
        }
    }
}
