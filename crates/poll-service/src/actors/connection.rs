//! `ConnectionActor` - owns the outbound half of one WebSocket.
//!
//! Each `ConnectionActor`:
//! - Writes `ServerEvent`s to the socket in the order the namespace actor
//!   enqueued them
//! - Closes the socket with a close frame on kick or shutdown
//! - Closes a client that lets its outbound queue fill up (1013), so it
//!   never sees a broadcast stream with gaps; on reconnect it gets the
//!   late-join sync
//! - Cancels its token on exit so the inbound read loop stops too
//!
//! The sink is generic so tests can drive the actor without a socket.

use super::messages::{CloseReason, ConnectionMessage};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use crate::errors::PollError;
use crate::protocol::ServerEvent;

use axum::extract::ws::{close_code, CloseFrame, Message};
use common::types::{ConnectionId, Namespace};
use futures::{Sink, SinkExt};
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Outbound queue per connection. A client that falls this far behind
/// is disconnected.
const CONNECTION_CHANNEL_BUFFER: usize = 256;

/// Upper bound on writing the close frame to an unresponsive peer.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Handle to a `ConnectionActor`.
#[derive(Clone, Debug)]
pub struct ConnectionActorHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    cancel_token: CancellationToken,
    connection_id: ConnectionId,
    mailbox: Arc<MailboxMonitor>,
    lagged: Arc<AtomicBool>,
}

impl ConnectionActorHandle {
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Queue an event without waiting.
    ///
    /// A full queue closes the connection as a slow consumer: nothing queued
    /// after that point is delivered. Both cases report `TransportFailure`.
    pub fn send(&self, event: ServerEvent) -> Result<(), PollError> {
        if self.cancel_token.is_cancelled() {
            return Err(PollError::TransportFailure("connection closed".to_string()));
        }

        self.mailbox.record_enqueue();
        match self.sender.try_send(ConnectionMessage::Send { event }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.mailbox.record_send_failure();
                self.mailbox.record_drop();
                self.lagged.store(true, Ordering::Release);
                self.cancel_token.cancel();
                warn!(
                    target: "poll.actor.connection",
                    connection_id = %self.connection_id,
                    queued = CONNECTION_CHANNEL_BUFFER,
                    "Outbound queue full, closing slow consumer"
                );
                Err(PollError::TransportFailure(
                    "outbound queue full".to_string(),
                ))
            }
            Err(TrySendError::Closed(_)) => {
                self.mailbox.record_send_failure();
                Err(PollError::TransportFailure("connection closed".to_string()))
            }
        }
    }

    /// Ask the actor to close the socket after flushing queued events.
    ///
    /// Falls back to cancellation if the queue cannot take the request.
    pub fn close(&self, reason: CloseReason) {
        self.mailbox.record_enqueue();
        if self
            .sender
            .try_send(ConnectionMessage::Close { reason })
            .is_err()
        {
            self.mailbox.record_send_failure();
            self.cancel_token.cancel();
        }
    }

    /// Resolves once the actor has stopped writing.
    pub async fn closed(&self) {
        self.cancel_token.cancelled().await;
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `ConnectionActor` implementation.
pub struct ConnectionActor<S> {
    connection_id: ConnectionId,
    namespace: Namespace,
    sink: S,
    receiver: mpsc::Receiver<ConnectionMessage>,
    cancel_token: CancellationToken,
    metrics: Arc<ActorMetrics>,
    mailbox: Arc<MailboxMonitor>,
    lagged: Arc<AtomicBool>,
}

impl<S> ConnectionActor<S>
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display + Send,
{
    /// Spawn a connection actor writing to `sink`.
    pub fn spawn(
        connection_id: ConnectionId,
        namespace: Namespace,
        sink: S,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (ConnectionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);
        let mailbox = Arc::new(MailboxMonitor::new(
            ActorType::Connection,
            connection_id.to_string(),
        ));

        metrics.connection_opened();
        let lagged = Arc::new(AtomicBool::new(false));

        let actor = Self {
            connection_id,
            namespace,
            sink,
            receiver,
            cancel_token: cancel_token.clone(),
            metrics,
            mailbox: Arc::clone(&mailbox),
            lagged: Arc::clone(&lagged),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionActorHandle {
            sender,
            cancel_token,
            connection_id,
            mailbox,
            lagged,
        };

        (handle, task_handle)
    }

    #[instrument(
        skip_all,
        name = "poll.actor.connection",
        fields(connection_id = %self.connection_id, namespace = %self.namespace)
    )]
    async fn run(mut self) {
        debug!(
            target: "poll.actor.connection",
            connection_id = %self.connection_id,
            "ConnectionActor started"
        );

        loop {
            tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => {
                    let reason = self.cancel_reason();
                    self.write_close(reason).await;
                    break;
                }

                msg = self.receiver.recv() => {
                    let Some(message) = msg else {
                        break;
                    };
                    self.mailbox.record_dequeue();
                    if !self.handle_message(message).await {
                        break;
                    }
                }
            }
        }

        // Stops the inbound read loop as well.
        self.cancel_token.cancel();
        self.metrics.connection_closed();

        info!(
            target: "poll.actor.connection",
            connection_id = %self.connection_id,
            namespace = %self.namespace,
            messages_processed = self.mailbox.messages_processed(),
            "ConnectionActor stopped"
        );
    }

    /// Returns false when the actor should stop.
    async fn handle_message(&mut self, message: ConnectionMessage) -> bool {
        match message {
            ConnectionMessage::Send { event } => {
                let text = match event.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(
                            target: "poll.actor.connection",
                            connection_id = %self.connection_id,
                            event = event.name(),
                            error = %e,
                            "Dropping unencodable event"
                        );
                        return true;
                    }
                };

                // A peer that stops reading must not pin the actor here.
                let written = tokio::select! {
                    result = self.sink.send(Message::Text(text)) => Some(result),
                    () = self.cancel_token.cancelled() => None,
                };

                match written {
                    Some(Ok(())) => true,
                    Some(Err(e)) => {
                        warn!(
                            target: "poll.actor.connection",
                            connection_id = %self.connection_id,
                            error = %e,
                            "Socket write failed, closing connection"
                        );
                        false
                    }
                    None => {
                        let reason = self.cancel_reason();
                        self.write_close(reason).await;
                        false
                    }
                }
            }

            ConnectionMessage::Close { reason } => {
                self.write_close(reason).await;
                false
            }
        }
    }

    fn cancel_reason(&self) -> CloseReason {
        if self.lagged.load(Ordering::Acquire) {
            CloseReason::SlowConsumer
        } else {
            CloseReason::ShuttingDown
        }
    }

    async fn write_close(&mut self, reason: CloseReason) {
        let code = match reason {
            CloseReason::Kicked => close_code::POLICY,
            CloseReason::ShuttingDown => close_code::AWAY,
            CloseReason::CapacityExceeded | CloseReason::SlowConsumer => close_code::AGAIN,
        };

        debug!(
            target: "poll.actor.connection",
            connection_id = %self.connection_id,
            reason = reason.as_str(),
            "Closing connection"
        );

        let frame = CloseFrame {
            code,
            reason: reason.as_str().into(),
        };
        // The peer may already be gone or no longer reading.
        let sink = &mut self.sink;
        let closed = tokio::time::timeout(CLOSE_TIMEOUT, async move {
            let _ = sink.send(Message::Close(Some(frame))).await;
            let _ = sink.close().await;
        })
        .await;
        if closed.is_err() {
            debug!(
                target: "poll.actor.connection",
                connection_id = %self.connection_id,
                "Close frame not flushed in time"
            );
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use futures::channel::mpsc as fmpsc;
    use futures::StreamExt;
    use std::time::Duration;

    fn spawn_test_actor() -> (
        ConnectionActorHandle,
        JoinHandle<()>,
        fmpsc::UnboundedReceiver<Message>,
    ) {
        let (sink, stream) = fmpsc::unbounded();
        let (handle, task) = ConnectionActor::spawn(
            ConnectionId::new(),
            Namespace::from("presenter1000"),
            sink,
            CancellationToken::new(),
            ActorMetrics::new(),
        );
        (handle, task, stream)
    }

    async fn next_text(stream: &mut fmpsc::UnboundedReceiver<Message>) -> serde_json::Value {
        match stream.next().await {
            Some(Message::Text(text)) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_events_written_in_order() {
        let (handle, _task, mut stream) = spawn_test_actor();

        handle
            .send(ServerEvent::ParticipantsUpdate(vec!["Ann".to_string()]))
            .unwrap();
        handle
            .send(ServerEvent::ParticipantsUpdate(vec![
                "Ann".to_string(),
                "Ben".to_string(),
            ]))
            .unwrap();

        let first = next_text(&mut stream).await;
        let second = next_text(&mut stream).await;
        assert_eq!(first["data"], serde_json::json!(["Ann"]));
        assert_eq!(second["data"], serde_json::json!(["Ann", "Ben"]));
    }

    #[tokio::test]
    async fn test_close_flushes_then_sends_close_frame() {
        let (handle, task, mut stream) = spawn_test_actor();

        handle.send(ServerEvent::kicked_out()).unwrap();
        handle.close(CloseReason::Kicked);

        let notice = next_text(&mut stream).await;
        assert_eq!(notice["event"], "kickedOut");

        match stream.next().await {
            Some(Message::Close(Some(frame))) => {
                assert_eq!(frame.code, close_code::POLICY);
                assert_eq!(frame.reason, "kicked");
            }
            other => panic!("expected close frame, got {other:?}"),
        }

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("actor should stop")
            .unwrap();
        assert!(handle.is_cancelled());
        assert!(handle.send(ServerEvent::kicked_out()).is_err());
    }

    #[tokio::test]
    async fn test_cancellation_closes_socket() {
        let (handle, task, mut stream) = spawn_test_actor();

        handle.cancel();

        match stream.next().await {
            Some(Message::Close(Some(frame))) => assert_eq!(frame.code, close_code::AWAY),
            other => panic!("expected close frame, got {other:?}"),
        }
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_full_queue_closes_slow_consumer() {
        // Rendezvous sink that nobody reads until the queue has overflowed.
        let (sink, mut stream) = fmpsc::channel::<Message>(0);
        let (handle, task) = ConnectionActor::spawn(
            ConnectionId::new(),
            Namespace::from("presenter1000"),
            sink,
            CancellationToken::new(),
            ActorMetrics::new(),
        );

        let mut first_failed = None;
        for i in 0..400_usize {
            let event = ServerEvent::ParticipantsUpdate(vec![i.to_string()]);
            if handle.send(event).is_err() && first_failed.is_none() {
                first_failed = Some(i);
            }
        }
        let first_failed = first_failed.expect("queue should overflow");
        assert!(handle.is_cancelled());

        // Nothing is accepted after the overflow, even once there is room.
        let late = ServerEvent::ParticipantsUpdate(vec!["999".to_string()]);
        assert!(handle.send(late).is_err());

        let mut delivered = Vec::new();
        let close = loop {
            match tokio::time::timeout(Duration::from_secs(5), stream.next())
                .await
                .expect("stream should end")
            {
                Some(Message::Text(text)) => {
                    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                    delivered.push(value["data"][0].as_str().unwrap().to_string());
                }
                Some(Message::Close(frame)) => break frame,
                Some(other) => panic!("unexpected frame {other:?}"),
                None => panic!("socket ended without a close frame"),
            }
        };

        // What did arrive is a gap-free prefix of what was sent.
        assert!(delivered.len() < first_failed);
        for (i, data) in delivered.iter().enumerate() {
            assert_eq!(*data, i.to_string());
        }
        let frame = close.expect("close frame carries a code");
        assert_eq!(frame.code, close_code::AGAIN);
        assert_eq!(frame.reason, "slow_consumer");

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("actor should stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_write_failure_stops_actor() {
        let (handle, task, stream) = spawn_test_actor();
        drop(stream);

        let _ = handle.send(ServerEvent::kicked_out());

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("actor should stop")
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle.closed())
            .await
            .expect("closed() should resolve");
    }
}
