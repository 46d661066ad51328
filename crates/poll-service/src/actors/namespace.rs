//! `NamespaceActor` - owns all session state of one presenter namespace.
//!
//! Each `NamespaceActor`:
//! - Owns the `ParticipantRegistry`, the `PollSessionState` (and through it
//!   the `VoteAggregator`) and the ordered list of live connections
//! - Processes its mailbox strictly in arrival order, so the three state
//!   components change together as one unit
//! - Fans out every state change to all live connections through the
//!   `Broadcaster` before taking the next message
//!
//! Rejections (invalid poll, duplicate vote, unknown option, no active poll)
//! are answered with an `error` event to the requester only and leave state
//! untouched. Persistence failures are logged and never roll back state.

use super::messages::{CloseReason, EventOutcome, NamespaceMessage, NamespaceSnapshot};
use super::metrics::{ActorType, MailboxMonitor};
use crate::broadcaster::Broadcaster;
use crate::errors::PollError;
use crate::models::PollSpec;
use crate::observability::metrics;
use crate::persistence::PersistenceClient;
use crate::protocol::{InboundEvent, ServerEvent};
use crate::session::{ParticipantRegistry, PollSessionState, VoteOutcome};

use common::types::{ConnectionId, Namespace, PollId};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

const NAMESPACE_CHANNEL_BUFFER: usize = 500;

/// Per-namespace limits and defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespaceSettings {
    pub default_timer_seconds: u32,
    pub max_connections: usize,
}

/// Handle to a `NamespaceActor`.
#[derive(Clone, Debug)]
pub struct NamespaceActorHandle {
    sender: mpsc::Sender<NamespaceMessage>,
    cancel_token: CancellationToken,
    namespace: Namespace,
    mailbox: Arc<MailboxMonitor>,
}

impl NamespaceActorHandle {
    #[must_use]
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Admit a connection. It must already be reachable through the
    /// broadcaster so it can receive the late-join sync.
    pub async fn connect(&self, connection_id: ConnectionId) -> Result<(), PollError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(NamespaceMessage::Connect {
            connection_id,
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| PollError::Internal(format!("response receive failed: {e}")))?
    }

    /// Apply one inbound event and wait for the outcome.
    pub async fn dispatch(
        &self,
        connection_id: ConnectionId,
        event: InboundEvent,
    ) -> Result<EventOutcome, PollError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(NamespaceMessage::Event {
            connection_id,
            event,
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| PollError::Internal(format!("response receive failed: {e}")))?
    }

    /// Report that a connection closed.
    pub async fn disconnect(&self, connection_id: ConnectionId) -> Result<(), PollError> {
        self.enqueue(NamespaceMessage::Disconnect { connection_id })
            .await
    }

    pub async fn snapshot(&self) -> Result<NamespaceSnapshot, PollError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(NamespaceMessage::GetSnapshot { respond_to: tx })
            .await?;

        rx.await
            .map_err(|e| PollError::Internal(format!("response receive failed: {e}")))
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn enqueue(&self, message: NamespaceMessage) -> Result<(), PollError> {
        self.mailbox.record_enqueue();
        self.sender.send(message).await.map_err(|e| {
            self.mailbox.record_send_failure();
            PollError::Internal(format!("channel send failed: {e}"))
        })
    }
}

/// The `NamespaceActor` implementation.
pub struct NamespaceActor {
    namespace: Namespace,
    receiver: mpsc::Receiver<NamespaceMessage>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
    settings: NamespaceSettings,
    broadcaster: Arc<dyn Broadcaster>,
    persistence: PersistenceClient,
    registry: ParticipantRegistry,
    poll_state: PollSessionState,
    /// Live connections in connect order; the broadcast audience.
    connections: Vec<ConnectionId>,
}

impl NamespaceActor {
    /// Spawn a namespace actor.
    pub fn spawn(
        namespace: Namespace,
        settings: NamespaceSettings,
        broadcaster: Arc<dyn Broadcaster>,
        persistence: PersistenceClient,
        cancel_token: CancellationToken,
    ) -> (NamespaceActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(NAMESPACE_CHANNEL_BUFFER);
        let mailbox = Arc::new(MailboxMonitor::new(
            ActorType::Namespace,
            namespace.as_str(),
        ));

        let actor = Self {
            namespace: namespace.clone(),
            receiver,
            cancel_token: cancel_token.clone(),
            mailbox: Arc::clone(&mailbox),
            settings,
            broadcaster,
            persistence,
            registry: ParticipantRegistry::new(),
            poll_state: PollSessionState::new(namespace.clone(), settings.default_timer_seconds),
            connections: Vec::new(),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = NamespaceActorHandle {
            sender,
            cancel_token,
            namespace,
            mailbox,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "poll.actor.namespace", fields(namespace = %self.namespace))]
    async fn run(mut self) {
        info!(
            target: "poll.actor.namespace",
            namespace = %self.namespace,
            "NamespaceActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    self.graceful_shutdown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    let Some(message) = msg else {
                        break;
                    };
                    self.mailbox.record_dequeue();
                    self.handle_message(message).await;
                }
            }
        }

        info!(
            target: "poll.actor.namespace",
            namespace = %self.namespace,
            participants = self.registry.len(),
            messages_processed = self.mailbox.messages_processed(),
            "NamespaceActor stopped"
        );
    }

    async fn handle_message(&mut self, message: NamespaceMessage) {
        match message {
            NamespaceMessage::Connect {
                connection_id,
                respond_to,
            } => {
                let result = self.handle_connect(connection_id).await;
                let _ = respond_to.send(result);
            }

            NamespaceMessage::Event {
                connection_id,
                event,
                respond_to,
            } => {
                let event_name = event.name();
                let result = self.handle_event(connection_id, event).await;
                if let Err(e) = &result {
                    self.report_error(connection_id, event_name, e).await;
                }
                let _ = respond_to.send(result);
            }

            NamespaceMessage::Disconnect { connection_id } => {
                self.handle_disconnect(connection_id).await;
            }

            NamespaceMessage::GetSnapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
        }
    }

    async fn handle_connect(&mut self, connection_id: ConnectionId) -> Result<(), PollError> {
        if self.connections.contains(&connection_id) {
            return Ok(());
        }
        if self.connections.len() >= self.settings.max_connections {
            warn!(
                target: "poll.actor.namespace",
                namespace = %self.namespace,
                limit = self.settings.max_connections,
                "Connection refused, namespace at capacity"
            );
            return Err(PollError::CapacityExceeded(self.namespace.to_string()));
        }

        self.connections.push(connection_id);

        debug!(
            target: "poll.actor.namespace",
            namespace = %self.namespace,
            connection_id = %connection_id,
            connections = self.connections.len(),
            "Connection admitted"
        );

        // Late joiners see the current poll, tally and roster.
        let mut sync = Vec::with_capacity(3);
        if let Some(poll) = self.poll_state.active_poll() {
            sync.push(ServerEvent::PollCreated(poll.clone()));
        }
        if let Some(tally) = self.poll_state.current_tally() {
            sync.push(ServerEvent::PollResults(tally));
        }
        if !self.registry.is_empty() {
            sync.push(ServerEvent::ParticipantsUpdate(self.registry.snapshot()));
        }
        for event in &sync {
            if let Err(e) = self.broadcaster.send_to(connection_id, event).await {
                warn!(
                    target: "poll.actor.namespace",
                    connection_id = %connection_id,
                    error = %e,
                    "Late-join sync failed"
                );
                break;
            }
        }

        Ok(())
    }

    async fn handle_event(
        &mut self,
        connection_id: ConnectionId,
        event: InboundEvent,
    ) -> Result<EventOutcome, PollError> {
        if !self.connections.contains(&connection_id) {
            return Err(PollError::NotFound("Connection".to_string()));
        }

        match event {
            InboundEvent::JoinRoster { display_name } => {
                let roster = self.registry.join(connection_id, display_name);
                self.broadcast(&ServerEvent::ParticipantsUpdate(roster.clone()))
                    .await;
                Ok(EventOutcome::RosterUpdated(roster))
            }
            InboundEvent::CreatePoll(spec) => self.handle_create_poll(spec).await,
            InboundEvent::SubmitVote {
                option_text,
                poll_id,
            } => {
                self.handle_vote(connection_id, &option_text, poll_id)
                    .await
            }
            InboundEvent::Kick { display_name } => Ok(self.handle_kick(&display_name).await),
            InboundEvent::ChatMessage(payload) => Ok(self.handle_chat(payload).await),
            InboundEvent::StudentLogin { name } => {
                self.broadcaster
                    .send_to(connection_id, &ServerEvent::login_success(name))
                    .await?;
                Ok(EventOutcome::LoginAcknowledged)
            }
        }
    }

    async fn handle_create_poll(&mut self, spec: PollSpec) -> Result<EventOutcome, PollError> {
        let poll = self
            .poll_state
            .create_poll(spec, &self.persistence)
            .await?;

        info!(
            target: "poll.actor.namespace",
            namespace = %self.namespace,
            poll_id = %poll.id,
            options = poll.options.len(),
            "Poll opened"
        );

        self.broadcast(&ServerEvent::PollCreated(poll.clone()))
            .await;
        Ok(EventOutcome::PollCreated(poll))
    }

    async fn handle_vote(
        &mut self,
        connection_id: ConnectionId,
        option_text: &str,
        poll_id: Option<PollId>,
    ) -> Result<EventOutcome, PollError> {
        let outcome = self
            .poll_state
            .record_vote(connection_id, option_text, poll_id, &self.persistence)
            .await?;

        match outcome {
            VoteOutcome::Accepted(tally) => {
                self.broadcast(&ServerEvent::PollResults(tally.clone()))
                    .await;
                Ok(EventOutcome::VoteAccepted(tally))
            }
            rejected => Err(rejected
                .rejection(option_text)
                .unwrap_or_else(|| PollError::Internal("unexpected vote outcome".to_string()))),
        }
    }

    /// Remove the first participant with `display_name`, notify and close
    /// its connection, then broadcast the roster to everyone left.
    async fn handle_kick(&mut self, display_name: &str) -> EventOutcome {
        let (removed, roster) = self.registry.kick(display_name);

        if let Some(target) = removed {
            if let Err(e) = self
                .broadcaster
                .send_to(target, &ServerEvent::kicked_out())
                .await
            {
                debug!(
                    target: "poll.actor.namespace",
                    connection_id = %target,
                    error = %e,
                    "Kick notice not delivered"
                );
            }
            self.broadcaster
                .disconnect(target, CloseReason::Kicked)
                .await;
            self.connections.retain(|c| *c != target);
            metrics::record_kick();

            info!(
                target: "poll.actor.namespace",
                namespace = %self.namespace,
                connection_id = %target,
                "Participant kicked"
            );
        }

        self.broadcast(&ServerEvent::ParticipantsUpdate(roster.clone()))
            .await;
        EventOutcome::Kicked { removed, roster }
    }

    async fn handle_chat(&mut self, payload: Value) -> EventOutcome {
        self.broadcast(&ServerEvent::ChatMessage(payload)).await;
        EventOutcome::Relayed
    }

    /// Drop a live connection and broadcast the roster, changed or not.
    /// Connections that are already gone (kicked, refused) are ignored.
    async fn handle_disconnect(&mut self, connection_id: ConnectionId) {
        let before = self.connections.len();
        self.connections.retain(|c| *c != connection_id);
        if self.connections.len() == before {
            return;
        }

        let roster = self.registry.remove(connection_id);
        debug!(
            target: "poll.actor.namespace",
            namespace = %self.namespace,
            connection_id = %connection_id,
            participants = roster.len(),
            "Participant left"
        );
        self.broadcast(&ServerEvent::ParticipantsUpdate(roster))
            .await;
    }

    async fn report_error(&self, connection_id: ConnectionId, event_name: &str, error: &PollError) {
        if error.is_rejection() {
            debug!(
                target: "poll.actor.namespace",
                namespace = %self.namespace,
                connection_id = %connection_id,
                event = event_name,
                code = error.error_code(),
                "Event rejected"
            );
        } else {
            warn!(
                target: "poll.actor.namespace",
                namespace = %self.namespace,
                connection_id = %connection_id,
                event = event_name,
                error = %error,
                "Event failed"
            );
        }

        let _ = self
            .broadcaster
            .send_to(connection_id, &ServerEvent::from_error(error))
            .await;
    }

    async fn broadcast(&self, event: &ServerEvent) {
        self.broadcaster.broadcast(&self.connections, event).await;
    }

    fn snapshot(&self) -> NamespaceSnapshot {
        NamespaceSnapshot {
            namespace: self.namespace.clone(),
            roster: self.registry.snapshot(),
            active_poll: self.poll_state.active_poll().cloned(),
            tally: self.poll_state.current_tally(),
            connection_count: self.connections.len(),
        }
    }

    async fn graceful_shutdown(&mut self) {
        info!(
            target: "poll.actor.namespace",
            namespace = %self.namespace,
            connections = self.connections.len(),
            "Closing namespace connections"
        );

        for connection_id in self.connections.drain(..) {
            self.broadcaster
                .disconnect(connection_id, CloseReason::ShuttingDown)
                .await;
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
    use crate::models::{OptionSpec, Tally};
    use crate::persistence::InMemoryPollStore;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(ConnectionId, ServerEvent)>>,
        closed: Mutex<Vec<(ConnectionId, CloseReason)>>,
    }

    impl Recorder {
        fn events_for(&self, connection_id: ConnectionId) -> Vec<ServerEvent> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(c, _)| *c == connection_id)
                .map(|(_, e)| e.clone())
                .collect()
        }

        fn clear(&self) {
            self.sent.lock().unwrap().clear();
        }
    }

    #[async_trait]
    impl Broadcaster for Recorder {
        async fn send_to(
            &self,
            connection_id: ConnectionId,
            event: &ServerEvent,
        ) -> Result<(), PollError> {
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

    fn spawn_namespace(max_connections: usize) -> (NamespaceActorHandle, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let persistence =
            PersistenceClient::new(Arc::new(InMemoryPollStore::new()), Duration::from_secs(1));
        let (handle, _task) = NamespaceActor::spawn(
            Namespace::from("presenter1000"),
            NamespaceSettings {
                default_timer_seconds: 60,
                max_connections,
            },
            recorder.clone(),
            persistence,
            CancellationToken::new(),
        );
        (handle, recorder)
    }

    fn color_poll() -> InboundEvent {
        InboundEvent::CreatePoll(PollSpec {
            question_text: "Color?".to_string(),
            options: vec![OptionSpec::new("Red"), OptionSpec::new("Blue")],
            timer_seconds: None,
        })
    }

    fn join(name: &str) -> InboundEvent {
        InboundEvent::JoinRoster {
            display_name: name.to_string(),
        }
    }

    fn vote(option: &str) -> InboundEvent {
        InboundEvent::SubmitVote {
            option_text: option.to_string(),
            poll_id: None,
        }
    }

    async fn connected(handle: &NamespaceActorHandle) -> ConnectionId {
        let id = ConnectionId::new();
        handle.connect(id).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_join_broadcasts_roster_to_all() {
        let (ns, recorder) = spawn_namespace(10);
        let a = connected(&ns).await;
        let b = connected(&ns).await;

        ns.dispatch(a, join("Ann")).await.unwrap();
        let outcome = ns.dispatch(b, join("Ben")).await.unwrap();

        assert_eq!(
            outcome,
            EventOutcome::RosterUpdated(vec!["Ann".to_string(), "Ben".to_string()])
        );
        let roster_for_a = recorder.events_for(a);
        assert_eq!(
            roster_for_a.last(),
            Some(&ServerEvent::ParticipantsUpdate(vec![
                "Ann".to_string(),
                "Ben".to_string()
            ]))
        );
    }

    #[tokio::test]
    async fn test_rejection_goes_to_requester_only() {
        let (ns, recorder) = spawn_namespace(10);
        let a = connected(&ns).await;
        let b = connected(&ns).await;

        let result = ns.dispatch(a, vote("Red")).await;

        assert!(matches!(result, Err(PollError::NoActivePoll)));
        assert!(matches!(
            recorder.events_for(a).as_slice(),
            [ServerEvent::Error { code, .. }] if code == "NO_ACTIVE_POLL"
        ));
        assert!(recorder.events_for(b).is_empty());
    }

    #[tokio::test]
    async fn test_vote_flow() {
        let (ns, recorder) = spawn_namespace(10);
        let a = connected(&ns).await;
        let b = connected(&ns).await;
        ns.dispatch(a, color_poll()).await.unwrap();
        recorder.clear();

        let outcome = ns.dispatch(a, vote("Red")).await.unwrap();
        let expected = Tally::new(vec![("Red".to_string(), 1), ("Blue".to_string(), 0)]);
        assert_eq!(outcome, EventOutcome::VoteAccepted(expected.clone()));
        assert_eq!(
            recorder.events_for(b),
            vec![ServerEvent::PollResults(expected.clone())]
        );

        assert!(matches!(
            ns.dispatch(a, vote("Blue")).await,
            Err(PollError::RejectedDuplicate)
        ));
        assert!(matches!(
            ns.dispatch(b, vote("Purple")).await,
            Err(PollError::RejectedUnknownOption(_))
        ));

        let snapshot = ns.snapshot().await.unwrap();
        assert_eq!(snapshot.tally, Some(expected));
        // Rejections were never broadcast to b.
        assert_eq!(recorder.events_for(b).len(), 2);
    }

    #[tokio::test]
    async fn test_kick_removes_first_match_and_disconnects() {
        let (ns, recorder) = spawn_namespace(10);
        let first = connected(&ns).await;
        let second = connected(&ns).await;
        let presenter = connected(&ns).await;
        ns.dispatch(first, join("alice")).await.unwrap();
        ns.dispatch(second, join("alice")).await.unwrap();
        recorder.clear();

        let outcome = ns
            .dispatch(
                presenter,
                InboundEvent::Kick {
                    display_name: "alice".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(
            outcome,
            EventOutcome::Kicked {
                removed: Some(first),
                roster: vec!["alice".to_string()],
            }
        );
        assert_eq!(recorder.events_for(first), vec![ServerEvent::kicked_out()]);
        assert_eq!(
            *recorder.closed.lock().unwrap(),
            vec![(first, CloseReason::Kicked)]
        );
        assert_eq!(
            recorder.events_for(second),
            vec![ServerEvent::ParticipantsUpdate(vec!["alice".to_string()])]
        );

        // The kicked connection is no longer part of the namespace.
        assert!(matches!(
            ns.dispatch(first, join("alice")).await,
            Err(PollError::NotFound(_))
        ));
        assert_eq!(ns.snapshot().await.unwrap().connection_count, 2);
    }

    #[tokio::test]
    async fn test_disconnect_broadcasts_roster_for_live_connections() {
        let (ns, recorder) = spawn_namespace(10);
        let a = connected(&ns).await;
        let lurker = connected(&ns).await;
        ns.dispatch(a, join("Ann")).await.unwrap();
        recorder.clear();

        // Never joined the roster: the unchanged roster still goes out.
        ns.disconnect(lurker).await.unwrap();
        ns.snapshot().await.unwrap();
        assert_eq!(
            recorder.events_for(a),
            vec![ServerEvent::ParticipantsUpdate(vec!["Ann".to_string()])]
        );
        assert!(recorder.events_for(lurker).is_empty());

        // A second disconnect of the same connection is a no-op.
        recorder.clear();
        ns.disconnect(lurker).await.unwrap();
        ns.snapshot().await.unwrap();
        assert!(recorder.sent.lock().unwrap().is_empty());

        let b = connected(&ns).await;
        ns.disconnect(a).await.unwrap();
        let snapshot = ns.snapshot().await.unwrap();

        assert!(snapshot.roster.is_empty());
        assert_eq!(
            recorder.events_for(b).last(),
            Some(&ServerEvent::ParticipantsUpdate(Vec::new()))
        );
    }

    #[tokio::test]
    async fn test_late_joiner_receives_current_state() {
        let (ns, recorder) = spawn_namespace(10);
        let a = connected(&ns).await;
        ns.dispatch(a, join("Ann")).await.unwrap();
        ns.dispatch(a, color_poll()).await.unwrap();
        ns.dispatch(a, vote("Blue")).await.unwrap();

        let late = connected(&ns).await;

        let events = recorder.events_for(late);
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], ServerEvent::PollCreated(_)));
        assert_eq!(
            events[1],
            ServerEvent::PollResults(Tally::new(vec![
                ("Red".to_string(), 0),
                ("Blue".to_string(), 1)
            ]))
        );
        assert_eq!(
            events[2],
            ServerEvent::ParticipantsUpdate(vec!["Ann".to_string()])
        );
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let (ns, _recorder) = spawn_namespace(1);
        connected(&ns).await;

        let result = ns.connect(ConnectionId::new()).await;
        assert!(matches!(result, Err(PollError::CapacityExceeded(_))));
    }

    #[tokio::test]
    async fn test_student_login_and_chat() {
        let (ns, recorder) = spawn_namespace(10);
        let a = connected(&ns).await;
        let b = connected(&ns).await;

        ns.dispatch(
            a,
            InboundEvent::StudentLogin {
                name: "sam".to_string(),
            },
        )
        .await
        .unwrap();
        assert_eq!(
            recorder.events_for(a),
            vec![ServerEvent::login_success("sam".to_string())]
        );
        assert!(recorder.events_for(b).is_empty());

        let payload = serde_json::json!({"text": "hi", "sender": "sam"});
        ns.dispatch(a, InboundEvent::ChatMessage(payload.clone()))
            .await
            .unwrap();
        assert_eq!(
            recorder.events_for(b),
            vec![ServerEvent::ChatMessage(payload)]
        );
    }

    #[tokio::test]
    async fn test_cancel_closes_all_connections() {
        let (ns, recorder) = spawn_namespace(10);
        let a = connected(&ns).await;
        let b = connected(&ns).await;

        ns.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let closed = recorder.closed.lock().unwrap().clone();
        assert_eq!(
            closed,
            vec![(a, CloseReason::ShuttingDown), (b, CloseReason::ShuttingDown)]
        );
        assert!(ns.snapshot().await.is_err());
    }
}
