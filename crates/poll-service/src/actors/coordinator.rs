//! `SessionCoordinator` - singleton supervisor of namespace actors.
//!
//! The coordinator:
//! - Spawns one `NamespaceActor` per namespace on first connect
//! - Monitors namespace tasks and records panics
//! - Owns the root cancellation token for graceful shutdown
//!
//! Namespaces are created lazily and live until shutdown. The coordinator
//! never touches session state; it only hands out namespace handles.

use super::messages::{CoordinatorMessage, CoordinatorStatus};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::namespace::{NamespaceActor, NamespaceActorHandle, NamespaceSettings};
use crate::broadcaster::Broadcaster;
use crate::errors::PollError;
use crate::persistence::PersistenceClient;

use common::types::{ConnectionId, Namespace};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

const COORDINATOR_CHANNEL_BUFFER: usize = 500;

/// Join timeout for namespace tasks when the coordinator is cancelled
/// without an explicit shutdown deadline.
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Handle to the `SessionCoordinator`.
#[derive(Clone, Debug)]
pub struct SessionCoordinatorHandle {
    sender: mpsc::Sender<CoordinatorMessage>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
}

impl SessionCoordinatorHandle {
    /// Spawn the coordinator and return a handle to it.
    #[must_use]
    pub fn new(
        settings: NamespaceSettings,
        broadcaster: Arc<dyn Broadcaster>,
        persistence: PersistenceClient,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(COORDINATOR_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();
        let mailbox = Arc::new(MailboxMonitor::new(ActorType::Coordinator, "coordinator"));

        let actor = SessionCoordinator {
            receiver,
            cancel_token: cancel_token.clone(),
            namespaces: HashMap::new(),
            accepting_new: true,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            settings,
            broadcaster,
            persistence,
            metrics,
            mailbox: Arc::clone(&mailbox),
        };

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
            mailbox,
        }
    }

    /// Get the namespace actor, spawning it if this is the first use.
    pub async fn get_or_create_namespace(
        &self,
        namespace: Namespace,
    ) -> Result<NamespaceActorHandle, PollError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(CoordinatorMessage::GetOrCreateNamespace {
            namespace,
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| PollError::Internal(format!("response receive failed: {e}")))?
    }

    /// Look up a namespace actor without creating one.
    pub async fn get_namespace(
        &self,
        namespace: Namespace,
    ) -> Result<Option<NamespaceActorHandle>, PollError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(CoordinatorMessage::GetNamespace {
            namespace,
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| PollError::Internal(format!("response receive failed: {e}")))
    }

    /// Admit a connection to a namespace.
    ///
    /// The admission itself runs on the namespace actor, so a busy namespace
    /// never stalls the coordinator.
    pub async fn connect(
        &self,
        namespace: Namespace,
        connection_id: ConnectionId,
    ) -> Result<NamespaceActorHandle, PollError> {
        let handle = self.get_or_create_namespace(namespace).await?;
        handle.connect(connection_id).await?;
        Ok(handle)
    }

    pub async fn status(&self) -> Result<CoordinatorStatus, PollError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(CoordinatorMessage::GetStatus { respond_to: tx })
            .await?;

        rx.await
            .map_err(|e| PollError::Internal(format!("response receive failed: {e}")))
    }

    /// Stop accepting namespaces and close every namespace, waiting up to
    /// `deadline` for each to finish.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), PollError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(CoordinatorMessage::Shutdown {
            deadline,
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| PollError::Internal(format!("response receive failed: {e}")))?
    }

    /// Cancel the coordinator and, through the token tree, every actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Token for actors that must stop with the coordinator.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    async fn enqueue(&self, message: CoordinatorMessage) -> Result<(), PollError> {
        self.mailbox.record_enqueue();
        self.sender.send(message).await.map_err(|e| {
            self.mailbox.record_send_failure();
            PollError::Internal(format!("channel send failed: {e}"))
        })
    }
}

struct ManagedNamespace {
    handle: NamespaceActorHandle,
    task_handle: JoinHandle<()>,
}

/// The `SessionCoordinator` implementation.
pub struct SessionCoordinator {
    receiver: mpsc::Receiver<CoordinatorMessage>,
    cancel_token: CancellationToken,
    namespaces: HashMap<Namespace, ManagedNamespace>,
    accepting_new: bool,
    drain_timeout: Duration,
    settings: NamespaceSettings,
    broadcaster: Arc<dyn Broadcaster>,
    persistence: PersistenceClient,
    metrics: Arc<ActorMetrics>,
    mailbox: Arc<MailboxMonitor>,
}

impl SessionCoordinator {
    #[instrument(skip_all, name = "poll.actor.coordinator")]
    async fn run(mut self) {
        info!(target: "poll.actor.coordinator", "SessionCoordinator started");

        loop {
            self.check_namespace_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "poll.actor.coordinator",
                        "SessionCoordinator received cancellation signal"
                    );
                    self.drain_namespaces().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    let Some(message) = msg else {
                        info!(
                            target: "poll.actor.coordinator",
                            "SessionCoordinator channel closed, exiting"
                        );
                        break;
                    };
                    self.mailbox.record_dequeue();
                    self.handle_message(message).await;
                }
            }
        }

        info!(
            target: "poll.actor.coordinator",
            namespaces_remaining = self.namespaces.len(),
            messages_processed = self.mailbox.messages_processed(),
            "SessionCoordinator stopped"
        );
    }

    async fn handle_message(&mut self, message: CoordinatorMessage) {
        match message {
            CoordinatorMessage::GetOrCreateNamespace {
                namespace,
                respond_to,
            } => {
                let _ = respond_to.send(self.get_or_create(namespace));
            }

            CoordinatorMessage::GetNamespace {
                namespace,
                respond_to,
            } => {
                let handle = self.namespaces.get(&namespace).map(|m| m.handle.clone());
                let _ = respond_to.send(handle);
            }

            CoordinatorMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.status());
            }

            CoordinatorMessage::Shutdown {
                deadline,
                respond_to,
            } => {
                info!(
                    target: "poll.actor.coordinator",
                    namespace_count = self.namespaces.len(),
                    deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
                    "Initiating graceful shutdown"
                );
                self.drain_timeout = deadline;
                self.drain_namespaces().await;
                let _ = respond_to.send(Ok(()));
            }
        }
    }

    fn get_or_create(&mut self, namespace: Namespace) -> Result<NamespaceActorHandle, PollError> {
        if let Some(managed) = self.namespaces.get(&namespace) {
            return Ok(managed.handle.clone());
        }
        if !self.accepting_new {
            return Err(PollError::Draining);
        }

        let (handle, task_handle) = NamespaceActor::spawn(
            namespace.clone(),
            self.settings,
            Arc::clone(&self.broadcaster),
            self.persistence.clone(),
            self.cancel_token.child_token(),
        );

        self.namespaces.insert(
            namespace.clone(),
            ManagedNamespace {
                handle: handle.clone(),
                task_handle,
            },
        );
        self.metrics.namespace_created();

        info!(
            target: "poll.actor.coordinator",
            namespace = %namespace,
            namespace_count = self.namespaces.len(),
            "Namespace created"
        );

        Ok(handle)
    }

    fn status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            namespace_count: self.namespaces.len(),
            connection_count: self.metrics.connection_count(),
            is_draining: !self.accepting_new,
            mailbox_depth: self.mailbox.current_depth(),
        }
    }

    /// Stop admitting namespaces, cancel the existing ones and wait for them.
    async fn drain_namespaces(&mut self) {
        self.accepting_new = false;

        for managed in self.namespaces.values() {
            managed.handle.cancel();
        }

        for (namespace, managed) in self.namespaces.drain() {
            match tokio::time::timeout(self.drain_timeout, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "poll.actor.coordinator",
                        namespace = %namespace,
                        "Namespace actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "poll.actor.coordinator",
                        namespace = %namespace,
                        error = ?e,
                        "Namespace actor task failed during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "poll.actor.coordinator",
                        namespace = %namespace,
                        "Namespace actor shutdown timed out"
                    );
                }
            }
            self.metrics.namespace_removed();
        }

        info!(target: "poll.actor.coordinator", "Namespaces drained");
    }

    /// Drop namespace actors whose task ended, recording panics.
    ///
    /// A namespace that dies loses its in-memory session; the next connect
    /// starts it fresh.
    async fn check_namespace_health(&mut self) {
        let finished: Vec<Namespace> = self
            .namespaces
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(namespace, _)| namespace.clone())
            .collect();

        for namespace in finished {
            let Some(managed) = self.namespaces.remove(&namespace) else {
                continue;
            };

            match managed.task_handle.await {
                Ok(()) => {
                    info!(
                        target: "poll.actor.coordinator",
                        namespace = %namespace,
                        "Namespace actor exited"
                    );
                }
                Err(join_error) if join_error.is_panic() => {
                    error!(
                        target: "poll.actor.coordinator",
                        namespace = %namespace,
                        error = ?join_error,
                        "Namespace actor panicked, session state lost"
                    );
                    self.metrics.record_panic(ActorType::Namespace);
                }
                Err(join_error) => {
                    warn!(
                        target: "poll.actor.coordinator",
                        namespace = %namespace,
                        error = ?join_error,
                        "Namespace actor task cancelled"
                    );
                }
            }

            self.metrics.namespace_removed();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::broadcaster::ConnectionHub;
    use crate::persistence::InMemoryPollStore;
    use crate::protocol::InboundEvent;

    fn spawn_coordinator(max_connections: usize) -> (SessionCoordinatorHandle, Arc<ActorMetrics>) {
        let metrics = ActorMetrics::new();
        let persistence =
            PersistenceClient::new(Arc::new(InMemoryPollStore::new()), Duration::from_secs(1));
        let handle = SessionCoordinatorHandle::new(
            NamespaceSettings {
                default_timer_seconds: 60,
                max_connections,
            },
            Arc::new(ConnectionHub::new()),
            persistence,
            Arc::clone(&metrics),
        );
        (handle, metrics)
    }

    #[tokio::test]
    async fn test_namespace_created_once() {
        let (coordinator, metrics) = spawn_coordinator(10);
        let ns = Namespace::from("presenter1000");

        assert!(coordinator.get_namespace(ns.clone()).await.unwrap().is_none());

        let first = coordinator.get_or_create_namespace(ns.clone()).await.unwrap();
        let second = coordinator.get_or_create_namespace(ns.clone()).await.unwrap();
        assert_eq!(first.namespace(), second.namespace());

        let status = coordinator.status().await.unwrap();
        assert_eq!(status.namespace_count, 1);
        assert!(!status.is_draining);
        assert_eq!(metrics.namespace_count(), 1);
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let (coordinator, _) = spawn_coordinator(10);
        let conn_a = ConnectionId::new();
        let conn_b = ConnectionId::new();

        let a = coordinator
            .connect(Namespace::from("presenter1000"), conn_a)
            .await
            .unwrap();
        let b = coordinator
            .connect(Namespace::from("presenter2000"), conn_b)
            .await
            .unwrap();

        a.dispatch(
            conn_a,
            InboundEvent::JoinRoster {
                display_name: "Ann".to_string(),
            },
        )
        .await
        .unwrap();

        assert_eq!(a.snapshot().await.unwrap().roster, vec!["Ann".to_string()]);
        assert!(b.snapshot().await.unwrap().roster.is_empty());

        // A connection only exists in the namespace it joined.
        assert!(matches!(
            b.dispatch(
                conn_a,
                InboundEvent::JoinRoster {
                    display_name: "Ann".to_string()
                }
            )
            .await,
            Err(PollError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_respects_capacity() {
        let (coordinator, _) = spawn_coordinator(1);
        let ns = Namespace::from("presenter1000");

        coordinator
            .connect(ns.clone(), ConnectionId::new())
            .await
            .unwrap();
        let result = coordinator.connect(ns, ConnectionId::new()).await;

        assert!(matches!(result, Err(PollError::CapacityExceeded(_))));
    }

    #[tokio::test]
    async fn test_shutdown_drains_and_rejects_new_namespaces() {
        let (coordinator, metrics) = spawn_coordinator(10);
        let ns = coordinator
            .get_or_create_namespace(Namespace::from("presenter1000"))
            .await
            .unwrap();

        coordinator.shutdown(Duration::from_secs(1)).await.unwrap();

        assert!(ns.is_cancelled());
        let status = coordinator.status().await.unwrap();
        assert!(status.is_draining);
        assert_eq!(status.namespace_count, 0);
        assert_eq!(metrics.namespace_count(), 0);

        let result = coordinator
            .get_or_create_namespace(Namespace::from("presenter2000"))
            .await;
        assert!(matches!(result, Err(PollError::Draining)));
    }

    #[tokio::test]
    async fn test_cancellation_token_tree() {
        let (coordinator, _) = spawn_coordinator(10);
        let child = coordinator.child_token();
        let ns = coordinator
            .get_or_create_namespace(Namespace::from("presenter1000"))
            .await
            .unwrap();

        assert!(!coordinator.is_cancelled());
        coordinator.cancel();

        assert!(coordinator.is_cancelled());
        assert!(child.is_cancelled());
        assert!(ns.is_cancelled());
    }
}
