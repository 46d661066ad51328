//! Actor message types.
//!
//! Request/reply messages carry a `oneshot` sender named `respond_to`.

use super::namespace::NamespaceActorHandle;
use crate::errors::PollError;
use crate::models::{Poll, RosterSnapshot, Tally};
use crate::protocol::{InboundEvent, ServerEvent};
use common::types::{ConnectionId, Namespace};
use std::time::Duration;
use tokio::sync::oneshot;

/// Messages handled by the `SessionCoordinator`.
#[derive(Debug)]
pub enum CoordinatorMessage {
    /// Return the namespace actor, spawning it on first use.
    GetOrCreateNamespace {
        namespace: Namespace,
        respond_to: oneshot::Sender<Result<NamespaceActorHandle, PollError>>,
    },

    /// Look up a namespace actor without creating it.
    GetNamespace {
        namespace: Namespace,
        respond_to: oneshot::Sender<Option<NamespaceActorHandle>>,
    },

    GetStatus {
        respond_to: oneshot::Sender<CoordinatorStatus>,
    },

    /// Stop accepting namespaces and drain the existing ones.
    Shutdown {
        deadline: Duration,
        respond_to: oneshot::Sender<Result<(), PollError>>,
    },
}

/// Messages handled by a `NamespaceActor`.
#[derive(Debug)]
pub enum NamespaceMessage {
    /// A transport connection was accepted for this namespace. The
    /// connection must already be reachable through the broadcaster.
    Connect {
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<Result<(), PollError>>,
    },

    /// An inbound event from one connection.
    Event {
        connection_id: ConnectionId,
        event: InboundEvent,
        respond_to: oneshot::Sender<Result<EventOutcome, PollError>>,
    },

    /// The transport connection closed.
    Disconnect { connection_id: ConnectionId },

    GetSnapshot {
        respond_to: oneshot::Sender<NamespaceSnapshot>,
    },
}

/// Messages handled by a `ConnectionActor`.
#[derive(Debug)]
pub enum ConnectionMessage {
    /// Write one event to the socket.
    Send { event: ServerEvent },

    /// Close the socket. Sent on kick, capacity refusal and shutdown.
    Close { reason: CloseReason },
}

/// Why the server closed a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Kicked,
    ShuttingDown,
    CapacityExceeded,
    /// The client stopped draining its outbound queue.
    SlowConsumer,
}

impl CloseReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Kicked => "kicked",
            CloseReason::ShuttingDown => "shutting_down",
            CloseReason::CapacityExceeded => "capacity_exceeded",
            CloseReason::SlowConsumer => "slow_consumer",
        }
    }
}

/// What a successfully handled event changed.
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    /// Roster after a join.
    RosterUpdated(RosterSnapshot),
    PollCreated(Poll),
    /// Tally after an accepted vote.
    VoteAccepted(Tally),
    Kicked {
        /// The kicked connection, if any participant matched.
        removed: Option<ConnectionId>,
        roster: RosterSnapshot,
    },
    /// A chat message was fanned out.
    Relayed,
    LoginAcknowledged,
}

/// Point-in-time view of one namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct NamespaceSnapshot {
    pub namespace: Namespace,
    pub roster: RosterSnapshot,
    pub active_poll: Option<Poll>,
    pub tally: Option<Tally>,
    pub connection_count: usize,
}

/// Coordinator status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorStatus {
    pub namespace_count: usize,
    pub connection_count: usize,
    pub is_draining: bool,
    pub mailbox_depth: usize,
}
