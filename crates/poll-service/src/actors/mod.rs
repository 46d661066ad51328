//! Actor model implementation for the session coordinator.
//!
//! ```text
//! SessionCoordinator (singleton)
//! └── supervises N NamespaceActors
//!     └── NamespaceActor (one per presenter namespace)
//!         ├── owns roster, active poll and tally
//!         └── reaches its ConnectionActors through the Broadcaster
//!             └── ConnectionActor (one per WebSocket)
//! ```
//!
//! # Key Design Decisions
//!
//! - **One mailbox per namespace**: every mutation of a namespace is serialized
//!   through its actor, so namespaces never contend with each other
//! - **CancellationToken propagation**: parent actors pass child tokens for graceful shutdown
//! - **Mailbox monitoring**: Depth thresholds with metrics (Namespace: 100/500, Connection: 50/200)
//!
//! # Modules
//!
//! - [`coordinator`] - `SessionCoordinator` that creates and supervises namespaces
//! - [`namespace`] - `NamespaceActor` per presenter namespace
//! - [`connection`] - `ConnectionActor` per WebSocket, owns the outbound half
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Mailbox monitoring and actor metrics

pub mod connection;
pub mod coordinator;
pub mod messages;
pub mod metrics;
pub mod namespace;

pub use connection::{ConnectionActor, ConnectionActorHandle};
pub use coordinator::{SessionCoordinator, SessionCoordinatorHandle};
pub use messages::*;
pub use metrics::{ActorMetrics, ActorType, MailboxLevel, MailboxMonitor};
pub use namespace::{NamespaceActor, NamespaceActorHandle, NamespaceSettings};
