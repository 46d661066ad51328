//! Live Poll session coordinator.
//!
//! A presenter opens a namespace (their presenter username), participants
//! join it over WebSocket, and the service keeps the roster, the active poll
//! and its tally consistent for everyone in the namespace:
//!
//! - Roster joins, leaves and kicks, broadcast as `participantsUpdate`
//! - Poll creation (one active poll per namespace), broadcast as `pollCreated`
//! - One vote per connection per poll, broadcast as `pollResults`
//! - Write-through of polls and vote counts to a storage gateway that can
//!   fail without affecting the live session
//!
//! # Architecture
//!
//! ```text
//! SessionCoordinator (singleton)
//! └── NamespaceActor (one per presenter namespace)
//!     ├── ParticipantRegistry
//!     ├── PollSessionState ── VoteAggregator
//!     └── Broadcaster ── ConnectionActor (one per WebSocket)
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Coordinator, namespace and connection actors
//! - [`session`] - Roster, poll state machine and vote aggregation
//! - [`protocol`] - Wire events exchanged with clients
//! - [`persistence`] - Storage gateways (in-memory and Postgres)
//! - [`transport`] - WebSocket gateway
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with client-safe codes

pub mod actors;
pub mod broadcaster;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod observability;
pub mod persistence;
pub mod protocol;
pub mod routes;
pub mod session;
pub mod transport;
