//! Per-namespace session state.
//!
//! These types are plain single-owner state; the namespace actor is the only
//! thing that mutates them.

pub mod aggregator;
pub mod poll_state;
pub mod registry;

pub use aggregator::{VoteAggregator, VoteOutcome};
pub use poll_state::{PollPhase, PollSessionState};
pub use registry::{Participant, ParticipantRegistry};
