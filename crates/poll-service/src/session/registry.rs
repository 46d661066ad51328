//! `ParticipantRegistry` - roster membership for one namespace.
//!
//! Maps live connection identity to display name. Iteration order is join
//! order; re-joining with the same connection keeps the original position.
//! Not thread-safe on its own: the owning `NamespaceActor` serialises access.

use crate::models::RosterSnapshot;
use common::types::ConnectionId;

/// A joined participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub connection_id: ConnectionId,
    pub display_name: String,
}

/// Roster of joined participants, in join order.
#[derive(Debug, Default)]
pub struct ParticipantRegistry {
    participants: Vec<Participant>,
}

impl ParticipantRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the participant for `connection_id`.
    ///
    /// Display names need not be unique.
    pub fn join(&mut self, connection_id: ConnectionId, display_name: String) -> RosterSnapshot {
        match self
            .participants
            .iter_mut()
            .find(|p| p.connection_id == connection_id)
        {
            Some(existing) => existing.display_name = display_name,
            None => self.participants.push(Participant {
                connection_id,
                display_name,
            }),
        }
        self.snapshot()
    }

    /// Remove the participant for `connection_id`, if any.
    pub fn remove(&mut self, connection_id: ConnectionId) -> RosterSnapshot {
        self.participants.retain(|p| p.connection_id != connection_id);
        self.snapshot()
    }

    /// Remove the first participant (in join order) whose display name
    /// matches exactly. Returns the removed connection so the caller can
    /// force-disconnect it.
    pub fn kick(&mut self, display_name: &str) -> (Option<ConnectionId>, RosterSnapshot) {
        let removed = self
            .participants
            .iter()
            .position(|p| p.display_name == display_name)
            .map(|index| self.participants.remove(index).connection_id);
        (removed, self.snapshot())
    }

    /// Display names in join order.
    #[must_use]
    pub fn snapshot(&self) -> RosterSnapshot {
        self.participants
            .iter()
            .map(|p| p.display_name.clone())
            .collect()
    }

    #[must_use]
    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.participants
            .iter()
            .any(|p| p.connection_id == connection_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}
