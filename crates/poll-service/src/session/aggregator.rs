//! `VoteAggregator` - in-memory tally for the active poll.
//!
//! Enforces one vote per connection per poll and drops votes for options the
//! active poll does not have. An unknown option is reported as such even if
//! the connection already voted.

use crate::errors::PollError;
use crate::models::Tally;
use common::types::ConnectionId;
use std::collections::HashSet;

/// Result of recording a vote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteOutcome {
    /// Vote counted; carries the tally after the increment.
    Accepted(Tally),
    /// The connection already voted on this poll.
    RejectedDuplicate,
    /// The option is not part of the active poll.
    RejectedUnknownOption,
}

impl VoteOutcome {
    /// Metric label for this outcome.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteOutcome::Accepted(_) => "accepted",
            VoteOutcome::RejectedDuplicate => "duplicate",
            VoteOutcome::RejectedUnknownOption => "unknown_option",
        }
    }

    /// Convert a rejection into the error reported to the voter.
    #[must_use]
    pub fn rejection(&self, option_text: &str) -> Option<PollError> {
        match self {
            VoteOutcome::Accepted(_) => None,
            VoteOutcome::RejectedDuplicate => Some(PollError::RejectedDuplicate),
            VoteOutcome::RejectedUnknownOption => {
                Some(PollError::RejectedUnknownOption(option_text.to_string()))
            }
        }
    }
}

/// Tally plus the set of connections that have voted.
#[derive(Debug, Default)]
pub struct VoteAggregator {
    /// Counts in option declaration order.
    counts: Vec<(String, u64)>,
    voted: HashSet<ConnectionId>,
}

impl VoteAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all votes and establish the option set of a new poll.
    pub fn reset<I, S>(&mut self, options: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.counts = options.into_iter().map(|o| (o.into(), 0)).collect();
        self.voted.clear();
    }

    pub fn record_vote(&mut self, connection_id: ConnectionId, option_text: &str) -> VoteOutcome {
        let Some(entry) = self
            .counts
            .iter_mut()
            .find(|(text, _)| text == option_text)
        else {
            return VoteOutcome::RejectedUnknownOption;
        };

        if !self.voted.insert(connection_id) {
            return VoteOutcome::RejectedDuplicate;
        }

        entry.1 += 1;
        VoteOutcome::Accepted(self.current_tally())
    }

    #[must_use]
    pub fn current_tally(&self) -> Tally {
        Tally::new(self.counts.clone())
    }

    #[must_use]
    pub fn has_voted(&self, connection_id: ConnectionId) -> bool {
        self.voted.contains(&connection_id)
    }

    #[must_use]
    pub fn voter_count(&self) -> usize {
        self.voted.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn color_aggregator() -> VoteAggregator {
        let mut aggregator = VoteAggregator::new();
        aggregator.reset(["Red", "Blue"]);
        aggregator
    }

    #[test]
    fn test_reset_starts_at_zero() {
        let aggregator = color_aggregator();
        let tally = aggregator.current_tally();
        assert_eq!(tally.get("Red"), Some(0));
        assert_eq!(tally.get("Blue"), Some(0));
        assert_eq!(tally.total(), 0);
    }

    #[test]
    fn test_first_vote_accepted() {
        let mut aggregator = color_aggregator();
        let voter = ConnectionId::new();

        let outcome = aggregator.record_vote(voter, "Red");

        let VoteOutcome::Accepted(tally) = outcome else {
            panic!("expected Accepted, got {outcome:?}");
        };
        assert_eq!(tally.get("Red"), Some(1));
        assert_eq!(tally.get("Blue"), Some(0));
        assert!(aggregator.has_voted(voter));
    }

    #[test]
    fn test_repeat_vote_rejected_without_change() {
        let mut aggregator = color_aggregator();
        let voter = ConnectionId::new();
        aggregator.record_vote(voter, "Red");

        for option in ["Blue", "Red", "Blue"] {
            assert_eq!(
                aggregator.record_vote(voter, option),
                VoteOutcome::RejectedDuplicate
            );
        }

        let tally = aggregator.current_tally();
        assert_eq!(tally.get("Red"), Some(1));
        assert_eq!(tally.get("Blue"), Some(0));
    }

    #[test]
    fn test_unknown_option_rejected_regardless_of_history() {
        let mut aggregator = color_aggregator();
        let fresh = ConnectionId::new();
        let voted = ConnectionId::new();
        aggregator.record_vote(voted, "Blue");

        assert_eq!(
            aggregator.record_vote(fresh, "Purple"),
            VoteOutcome::RejectedUnknownOption
        );
        assert_eq!(
            aggregator.record_vote(voted, "Purple"),
            VoteOutcome::RejectedUnknownOption
        );
        // The rejected fresh voter may still vote for a real option.
        assert!(matches!(
            aggregator.record_vote(fresh, "Red"),
            VoteOutcome::Accepted(_)
        ));
        assert_eq!(aggregator.current_tally().total(), 2);
    }

    #[test]
    fn test_reset_clears_voters() {
        let mut aggregator = color_aggregator();
        let voter = ConnectionId::new();
        aggregator.record_vote(voter, "Red");

        aggregator.reset(["Yes", "No"]);

        assert!(!aggregator.has_voted(voter));
        assert_eq!(aggregator.current_tally().get("Red"), None);
        assert!(matches!(
            aggregator.record_vote(voter, "Yes"),
            VoteOutcome::Accepted(_)
        ));
    }

    #[test]
    fn test_tally_sum_matches_voters() {
        let mut aggregator = color_aggregator();
        for i in 0..10 {
            let option = if i % 3 == 0 { "Red" } else { "Blue" };
            aggregator.record_vote(ConnectionId::new(), option);
        }
        aggregator.record_vote(ConnectionId::new(), "Green");

        assert_eq!(
            aggregator.current_tally().total(),
            aggregator.voter_count() as u64
        );
    }

    #[test]
    fn test_rejection_mapping() {
        assert!(VoteOutcome::Accepted(Tally::default())
            .rejection("Red")
            .is_none());
        assert!(matches!(
            VoteOutcome::RejectedDuplicate.rejection("Red"),
            Some(PollError::RejectedDuplicate)
        ));
        assert!(matches!(
            VoteOutcome::RejectedUnknownOption.rejection("Purple"),
            Some(PollError::RejectedUnknownOption(option)) if option == "Purple"
        ));
    }
}
