//! `PollSessionState` - lifecycle of the active poll in one namespace.
//!
//! ```text
//! Idle --create_poll--> Open(p1) --create_poll--> Open(p2) ...
//! ```
//!
//! There is no close transition: a poll stays open until superseded or until
//! the namespace is torn down. The timer is advisory and never enforced here.

use super::aggregator::{VoteAggregator, VoteOutcome};
use crate::errors::PollError;
use crate::models::{NewPoll, Poll, PollSpec, Tally};
use crate::observability::metrics;
use crate::persistence::PersistenceClient;
use common::types::{ConnectionId, Namespace, PollId};
use tracing::{debug, warn};

/// Poll lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    Idle,
    Open,
}

/// Active poll plus its aggregator.
#[derive(Debug)]
pub struct PollSessionState {
    namespace: Namespace,
    active: Option<Poll>,
    aggregator: VoteAggregator,
    default_timer_seconds: u32,
}

impl PollSessionState {
    #[must_use]
    pub fn new(namespace: Namespace, default_timer_seconds: u32) -> Self {
        Self {
            namespace,
            active: None,
            aggregator: VoteAggregator::new(),
            default_timer_seconds,
        }
    }

    #[must_use]
    pub fn phase(&self) -> PollPhase {
        if self.active.is_some() {
            PollPhase::Open
        } else {
            PollPhase::Idle
        }
    }

    #[must_use]
    pub fn active_poll(&self) -> Option<&Poll> {
        self.active.as_ref()
    }

    /// Tally of the active poll, if any.
    #[must_use]
    pub fn current_tally(&self) -> Option<Tally> {
        self.active
            .as_ref()
            .map(|_| self.aggregator.current_tally())
    }

    /// Validate, record and activate a new poll, superseding any active one.
    ///
    /// A persistence failure does not block the poll: it goes live under a
    /// locally minted id and the failure is logged by the client.
    pub async fn create_poll(
        &mut self,
        spec: PollSpec,
        persistence: &PersistenceClient,
    ) -> Result<Poll, PollError> {
        spec.validate()?;

        let new_poll = NewPoll::from_spec(self.namespace.clone(), spec, self.default_timer_seconds);
        let id = match persistence.create_poll(&new_poll).await {
            Ok(id) => id,
            Err(e) => {
                let id = PollId::new();
                warn!(
                    target: "poll.actor.namespace",
                    namespace = %self.namespace,
                    poll_id = %id,
                    error = %e,
                    "Poll not persisted, activating with local id"
                );
                id
            }
        };

        let poll = Poll::from_new(id, new_poll);
        self.aggregator.reset(poll.option_texts());
        if let Some(previous) = self.active.replace(poll.clone()) {
            debug!(
                target: "poll.actor.namespace",
                namespace = %self.namespace,
                superseded = %previous.id,
                "Poll superseded"
            );
        }
        metrics::record_poll_created();

        Ok(poll)
    }

    /// Record a vote against the active poll.
    ///
    /// `poll_id`, when given, must name the active poll. Rejections never
    /// change state. An accepted vote is written through to persistence; a
    /// failed write is logged and the in-memory count stands.
    pub async fn record_vote(
        &mut self,
        connection_id: ConnectionId,
        option_text: &str,
        poll_id: Option<PollId>,
        persistence: &PersistenceClient,
    ) -> Result<VoteOutcome, PollError> {
        let Some(active) = self.active.as_mut() else {
            return Err(PollError::NoActivePoll);
        };
        if poll_id.is_some_and(|id| id != active.id) {
            return Err(PollError::StalePoll);
        }

        let outcome = self.aggregator.record_vote(connection_id, option_text);
        metrics::record_vote(outcome.as_str());

        if matches!(outcome, VoteOutcome::Accepted(_)) {
            active.increment(option_text);
            let active_id = active.id;
            // Failure already logged and counted by the client.
            let _ = persistence.increment_vote(active_id, option_text).await;
        }

        Ok(outcome)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::models::{OptionSpec, DEFAULT_TIMER_SECONDS};
    use crate::persistence::{InMemoryPollStore, PersistenceGateway};
    use std::sync::Arc;
    use std::time::Duration;

    fn spec(question: &str, options: &[&str]) -> PollSpec {
        PollSpec {
            question_text: question.to_string(),
            options: options.iter().map(|o| OptionSpec::new(*o)).collect(),
            timer_seconds: None,
        }
    }

    fn setup() -> (PollSessionState, PersistenceClient, Arc<InMemoryPollStore>) {
        let store = Arc::new(InMemoryPollStore::new());
        let client = PersistenceClient::new(store.clone(), Duration::from_secs(1));
        let state = PollSessionState::new(Namespace::from("presenter1000"), DEFAULT_TIMER_SECONDS);
        (state, client, store)
    }

    #[tokio::test]
    async fn test_vote_without_poll_rejected() {
        let (mut state, client, _) = setup();
        assert_eq!(state.phase(), PollPhase::Idle);

        let result = state
            .record_vote(ConnectionId::new(), "Red", None, &client)
            .await;

        assert!(matches!(result, Err(PollError::NoActivePoll)));
        assert!(state.current_tally().is_none());
    }

    #[tokio::test]
    async fn test_create_poll_opens_with_zero_tally() {
        let (mut state, client, store) = setup();

        let poll = state
            .create_poll(spec("Color?", &["Red", "Blue"]), &client)
            .await
            .unwrap();

        assert_eq!(state.phase(), PollPhase::Open);
        assert_eq!(poll.timer_seconds, DEFAULT_TIMER_SECONDS);
        assert_eq!(state.current_tally().unwrap().total(), 0);
        assert_eq!(store.poll_count().await, 1);
    }

    #[tokio::test]
    async fn test_invalid_spec_leaves_state_unchanged() {
        let (mut state, client, store) = setup();
        state
            .create_poll(spec("Color?", &["Red", "Blue"]), &client)
            .await
            .unwrap();
        let before = state.active_poll().unwrap().id;

        let result = state.create_poll(spec("", &["A", "B"]), &client).await;

        assert!(matches!(result, Err(PollError::InvalidPollSpec(_))));
        assert_eq!(state.active_poll().unwrap().id, before);
        assert_eq!(store.poll_count().await, 1);
    }

    #[tokio::test]
    async fn test_new_poll_supersedes_and_resets_votes() {
        let (mut state, client, _) = setup();
        let voter = ConnectionId::new();
        state
            .create_poll(spec("Color?", &["Red", "Blue"]), &client)
            .await
            .unwrap();
        state.record_vote(voter, "Red", None, &client).await.unwrap();

        state
            .create_poll(spec("Size?", &["S", "L"]), &client)
            .await
            .unwrap();

        let tally = state.current_tally().unwrap();
        assert_eq!(tally.get("Red"), None);
        assert_eq!(tally.total(), 0);
        let outcome = state.record_vote(voter, "S", None, &client).await.unwrap();
        assert!(matches!(outcome, VoteOutcome::Accepted(_)));
    }

    #[tokio::test]
    async fn test_accepted_vote_is_written_through() {
        let (mut state, client, store) = setup();
        let poll = state
            .create_poll(spec("Color?", &["Red", "Blue"]), &client)
            .await
            .unwrap();

        state
            .record_vote(ConnectionId::new(), "Blue", Some(poll.id), &client)
            .await
            .unwrap();
        state
            .record_vote(ConnectionId::new(), "Purple", None, &client)
            .await
            .unwrap();

        let stored = store
            .list_polls(&Namespace::from("presenter1000"))
            .await
            .unwrap();
        assert_eq!(stored[0].options[1].vote_count, 1);
        assert_eq!(stored[0].options[0].vote_count, 0);
        assert_eq!(state.active_poll().unwrap().options[1].vote_count, 1);
    }

    #[tokio::test]
    async fn test_vote_for_superseded_poll_is_stale() {
        let (mut state, client, _) = setup();
        let old = state
            .create_poll(spec("Color?", &["Red", "Blue"]), &client)
            .await
            .unwrap();
        state
            .create_poll(spec("Color again?", &["Red", "Blue"]), &client)
            .await
            .unwrap();

        let result = state
            .record_vote(ConnectionId::new(), "Red", Some(old.id), &client)
            .await;

        assert!(matches!(result, Err(PollError::StalePoll)));
        assert_eq!(state.current_tally().unwrap().total(), 0);
    }
}
