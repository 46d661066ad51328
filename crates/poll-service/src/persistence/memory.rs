//! In-process poll store used when no database is configured.

use super::PersistenceGateway;
use crate::errors::PollError;
use crate::models::{NewPoll, Poll};
use async_trait::async_trait;
use common::types::{Namespace, PollId};
use std::collections::HashSet;
use tokio::sync::RwLock;

/// Polls and presenters kept in memory for the life of the process.
#[derive(Debug, Default)]
pub struct InMemoryPollStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Insertion order doubles as creation order.
    polls: Vec<Poll>,
    presenters: HashSet<String>,
}

impl InMemoryPollStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored polls across all namespaces.
    pub async fn poll_count(&self) -> usize {
        self.inner.read().await.polls.len()
    }

    /// Whether a presenter username has been issued.
    pub async fn has_presenter(&self, username: &str) -> bool {
        self.inner.read().await.presenters.contains(username)
    }
}

#[async_trait]
impl PersistenceGateway for InMemoryPollStore {
    async fn create_poll(&self, poll: &NewPoll) -> Result<PollId, PollError> {
        let id = PollId::new();
        self.inner
            .write()
            .await
            .polls
            .push(Poll::from_new(id, poll.clone()));
        Ok(id)
    }

    async fn increment_vote(&self, poll_id: PollId, option_text: &str) -> Result<(), PollError> {
        let mut inner = self.inner.write().await;
        let poll = inner
            .polls
            .iter_mut()
            .find(|p| p.id == poll_id)
            .ok_or_else(|| PollError::NotFound("Poll".to_string()))?;

        if poll.increment(option_text) {
            Ok(())
        } else {
            Err(PollError::NotFound("Poll option".to_string()))
        }
    }

    async fn list_polls(&self, namespace: &Namespace) -> Result<Vec<Poll>, PollError> {
        Ok(self
            .inner
            .read()
            .await
            .polls
            .iter()
            .filter(|p| &p.presenter_namespace == namespace)
            .cloned()
            .collect())
    }

    async fn register_presenter(&self, username: &str) -> Result<(), PollError> {
        if self
            .inner
            .write()
            .await
            .presenters
            .insert(username.to_string())
        {
            Ok(())
        } else {
            Err(PollError::Conflict("Presenter username taken".to_string()))
        }
    }

    async fn health_check(&self) -> Result<(), PollError> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::models::{OptionSpec, PollSpec, DEFAULT_TIMER_SECONDS};

    fn new_poll(namespace: &str, question: &str) -> NewPoll {
        NewPoll::from_spec(
            Namespace::from(namespace),
            PollSpec {
                question_text: question.to_string(),
                options: vec![OptionSpec::new("Yes"), OptionSpec::correct("No")],
                timer_seconds: Some(30),
            },
            DEFAULT_TIMER_SECONDS,
        )
    }

    #[tokio::test]
    async fn test_list_polls_is_scoped_and_ordered() {
        let store = InMemoryPollStore::new();
        store.create_poll(&new_poll("presenter1111", "First?")).await.unwrap();
        store.create_poll(&new_poll("presenter2222", "Other?")).await.unwrap();
        store.create_poll(&new_poll("presenter1111", "Second?")).await.unwrap();

        let polls = store
            .list_polls(&Namespace::from("presenter1111"))
            .await
            .unwrap();

        let questions: Vec<_> = polls.iter().map(|p| p.question_text.as_str()).collect();
        assert_eq!(questions, vec!["First?", "Second?"]);
        assert_eq!(polls[0].timer_seconds, 30);
        assert!(polls[0].options[1].is_correct_answer);
    }

    #[tokio::test]
    async fn test_increment_vote_updates_count() {
        let store = InMemoryPollStore::new();
        let id = store.create_poll(&new_poll("presenter1111", "Q?")).await.unwrap();

        store.increment_vote(id, "Yes").await.unwrap();
        store.increment_vote(id, "Yes").await.unwrap();

        let polls = store
            .list_polls(&Namespace::from("presenter1111"))
            .await
            .unwrap();
        assert_eq!(polls[0].options[0].vote_count, 2);
        assert_eq!(polls[0].options[1].vote_count, 0);
    }

    #[tokio::test]
    async fn test_increment_unknown_targets() {
        let store = InMemoryPollStore::new();
        let id = store.create_poll(&new_poll("presenter1111", "Q?")).await.unwrap();

        assert!(matches!(
            store.increment_vote(PollId::new(), "Yes").await,
            Err(PollError::NotFound(_))
        ));
        assert!(matches!(
            store.increment_vote(id, "Maybe").await,
            Err(PollError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_register_presenter_conflict() {
        let store = InMemoryPollStore::new();
        store.register_presenter("presenter4321").await.unwrap();

        assert!(store.has_presenter("presenter4321").await);
        assert!(matches!(
            store.register_presenter("presenter4321").await,
            Err(PollError::Conflict(_))
        ));
    }
}
