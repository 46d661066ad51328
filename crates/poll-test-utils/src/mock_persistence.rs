//! Persistence gateway with failure injection.
//!
//! Wraps an `InMemoryPollStore` and can be told to fail or stall individual
//! operations, so tests can show the live session does not depend on
//! storage.
//!
//! # Example
//!
//! ```rust,ignore
//! let store = Arc::new(MockPersistence::new());
//! store.fail_increments(true);
//! // votes are still tallied and broadcast
//! assert_eq!(store.increment_attempts(), 1);
//! ```

use async_trait::async_trait;
use common::types::{Namespace, PollId};
use poll_service::errors::PollError;
use poll_service::models::{NewPoll, Poll};
use poll_service::persistence::{InMemoryPollStore, PersistenceGateway};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct MockPersistence {
    store: InMemoryPollStore,
    fail_creates: AtomicBool,
    fail_increments: AtomicBool,
    fail_health: AtomicBool,
    /// Presenter registrations to reject with `Conflict` before accepting.
    presenter_conflicts: AtomicUsize,
    stall_creates: AtomicBool,
    create_attempts: AtomicUsize,
    increment_attempts: AtomicUsize,
    presenter_attempts: AtomicUsize,
}

impl MockPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    pub fn fail_increments(&self, fail: bool) {
        self.fail_increments.store(fail, Ordering::SeqCst);
    }

    pub fn fail_health(&self, fail: bool) {
        self.fail_health.store(fail, Ordering::SeqCst);
    }

    /// Make `create_poll` hang for an hour.
    pub fn stall_creates(&self, stall: bool) {
        self.stall_creates.store(stall, Ordering::SeqCst);
    }

    /// Reject the next `count` presenter registrations as taken.
    pub fn conflict_presenters(&self, count: usize) {
        self.presenter_conflicts.store(count, Ordering::SeqCst);
    }

    pub fn create_attempts(&self) -> usize {
        self.create_attempts.load(Ordering::SeqCst)
    }

    pub fn increment_attempts(&self) -> usize {
        self.increment_attempts.load(Ordering::SeqCst)
    }

    pub fn presenter_attempts(&self) -> usize {
        self.presenter_attempts.load(Ordering::SeqCst)
    }

    /// The backing store, for inspecting what was persisted.
    pub fn store(&self) -> &InMemoryPollStore {
        &self.store
    }
}

#[async_trait]
impl PersistenceGateway for MockPersistence {
    async fn create_poll(&self, poll: &NewPoll) -> Result<PollId, PollError> {
        self.create_attempts.fetch_add(1, Ordering::SeqCst);
        if self.stall_creates.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(PollError::Database("injected create failure".to_string()));
        }
        self.store.create_poll(poll).await
    }

    async fn increment_vote(&self, poll_id: PollId, option_text: &str) -> Result<(), PollError> {
        self.increment_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_increments.load(Ordering::SeqCst) {
            return Err(PollError::Database(
                "injected increment failure".to_string(),
            ));
        }
        self.store.increment_vote(poll_id, option_text).await
    }

    async fn list_polls(&self, namespace: &Namespace) -> Result<Vec<Poll>, PollError> {
        self.store.list_polls(namespace).await
    }

    async fn register_presenter(&self, username: &str) -> Result<(), PollError> {
        self.presenter_attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.presenter_conflicts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.presenter_conflicts
                .store(remaining - 1, Ordering::SeqCst);
            return Err(PollError::Conflict(format!("{username} already taken")));
        }
        self.store.register_presenter(username).await
    }

    async fn health_check(&self) -> Result<(), PollError> {
        if self.fail_health.load(Ordering::SeqCst) {
            return Err(PollError::Database("injected health failure".to_string()));
        }
        Ok(())
    }
}
