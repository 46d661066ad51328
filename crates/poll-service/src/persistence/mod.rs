//! Persistence gateways for polls, vote increments and presenters.
//!
//! The live session never depends on storage: the namespace actor calls the
//! gateway through [`PersistenceClient`], which bounds every call with a
//! timeout and turns failures into [`PollError::PersistenceUnavailable`] for
//! the caller to log.
//!
//! # Implementations
//!
//! - [`InMemoryPollStore`] - default when no `DATABASE_URL` is configured
//! - [`PgPollStore`] - PostgreSQL via `sqlx`

mod memory;
mod postgres;

pub use memory::InMemoryPollStore;
pub use postgres::PgPollStore;

use crate::errors::PollError;
use crate::models::{NewPoll, Poll};
use crate::observability::metrics;
use async_trait::async_trait;
use common::types::{Namespace, PollId};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Durable record of polls, votes and presenters.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Record a new poll and return the id assigned to it.
    async fn create_poll(&self, poll: &NewPoll) -> Result<PollId, PollError>;

    /// Add one vote to `option_text` of `poll_id`.
    async fn increment_vote(&self, poll_id: PollId, option_text: &str) -> Result<(), PollError>;

    /// All polls created in a namespace, oldest first.
    async fn list_polls(&self, namespace: &Namespace) -> Result<Vec<Poll>, PollError>;

    /// Record a newly issued presenter username.
    ///
    /// Returns `PollError::Conflict` if the username is already taken.
    async fn register_presenter(&self, username: &str) -> Result<(), PollError>;

    /// Cheap round-trip used by the readiness probe.
    async fn health_check(&self) -> Result<(), PollError>;
}

/// Timeout-bounded, metered access to a [`PersistenceGateway`].
#[derive(Clone)]
pub struct PersistenceClient {
    gateway: Arc<dyn PersistenceGateway>,
    timeout: Duration,
}

impl PersistenceClient {
    #[must_use]
    pub fn new(gateway: Arc<dyn PersistenceGateway>, timeout: Duration) -> Self {
        Self { gateway, timeout }
    }

    /// The wrapped gateway.
    #[must_use]
    pub fn gateway(&self) -> &Arc<dyn PersistenceGateway> {
        &self.gateway
    }

    pub async fn create_poll(&self, poll: &NewPoll) -> Result<PollId, PollError> {
        self.bounded("create_poll", self.gateway.create_poll(poll))
            .await
    }

    pub async fn increment_vote(&self, poll_id: PollId, option_text: &str) -> Result<(), PollError> {
        self.bounded(
            "increment_vote",
            self.gateway.increment_vote(poll_id, option_text),
        )
        .await
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, PollError>>,
    ) -> Result<T, PollError> {
        let start = Instant::now();
        let result = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(PollError::PersistenceUnavailable(e.to_string())),
            Err(_) => Err(PollError::PersistenceUnavailable(format!(
                "{operation} timed out after {}ms",
                self.timeout.as_millis()
            ))),
        };

        let status = if result.is_ok() { "success" } else { "error" };
        metrics::record_persistence_latency(operation, status, start.elapsed());
        if let Err(e) = &result {
            metrics::record_persistence_error(operation);
            warn!(
                target: "poll.persistence",
                operation = operation,
                error = %e,
                "Persistence call failed"
            );
        }
        result
    }
}
