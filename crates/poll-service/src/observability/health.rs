//! Liveness and readiness endpoints.
//!
//! - `GET /health` - process is running
//! - `GET /ready` - service accepts traffic and the persistence gateway
//!   answers its health check
//!
//! `/metrics` is served by the routes module from the Prometheus handle.

use crate::persistence::PersistenceGateway;
use axum::{extract::State, http::StatusCode, routing::get, Router};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Liveness and readiness flags.
#[derive(Debug)]
pub struct HealthState {
    live: AtomicBool,
    ready: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Live, not yet ready.
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
        }
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Used during shutdown so load balancers stop routing new sockets here.
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
struct ProbeState {
    health: Arc<HealthState>,
    persistence: Arc<dyn PersistenceGateway>,
}

/// Router serving `/health` and `/ready`.
pub fn health_router(health: Arc<HealthState>, persistence: Arc<dyn PersistenceGateway>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(ProbeState {
            health,
            persistence,
        })
}

async fn liveness_handler(State(state): State<ProbeState>) -> StatusCode {
    if state.health.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readiness_handler(State(state): State<ProbeState>) -> StatusCode {
    if !state.health.is_ready() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }

    match state.persistence.health_check().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            warn!(target: "poll.persistence", error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::errors::PollError;
    use crate::models::{NewPoll, Poll};
    use crate::persistence::InMemoryPollStore;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use common::types::{Namespace, PollId};
    use tower::util::ServiceExt;

    struct DownGateway;

    #[async_trait]
    impl PersistenceGateway for DownGateway {
        async fn create_poll(&self, _: &NewPoll) -> Result<PollId, PollError> {
            Err(PollError::Database("down".to_string()))
        }
        async fn increment_vote(&self, _: PollId, _: &str) -> Result<(), PollError> {
            Err(PollError::Database("down".to_string()))
        }
        async fn list_polls(&self, _: &Namespace) -> Result<Vec<Poll>, PollError> {
            Err(PollError::Database("down".to_string()))
        }
        async fn register_presenter(&self, _: &str) -> Result<(), PollError> {
            Err(PollError::Database("down".to_string()))
        }
        async fn health_check(&self) -> Result<(), PollError> {
            Err(PollError::Database("down".to_string()))
        }
    }

    async fn status(app: Router, uri: &str) -> StatusCode {
        let request = Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("Failed to build request");
        app.oneshot(request)
            .await
            .expect("Failed to execute request")
            .status()
    }

    #[test]
    fn test_health_state_transitions() {
        let state = HealthState::new();
        assert!(state.is_live());
        assert!(!state.is_ready());

        state.set_ready();
        assert!(state.is_ready());

        state.set_not_ready();
        assert!(!state.is_ready());
    }

    #[tokio::test]
    async fn test_liveness_always_ok() {
        let app = health_router(Arc::new(HealthState::new()), Arc::new(InMemoryPollStore::new()));
        assert_eq!(status(app, "/health").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_only_after_set_ready() {
        let health = Arc::new(HealthState::new());
        let store: Arc<dyn PersistenceGateway> = Arc::new(InMemoryPollStore::new());

        let app = health_router(Arc::clone(&health), Arc::clone(&store));
        assert_eq!(status(app, "/ready").await, StatusCode::SERVICE_UNAVAILABLE);

        health.set_ready();
        let app = health_router(health, store);
        assert_eq!(status(app, "/ready").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_fails_when_persistence_down() {
        let health = Arc::new(HealthState::new());
        health.set_ready();

        let app = health_router(health, Arc::new(DownGateway));
        assert_eq!(status(app, "/ready").await, StatusCode::SERVICE_UNAVAILABLE);
    }
}
