//! HTTP routes for the poll service.
//!
//! Defines the Axum router and application state.

use crate::actors::{ActorMetrics, NamespaceSettings, SessionCoordinatorHandle};
use crate::broadcaster::ConnectionHub;
use crate::config::Config;
use crate::handlers;
use crate::observability::{health_router, HealthState};
use crate::persistence::{PersistenceClient, PersistenceGateway};
use crate::transport;
use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Storage for presenters and poll history.
    pub persistence: Arc<dyn PersistenceGateway>,

    /// Supervisor of all namespace actors.
    pub coordinator: SessionCoordinatorHandle,

    /// Live connection actors, the namespace actors' broadcaster.
    pub hub: Arc<ConnectionHub>,

    /// Process-wide actor counters.
    pub actor_metrics: Arc<ActorMetrics>,

    /// Liveness and readiness flags.
    pub health: Arc<HealthState>,
}

impl AppState {
    /// Wire the coordinator, connection hub and probes around `persistence`.
    ///
    /// Spawns the `SessionCoordinator`; must be called inside a runtime.
    #[must_use]
    pub fn new(config: &Config, persistence: Arc<dyn PersistenceGateway>) -> Self {
        let hub = Arc::new(ConnectionHub::new());
        let actor_metrics = ActorMetrics::new();
        let coordinator = SessionCoordinatorHandle::new(
            NamespaceSettings {
                default_timer_seconds: config.default_timer_seconds,
                max_connections: config.max_connections_per_namespace,
            },
            hub.clone(),
            PersistenceClient::new(Arc::clone(&persistence), config.persistence_timeout),
            Arc::clone(&actor_metrics),
        );

        Self {
            persistence,
            coordinator,
            hub,
            actor_metrics,
            health: Arc::new(HealthState::new()),
        }
    }
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/health` - Liveness probe
/// - `/ready` - Readiness probe (ready flag + storage round-trip)
/// - `/metrics` - Prometheus metrics endpoint
/// - `/ws/:namespace` - WebSocket session gateway
/// - `/api/v1/presenters` - Presenter username issuance
/// - `/api/v1/polls/:namespace` - Poll history of a presenter
/// - TraceLayer for request logging
/// - 30 second request timeout (WebSocket sessions outlive it once upgraded)
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let probes = health_router(Arc::clone(&state.health), Arc::clone(&state.persistence));

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    let api_routes = Router::new()
        .route("/ws/:namespace", get(transport::ws_handler))
        .route("/api/v1/presenters", post(handlers::create_presenter))
        .route("/api/v1/polls/:namespace", get(handlers::list_polls))
        .with_state(state);

    probes
        .merge(metrics_routes)
        .merge(api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryPollStore;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    fn test_app() -> Router {
        let state = AppState::new(&Config::default(), Arc::new(InMemoryPollStore::new()));
        let handle = PrometheusBuilder::new().build_recorder().handle();
        build_routes(Arc::new(state), handle)
    }

    #[tokio::test]
    async fn test_presenter_then_empty_history() {
        let app = test_app();

        let response = app
            .clone()
            .oneshot(
                Request::post("/api/v1/presenters")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "success");
        let username = body["username"].as_str().unwrap().to_string();
        assert!(username.starts_with("presenter"));

        let response = app
            .oneshot(
                Request::get(format!("/api/v1/polls/{username}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, serde_json::json!({"data": []}));
    }

    #[tokio::test]
    async fn test_metrics_route_served() {
        let response = test_app()
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
