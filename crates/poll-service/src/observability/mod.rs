//! Observability for the poll service.
//!
//! # Privacy by Default
//!
//! Display names and chat payloads are never logged or used as metric
//! labels. Instrumented functions use `#[instrument(skip_all)]` with explicit
//! fields (namespace, connection id, poll id).
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `poll_connections_active` | Gauge | none | Live WebSocket connections |
//! | `poll_namespaces_active` | Gauge | none | Namespaces with a running actor |
//! | `poll_actor_mailbox_depth` | Gauge | `actor_type` | Backpressure indicator |
//! | `poll_votes_total` | Counter | `outcome` | Votes by acceptance outcome |
//! | `poll_polls_created_total` | Counter | none | Polls activated |
//! | `poll_kicks_total` | Counter | none | Participants removed by a presenter |
//! | `poll_broadcast_failures_total` | Counter | none | Per-connection delivery failures |
//! | `poll_persistence_errors_total` | Counter | `operation` | Failed or timed-out storage calls |
//! | `poll_persistence_latency_seconds` | Histogram | `operation`, `status` | Storage call latency |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;

use crate::config::LogFormat;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "poll_service=debug,tower_http=debug";

/// Install the global tracing subscriber.
///
/// # Errors
///
/// Returns error if a global subscriber is already set.
pub fn init_tracing(format: LogFormat) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer())
            .try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
    }
    .map_err(|e| format!("Failed to initialize tracing: {e}"))
}
