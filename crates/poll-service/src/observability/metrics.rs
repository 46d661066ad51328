//! Metrics definitions for the poll service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `poll_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `actor_type`: 3 values (coordinator, namespace, connection)
//! - `outcome`: 3 values (accepted, duplicate, unknown_option)
//! - `operation`: bounded by gateway methods (~5 values)
//! - `status`: success | error
//!
//! Namespaces are never used as label values.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return the handle used to render
/// `/metrics`.
///
/// # Errors
///
/// Returns error if a recorder is already installed.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("poll_persistence".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500,
            ],
        )
        .map_err(|e| format!("Failed to set persistence latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Gauges
// ============================================================================

/// Metric: `poll_connections_active`
pub fn set_connections_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("poll_connections_active").set(count as f64);
}

/// Metric: `poll_namespaces_active`
pub fn set_namespaces_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("poll_namespaces_active").set(count as f64);
}

/// Metric: `poll_actor_mailbox_depth`
/// Labels: `actor_type`
///
/// High values indicate the actor is falling behind.
pub fn set_actor_mailbox_depth(actor_type: &'static str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("poll_actor_mailbox_depth", "actor_type" => actor_type).set(depth as f64);
}

// ============================================================================
// Counters
// ============================================================================

/// Metric: `poll_votes_total`
/// Labels: `outcome`
pub fn record_vote(outcome: &'static str) {
    counter!("poll_votes_total", "outcome" => outcome).increment(1);
}

/// Metric: `poll_polls_created_total`
pub fn record_poll_created() {
    counter!("poll_polls_created_total").increment(1);
}

/// Metric: `poll_kicks_total`
pub fn record_kick() {
    counter!("poll_kicks_total").increment(1);
}

/// Metric: `poll_broadcast_failures_total`
///
/// One increment per connection that could not be reached during a fan-out.
pub fn record_broadcast_failure() {
    counter!("poll_broadcast_failures_total").increment(1);
}

/// Metric: `poll_persistence_errors_total`
/// Labels: `operation`
pub fn record_persistence_error(operation: &'static str) {
    counter!("poll_persistence_errors_total", "operation" => operation).increment(1);
}

/// Metric: `poll_actor_panics_total`
/// Labels: `actor_type`
pub fn record_actor_panic(actor_type: &'static str) {
    counter!("poll_actor_panics_total", "actor_type" => actor_type).increment(1);
}

/// Metric: `poll_messages_dropped_total`
/// Labels: `actor_type`
pub fn record_message_dropped(actor_type: &'static str) {
    counter!("poll_messages_dropped_total", "actor_type" => actor_type).increment(1);
}

// ============================================================================
// Histograms
// ============================================================================

/// Metric: `poll_persistence_latency_seconds`
/// Labels: `operation`, `status`
pub fn record_persistence_latency(operation: &'static str, status: &'static str, duration: Duration) {
    histogram!(
        "poll_persistence_latency_seconds",
        "operation" => operation,
        "status" => status
    )
    .record(duration.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    // These run against the global no-op recorder; values are asserted in
    // the integration tests with a DebuggingRecorder.

    #[test]
    fn test_gauges() {
        set_connections_active(0);
        set_connections_active(250);
        set_namespaces_active(3);
        set_actor_mailbox_depth("namespace", 12);
        set_actor_mailbox_depth("connection", 0);
    }

    #[test]
    fn test_counters() {
        record_vote("accepted");
        record_vote("duplicate");
        record_vote("unknown_option");
        record_poll_created();
        record_kick();
        record_broadcast_failure();
        record_persistence_error("increment_vote");
        record_actor_panic("namespace");
        record_message_dropped("connection");
    }

    #[test]
    fn test_persistence_latency() {
        record_persistence_latency("create_poll", "success", Duration::from_millis(4));
        record_persistence_latency("increment_vote", "error", Duration::from_secs(2));
    }
}
