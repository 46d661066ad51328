//! Actor metrics and mailbox monitoring.
//!
//! Mailbox depth thresholds:
//!
//! | Actor Type  | Normal | Warning | Critical |
//! |-------------|--------|---------|----------|
//! | Coordinator | < 100  | 100-500 | > 500    |
//! | Namespace   | < 100  | 100-500 | > 500    |
//! | Connection  | < 50   | 50-200  | > 200    |

use crate::observability::metrics;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

pub const NAMESPACE_MAILBOX_NORMAL: usize = 100;
pub const NAMESPACE_MAILBOX_WARNING: usize = 500;

pub const CONNECTION_MAILBOX_NORMAL: usize = 50;
pub const CONNECTION_MAILBOX_WARNING: usize = 200;

/// Actor type for metrics labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// `SessionCoordinator` (singleton).
    Coordinator,
    /// `NamespaceActor` (one per presenter namespace).
    Namespace,
    /// `ConnectionActor` (one per WebSocket).
    Connection,
}

impl ActorType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Coordinator => "coordinator",
            ActorType::Namespace => "namespace",
            ActorType::Connection => "connection",
        }
    }

    #[must_use]
    pub const fn warning_threshold(&self) -> usize {
        match self {
            ActorType::Coordinator | ActorType::Namespace => NAMESPACE_MAILBOX_WARNING,
            ActorType::Connection => CONNECTION_MAILBOX_WARNING,
        }
    }

    #[must_use]
    pub const fn normal_threshold(&self) -> usize {
        match self {
            ActorType::Coordinator | ActorType::Namespace => NAMESPACE_MAILBOX_NORMAL,
            ActorType::Connection => CONNECTION_MAILBOX_NORMAL,
        }
    }
}

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    Normal,
    Warning,
    Critical,
}

/// Tracks queue depth of one actor mailbox.
///
/// Shared between the handle (which records enqueues) and the actor (which
/// records dequeues).
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    actor_id: String,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
    messages_dropped: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }

    pub fn record_enqueue(&self) {
        let new_depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_depth.fetch_max(new_depth, Ordering::Relaxed);
        metrics::set_actor_mailbox_depth(self.actor_type.as_str(), new_depth);

        match self.level_for_depth(new_depth) {
            MailboxLevel::Critical => warn!(
                target: "poll.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth = new_depth,
                threshold = self.actor_type.warning_threshold(),
                "Mailbox depth critical"
            ),
            // Log once when crossing into warning
            MailboxLevel::Warning if new_depth == self.actor_type.normal_threshold() + 1 => {
                debug!(
                    target: "poll.actor.mailbox",
                    actor_type = self.actor_type.as_str(),
                    actor_id = %self.actor_id,
                    depth = new_depth,
                    "Mailbox depth elevated"
                );
            }
            _ => {}
        }
    }

    pub fn record_dequeue(&self) {
        let previous = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| Some(d.saturating_sub(1)))
            .unwrap_or(0);
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
        metrics::set_actor_mailbox_depth(self.actor_type.as_str(), previous.saturating_sub(1));
    }

    /// Undo an enqueue that never reached the mailbox.
    pub fn record_send_failure(&self) {
        let _ = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| Some(d.saturating_sub(1)));
    }

    /// Record a message dropped due to backpressure.
    pub fn record_drop(&self) {
        let dropped = self.messages_dropped.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::record_message_dropped(self.actor_type.as_str());
        warn!(
            target: "poll.actor.mailbox",
            actor_type = self.actor_type.as_str(),
            actor_id = %self.actor_id,
            dropped = dropped,
            "Message dropped due to backpressure"
        );
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        self.level_for_depth(self.current_depth())
    }

    fn level_for_depth(&self, depth: usize) -> MailboxLevel {
        if depth > self.actor_type.warning_threshold() {
            MailboxLevel::Critical
        } else if depth > self.actor_type.normal_threshold() {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Process-wide actor counters, mirrored to Prometheus gauges.
#[derive(Debug, Default)]
pub struct ActorMetrics {
    active_namespaces: AtomicUsize,
    active_connections: AtomicUsize,
    actor_panics: AtomicU64,
}

impl ActorMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn namespace_created(&self) {
        let count = self.active_namespaces.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::set_namespaces_active(count);
    }

    pub fn namespace_removed(&self) {
        let count = saturating_decrement(&self.active_namespaces);
        metrics::set_namespaces_active(count);
    }

    pub fn connection_opened(&self) {
        let count = self.active_connections.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::set_connections_active(count);
    }

    pub fn connection_closed(&self) {
        let count = saturating_decrement(&self.active_connections);
        metrics::set_connections_active(count);
    }

    pub fn record_panic(&self, actor_type: ActorType) {
        self.actor_panics.fetch_add(1, Ordering::Relaxed);
        metrics::record_actor_panic(actor_type.as_str());
    }

    #[must_use]
    pub fn namespace_count(&self) -> usize {
        self.active_namespaces.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn panic_count(&self) -> u64 {
        self.actor_panics.load(Ordering::Relaxed)
    }
}

/// Decrement without wrapping; returns the new value.
fn saturating_decrement(counter: &AtomicUsize) -> usize {
    counter
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)))
        .map_or(0, |previous| previous.saturating_sub(1))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_mailbox_depth_tracking() {
        let monitor = MailboxMonitor::new(ActorType::Namespace, "presenter1000");

        monitor.record_enqueue();
        monitor.record_enqueue();
        monitor.record_enqueue();
        assert_eq!(monitor.current_depth(), 3);

        monitor.record_dequeue();
        assert_eq!(monitor.current_depth(), 2);
        assert_eq!(monitor.peak_depth(), 3);
        assert_eq!(monitor.messages_processed(), 1);
    }

    #[test]
    fn test_mailbox_levels() {
        let monitor = MailboxMonitor::new(ActorType::Connection, "conn");
        for _ in 0..CONNECTION_MAILBOX_NORMAL {
            monitor.record_enqueue();
        }
        assert_eq!(monitor.current_level(), MailboxLevel::Normal);

        monitor.record_enqueue();
        assert_eq!(monitor.current_level(), MailboxLevel::Warning);

        for _ in 0..CONNECTION_MAILBOX_WARNING {
            monitor.record_enqueue();
        }
        assert_eq!(monitor.current_level(), MailboxLevel::Critical);
    }

    #[test]
    fn test_dequeue_never_underflows() {
        let monitor = MailboxMonitor::new(ActorType::Coordinator, "coordinator");
        monitor.record_dequeue();
        monitor.record_send_failure();
        assert_eq!(monitor.current_depth(), 0);
    }

    #[test]
    fn test_drop_counter() {
        let monitor = MailboxMonitor::new(ActorType::Connection, "conn");
        monitor.record_drop();
        monitor.record_drop();
        assert_eq!(monitor.messages_dropped(), 2);
    }

    #[test]
    fn test_actor_metrics_counts() {
        let metrics = ActorMetrics::new();
        metrics.namespace_created();
        metrics.connection_opened();
        metrics.connection_opened();
        metrics.connection_closed();
        metrics.namespace_removed();
        metrics.namespace_removed();
        metrics.record_panic(ActorType::Namespace);

        assert_eq!(metrics.namespace_count(), 0);
        assert_eq!(metrics.connection_count(), 1);
        assert_eq!(metrics.panic_count(), 1);
    }
}
