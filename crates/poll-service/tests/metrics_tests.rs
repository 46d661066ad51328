//! Metric emission through a live namespace.
//!
//! Installs a global `DebuggingRecorder`, so this file holds a single test.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use common::types::{ConnectionId, Namespace};
use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use poll_service::actors::{NamespaceActor, NamespaceSettings};
use poll_service::persistence::PersistenceClient;
use poll_service::protocol::InboundEvent;
use poll_test_utils::fixtures::poll_spec;
use poll_test_utils::{MockPersistence, RecordingBroadcaster};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Sum of every counter named `name` whose labels include all of `labels`.
fn counter_value(
    metrics: &[(
        metrics_util::CompositeKey,
        Option<metrics::Unit>,
        Option<metrics::SharedString>,
        DebugValue,
    )],
    name: &str,
    labels: &[(&str, &str)],
) -> u64 {
    metrics
        .iter()
        .filter(|(key, _, _, _)| key.key().name() == name)
        .filter(|(key, _, _, _)| {
            labels.iter().all(|(k, v)| {
                key.key()
                    .labels()
                    .any(|label| label.key() == *k && label.value() == *v)
            })
        })
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(n) => *n,
            _ => 0,
        })
        .sum()
}

#[tokio::test]
async fn test_session_activity_is_counted() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let _ = recorder.install();

    let broadcaster = Arc::new(RecordingBroadcaster::new());
    let store = Arc::new(MockPersistence::new());
    let (ns, _task) = NamespaceActor::spawn(
        Namespace::from("presenter4242"),
        NamespaceSettings {
            default_timer_seconds: 60,
            max_connections: 10,
        },
        broadcaster.clone(),
        PersistenceClient::new(store.clone(), Duration::from_secs(1)),
        CancellationToken::new(),
    );

    let presenter = ConnectionId::new();
    let student = ConnectionId::new();
    let gone = ConnectionId::new();
    for id in [presenter, student, gone] {
        ns.connect(id).await.unwrap();
    }
    broadcaster.make_unreachable(gone);
    store.fail_increments(true);

    ns.dispatch(
        student,
        InboundEvent::JoinRoster {
            display_name: "Ann".to_string(),
        },
    )
    .await
    .unwrap();
    ns.dispatch(
        presenter,
        InboundEvent::CreatePoll(poll_spec("Color?", &["Red", "Blue"])),
    )
    .await
    .unwrap();

    let vote = |option: &str| InboundEvent::SubmitVote {
        option_text: option.to_string(),
        poll_id: None,
    };
    ns.dispatch(student, vote("Red")).await.unwrap();
    assert!(ns.dispatch(student, vote("Blue")).await.is_err());
    assert!(ns.dispatch(presenter, vote("Purple")).await.is_err());

    ns.dispatch(
        presenter,
        InboundEvent::Kick {
            display_name: "Ann".to_string(),
        },
    )
    .await
    .unwrap();

    let metrics = snapshotter.snapshot().into_vec();

    assert_eq!(counter_value(&metrics, "poll_polls_created_total", &[]), 1);
    assert_eq!(
        counter_value(&metrics, "poll_votes_total", &[("outcome", "accepted")]),
        1
    );
    assert_eq!(
        counter_value(&metrics, "poll_votes_total", &[("outcome", "duplicate")]),
        1
    );
    assert_eq!(
        counter_value(
            &metrics,
            "poll_votes_total",
            &[("outcome", "unknown_option")]
        ),
        1
    );
    assert_eq!(counter_value(&metrics, "poll_kicks_total", &[]), 1);
    assert_eq!(
        counter_value(
            &metrics,
            "poll_persistence_errors_total",
            &[("operation", "increment_vote")]
        ),
        1
    );
    // The unreachable connection missed the roster, poll, tally and
    // post-kick roster broadcasts.
    assert_eq!(
        counter_value(&metrics, "poll_broadcast_failures_total", &[]),
        4
    );
}
