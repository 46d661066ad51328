//! `GET /ws/:namespace` - one WebSocket per participant or presenter.
//!
//! The socket is split: the outbound half goes to a `ConnectionActor`, the
//! inbound half is read here and every text frame is dispatched to the
//! namespace actor. Frames from one socket are handled one at a time, so a
//! connection's events reach its namespace in the order they were sent.

use crate::actors::{CloseReason, ConnectionActor, ConnectionActorHandle, NamespaceActorHandle};
use crate::errors::PollError;
use crate::protocol::{InboundEvent, ServerEvent};
use crate::routes::AppState;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use common::types::{ConnectionId, Namespace};
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Handler for GET /ws/:namespace
#[instrument(skip_all, name = "poll.transport.upgrade")]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(namespace): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let namespace = Namespace::new(namespace);
    ws.on_upgrade(move |socket| handle_socket(socket, namespace, state))
}

async fn handle_socket(socket: WebSocket, namespace: Namespace, state: Arc<AppState>) {
    let connection_id = ConnectionId::new();
    let (sink, mut stream) = socket.split();

    let (handle, _task) = ConnectionActor::spawn(
        connection_id,
        namespace.clone(),
        sink,
        state.coordinator.child_token(),
        Arc::clone(&state.actor_metrics),
    );
    state.hub.register(handle.clone()).await;

    let ns = match state
        .coordinator
        .connect(namespace.clone(), connection_id)
        .await
    {
        Ok(ns) => ns,
        Err(e) => {
            warn!(
                target: "poll.transport",
                namespace = %namespace,
                connection_id = %connection_id,
                error = %e,
                "Connection refused"
            );
            let reason = match e {
                PollError::CapacityExceeded(_) => CloseReason::CapacityExceeded,
                _ => CloseReason::ShuttingDown,
            };
            handle.close(reason);
            state.hub.unregister(connection_id).await;
            return;
        }
    };

    info!(
        target: "poll.transport",
        namespace = %namespace,
        connection_id = %connection_id,
        "WebSocket client connected"
    );

    loop {
        tokio::select! {
            () = handle.closed() => break,

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if !handle_frame(&ns, &handle, connection_id, &text).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    // Pings are answered by axum; binary frames carry no events.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(
                            target: "poll.transport",
                            connection_id = %connection_id,
                            error = %e,
                            "WebSocket read failed"
                        );
                        break;
                    }
                }
            }
        }
    }

    if let Err(e) = ns.disconnect(connection_id).await {
        debug!(
            target: "poll.transport",
            connection_id = %connection_id,
            error = %e,
            "Disconnect not delivered to namespace"
        );
    }
    state.hub.unregister(connection_id).await;
    handle.cancel();

    info!(
        target: "poll.transport",
        namespace = %namespace,
        connection_id = %connection_id,
        "WebSocket client disconnected"
    );
}

/// Returns false when the connection should be dropped.
async fn handle_frame(
    ns: &NamespaceActorHandle,
    handle: &ConnectionActorHandle,
    connection_id: ConnectionId,
    text: &str,
) -> bool {
    let event = match InboundEvent::parse(text) {
        Ok(event) => event,
        Err(e) => {
            debug!(
                target: "poll.transport",
                connection_id = %connection_id,
                error = %e,
                "Unparseable frame"
            );
            let _ = handle.send(ServerEvent::from_error(&e));
            return true;
        }
    };

    match ns.dispatch(connection_id, event).await {
        Ok(_) => true,
        // The namespace actor is gone; nothing more can be served.
        Err(PollError::Internal(reason)) => {
            warn!(
                target: "poll.transport",
                connection_id = %connection_id,
                reason = %reason,
                "Namespace unavailable, closing connection"
            );
            false
        }
        // Removed from the namespace, e.g. kicked.
        Err(PollError::NotFound(_)) => false,
        // Already reported to the client by the namespace actor.
        Err(_) => true,
    }
}
