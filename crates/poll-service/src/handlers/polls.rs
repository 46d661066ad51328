//! Poll history.
//!
//! - `GET /api/v1/polls/:namespace` - all polls a presenter has run, oldest
//!   first, with their persisted vote counts

use crate::errors::PollError;
use crate::models::PollListResponse;
use crate::routes::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use common::types::Namespace;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Handler for GET /api/v1/polls/:namespace
///
/// An unknown namespace yields an empty list.
#[instrument(
    skip_all,
    name = "poll.polls.list",
    fields(method = "GET", endpoint = "/api/v1/polls/:namespace")
)]
pub async fn list_polls(
    State(state): State<Arc<AppState>>,
    Path(namespace): Path<String>,
) -> Result<Json<PollListResponse>, PollError> {
    let namespace = Namespace::new(namespace);
    let polls = state.persistence.list_polls(&namespace).await?;

    debug!(
        target: "poll.handlers.polls",
        namespace = %namespace,
        count = polls.len(),
        "Listed polls"
    );

    Ok(Json(PollListResponse { data: polls }))
}
