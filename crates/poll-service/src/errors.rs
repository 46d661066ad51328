//! Poll service error types.
//!
//! Every error has a stable client-facing code used both in WebSocket `error`
//! events and in HTTP error bodies. Client messages are generic for
//! infrastructure failures; the underlying detail is logged server-side only.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Poll service error type.
///
/// Rejections that are local to one connection's request (`InvalidPollSpec`,
/// `NoActivePoll`, `RejectedDuplicate`, `RejectedUnknownOption`, `StalePoll`)
/// are reported to that connection only and never change session state.
#[derive(Debug, Error)]
pub enum PollError {
    /// Malformed poll creation request.
    #[error("Invalid poll: {0}")]
    InvalidPollSpec(String),

    /// A vote arrived while the namespace has no open poll.
    #[error("No active poll")]
    NoActivePoll,

    /// The connection already voted on the active poll.
    #[error("Already voted on this poll")]
    RejectedDuplicate,

    /// The vote names an option that the active poll does not have.
    #[error("Unknown option: {0}")]
    RejectedUnknownOption(String),

    /// The vote names a poll that has been superseded.
    #[error("Poll is no longer active")]
    StalePoll,

    /// Durable write or read failed (including timeouts).
    #[error("Persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    /// Delivery to a single connection failed.
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// Database query failed on a request/response path.
    #[error("Database error: {0}")]
    Database(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Namespace connection limit reached.
    #[error("Namespace at capacity: {0}")]
    CapacityExceeded(String),

    /// Unparseable or malformed request.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Coordinator is shutting down.
    #[error("Service is draining")]
    Draining,

    /// Internal error (actor channel failures and the like).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PollError {
    /// Stable error code sent to clients.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            PollError::InvalidPollSpec(_) => "INVALID_POLL_SPEC",
            PollError::NoActivePoll => "NO_ACTIVE_POLL",
            PollError::RejectedDuplicate => "DUPLICATE_VOTE",
            PollError::RejectedUnknownOption(_) => "UNKNOWN_OPTION",
            PollError::StalePoll => "STALE_POLL",
            PollError::PersistenceUnavailable(_) => "PERSISTENCE_UNAVAILABLE",
            PollError::TransportFailure(_) => "TRANSPORT_FAILURE",
            PollError::Database(_) => "DATABASE_ERROR",
            PollError::NotFound(_) => "NOT_FOUND",
            PollError::Conflict(_) => "CONFLICT",
            PollError::CapacityExceeded(_) => "CAPACITY_EXCEEDED",
            PollError::BadRequest(_) => "BAD_REQUEST",
            PollError::Draining => "DRAINING",
            PollError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            PollError::InvalidPollSpec(_)
            | PollError::RejectedUnknownOption(_)
            | PollError::BadRequest(_) => StatusCode::BAD_REQUEST,
            PollError::NotFound(_) => StatusCode::NOT_FOUND,
            PollError::NoActivePoll
            | PollError::RejectedDuplicate
            | PollError::StalePoll
            | PollError::Conflict(_) => StatusCode::CONFLICT,
            PollError::CapacityExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            PollError::PersistenceUnavailable(_) | PollError::Draining => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            PollError::TransportFailure(_) | PollError::Database(_) | PollError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            PollError::PersistenceUnavailable(_) | PollError::Database(_) => {
                "Storage is temporarily unavailable".to_string()
            }
            PollError::TransportFailure(_) | PollError::Internal(_) => {
                "An internal error occurred".to_string()
            }
            PollError::Draining => "Server is shutting down, please reconnect".to_string(),
            PollError::CapacityExceeded(_) => "This session is full".to_string(),
            PollError::NotFound(what) => format!("{what} not found"),
            PollError::InvalidPollSpec(_)
            | PollError::NoActivePoll
            | PollError::RejectedDuplicate
            | PollError::RejectedUnknownOption(_)
            | PollError::StalePoll
            | PollError::Conflict(_)
            | PollError::BadRequest(_) => self.to_string(),
        }
    }

    /// Whether this error is a per-request rejection rather than a failure.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            PollError::InvalidPollSpec(_)
                | PollError::NoActivePoll
                | PollError::RejectedDuplicate
                | PollError::RejectedUnknownOption(_)
                | PollError::StalePoll
                | PollError::BadRequest(_)
        )
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for PollError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(target: "poll.http", error = %self, "Request failed");
        }

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.client_message(),
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for PollError {
    fn from(err: sqlx::Error) -> Self {
        PollError::Database(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;

    async fn read_body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_vote_rejections_have_distinct_codes() {
        assert_eq!(PollError::NoActivePoll.error_code(), "NO_ACTIVE_POLL");
        assert_eq!(PollError::RejectedDuplicate.error_code(), "DUPLICATE_VOTE");
        assert_eq!(
            PollError::RejectedUnknownOption("Purple".to_string()).error_code(),
            "UNKNOWN_OPTION"
        );
        assert_eq!(PollError::StalePoll.error_code(), "STALE_POLL");
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let err = PollError::Database("connection refused at 10.0.0.7:5432".to_string());
        assert!(!err.client_message().contains("10.0.0.7"));

        let err = PollError::PersistenceUnavailable("timeout after 2000ms".to_string());
        assert_eq!(err.client_message(), "Storage is temporarily unavailable");

        let err = PollError::Internal("channel send failed".to_string());
        assert_eq!(err.client_message(), "An internal error occurred");
    }

    #[test]
    fn test_rejections_are_reported_verbatim() {
        let err = PollError::InvalidPollSpec("at least two options are required".to_string());
        assert_eq!(
            err.client_message(),
            "Invalid poll: at least two options are required"
        );
        assert!(err.is_rejection());
        assert!(!PollError::Draining.is_rejection());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            PollError::InvalidPollSpec(String::new()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            PollError::NotFound("poll".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            PollError::Database(String::new()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            PollError::Draining.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_into_response_body_shape() {
        let response = PollError::NotFound("Presenter".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "NOT_FOUND");
        assert_eq!(body["error"]["message"], "Presenter not found");
    }

    #[tokio::test]
    async fn test_database_error_response_is_generic() {
        let response = PollError::Database("relation \"polls\" does not exist".to_string())
            .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "DATABASE_ERROR");
        assert!(!body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("relation"));
    }
}
