//! Presenter identity issuance.
//!
//! - `POST /api/v1/presenters` - mint a presenter username
//!
//! A presenter username doubles as the namespace the presenter's audience
//! joins. Usernames are `presenter` followed by four digits drawn from a
//! CSPRNG.

use crate::errors::PollError;
use crate::models::PresenterResponse;
use crate::routes::AppState;
use axum::{extract::State, http::StatusCode, Json};
use ring::rand::{SecureRandom, SystemRandom};
use std::sync::Arc;
use tracing::{info, instrument, warn};

const USERNAME_PREFIX: &str = "presenter";

/// Usernames use the numbers 1000 through 9999.
const USERNAME_MIN: u32 = 1000;
const USERNAME_SPAN: u32 = 9000;

/// Draws at or above this are rejected so every suffix is equally likely.
const UNBIASED_DRAW_LIMIT: u32 = u32::MAX - u32::MAX % USERNAME_SPAN;

/// Maximum collision retries before giving up.
const MAX_USERNAME_RETRIES: usize = 3;

/// Handler for POST /api/v1/presenters
///
/// # Response
///
/// - 201 Created: `{"status":"success","username":"presenter4821"}`
/// - 500 Internal Server Error: RNG failure or repeated username collisions
/// - 503 Service Unavailable: storage unavailable
#[instrument(
    skip_all,
    name = "poll.presenter.create",
    fields(method = "POST", endpoint = "/api/v1/presenters")
)]
pub async fn create_presenter(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<PresenterResponse>), PollError> {
    for attempt in 1..=MAX_USERNAME_RETRIES {
        let username = generate_presenter_username()?;

        match state.persistence.register_presenter(&username).await {
            Ok(()) => {
                info!(
                    target: "poll.handlers.presenters",
                    username = %username,
                    "Presenter registered"
                );
                return Ok((
                    StatusCode::CREATED,
                    Json(PresenterResponse {
                        status: "success",
                        username,
                    }),
                ));
            }
            Err(PollError::Conflict(_)) => {
                warn!(
                    target: "poll.handlers.presenters",
                    attempt = attempt,
                    "Presenter username collision, retrying"
                );
            }
            Err(e) => return Err(e),
        }
    }

    Err(PollError::Internal(format!(
        "presenter username collision after {MAX_USERNAME_RETRIES} attempts"
    )))
}

fn generate_presenter_username() -> Result<String, PollError> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; 4];

    loop {
        rng.fill(&mut bytes).map_err(|e| {
            tracing::error!(target: "poll.handlers.presenters", error = %e, "Failed to generate random bytes for username");
            PollError::Internal("RNG failure".to_string())
        })?;

        if let Some(number) = username_number(u32::from_be_bytes(bytes)) {
            return Ok(format!("{USERNAME_PREFIX}{number}"));
        }
    }
}

/// Map a uniform draw onto 1000..=9999, or `None` if it must be redrawn.
fn username_number(draw: u32) -> Option<u32> {
    (draw < UNBIASED_DRAW_LIMIT).then(|| USERNAME_MIN + draw % USERNAME_SPAN)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_username_format() {
        for _ in 0..200 {
            let username = generate_presenter_username().unwrap();
            let digits = username.strip_prefix(USERNAME_PREFIX).unwrap();
            assert_eq!(digits.len(), 4);
            let number: u16 = digits.parse().unwrap();
            assert!((1000..=9999).contains(&number));
        }
    }

    #[test]
    fn test_username_number_rejects_biased_tail() {
        assert_eq!(username_number(0), Some(1000));
        assert_eq!(username_number(8999), Some(9999));
        assert_eq!(username_number(9000), Some(1000));
        assert_eq!(username_number(UNBIASED_DRAW_LIMIT - 1), Some(9999));
        assert_eq!(username_number(UNBIASED_DRAW_LIMIT), None);
        assert_eq!(username_number(u32::MAX), None);

        // The accepted range is a whole number of spans.
        assert_eq!(UNBIASED_DRAW_LIMIT % USERNAME_SPAN, 0);
    }
}
