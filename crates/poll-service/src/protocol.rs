//! Wire protocol for the WebSocket gateway.
//!
//! Every frame in either direction is a JSON text frame of the form
//! `{"event": <name>, "data": <payload>}`. Inbound names also accept the
//! legacy classroom-client spellings (`joinChat`, `submitAnswer`, `kickOut`).

use crate::errors::PollError;
use crate::models::{Poll, PollSpec, RosterSnapshot, Tally};
use common::types::PollId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Notice sent to a participant removed by the presenter.
pub const KICKED_OUT_MESSAGE: &str = "You have been kicked out.";

/// Acknowledgement text for `studentLogin`.
pub const LOGIN_SUCCESS_MESSAGE: &str = "Login successful";

/// Inbound frame as it appears on the wire.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
enum ClientFrame {
    #[serde(alias = "joinChat")]
    JoinRoster(JoinPayload),
    CreatePoll(PollSpec),
    #[serde(alias = "submitAnswer")]
    SubmitVote(VotePayload),
    #[serde(alias = "kickOut")]
    Kick(KickPayload),
    ChatMessage(Value),
    StudentLogin(LoginPayload),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinPayload {
    #[serde(alias = "username")]
    display_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VotePayload {
    #[serde(alias = "option")]
    option_text: String,
    #[serde(default)]
    poll_id: Option<PollId>,
}

/// `kick` accepts either a bare display name or `{ "displayName": ... }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum KickPayload {
    Bare(String),
    Named {
        #[serde(rename = "displayName", alias = "username")]
        display_name: String,
    },
}

/// `studentLogin` accepts either a bare name or `{ "name": ... }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LoginPayload {
    Bare(String),
    Named { name: String },
}

/// A parsed inbound event from one connection.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    JoinRoster { display_name: String },
    CreatePoll(PollSpec),
    SubmitVote {
        option_text: String,
        /// Poll the client believes is active, if it sent one.
        poll_id: Option<PollId>,
    },
    Kick { display_name: String },
    /// Relayed verbatim to the namespace.
    ChatMessage(Value),
    StudentLogin { name: String },
}

impl InboundEvent {
    /// Parse one text frame.
    ///
    /// # Errors
    ///
    /// `PollError::BadRequest` if the frame is not valid JSON, names an
    /// unknown event, or carries a malformed payload.
    pub fn parse(text: &str) -> Result<Self, PollError> {
        let frame: ClientFrame = serde_json::from_str(text)
            .map_err(|e| PollError::BadRequest(format!("malformed frame: {e}")))?;

        Ok(match frame {
            ClientFrame::JoinRoster(p) => InboundEvent::JoinRoster {
                display_name: p.display_name,
            },
            ClientFrame::CreatePoll(spec) => InboundEvent::CreatePoll(spec),
            ClientFrame::SubmitVote(p) => InboundEvent::SubmitVote {
                option_text: p.option_text,
                poll_id: p.poll_id,
            },
            ClientFrame::Kick(KickPayload::Bare(display_name) | KickPayload::Named { display_name }) => {
                InboundEvent::Kick { display_name }
            }
            ClientFrame::ChatMessage(payload) => InboundEvent::ChatMessage(payload),
            ClientFrame::StudentLogin(LoginPayload::Bare(name) | LoginPayload::Named { name }) => {
                InboundEvent::StudentLogin { name }
            }
        })
    }

    /// Event name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            InboundEvent::JoinRoster { .. } => "joinRoster",
            InboundEvent::CreatePoll(_) => "createPoll",
            InboundEvent::SubmitVote { .. } => "submitVote",
            InboundEvent::Kick { .. } => "kick",
            InboundEvent::ChatMessage(_) => "chatMessage",
            InboundEvent::StudentLogin { .. } => "studentLogin",
        }
    }
}

/// Outbound event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    PollCreated(Poll),
    /// Option text to count, in declaration order.
    PollResults(Tally),
    ParticipantsUpdate(RosterSnapshot),
    KickedOut { message: String },
    ChatMessage(Value),
    LoginSuccess { message: String, name: String },
    Error { code: String, message: String },
}

impl ServerEvent {
    #[must_use]
    pub fn kicked_out() -> Self {
        ServerEvent::KickedOut {
            message: KICKED_OUT_MESSAGE.to_string(),
        }
    }

    #[must_use]
    pub fn login_success(name: String) -> Self {
        ServerEvent::LoginSuccess {
            message: LOGIN_SUCCESS_MESSAGE.to_string(),
            name,
        }
    }

    /// Requester-only rejection notice.
    #[must_use]
    pub fn from_error(err: &PollError) -> Self {
        ServerEvent::Error {
            code: err.error_code().to_string(),
            message: err.client_message(),
        }
    }

    /// Event name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::PollCreated(_) => "pollCreated",
            ServerEvent::PollResults(_) => "pollResults",
            ServerEvent::ParticipantsUpdate(_) => "participantsUpdate",
            ServerEvent::KickedOut { .. } => "kickedOut",
            ServerEvent::ChatMessage(_) => "chatMessage",
            ServerEvent::LoginSuccess { .. } => "loginSuccess",
            ServerEvent::Error { .. } => "error",
        }
    }

    /// Encode as a text frame.
    pub fn to_json(&self) -> Result<String, PollError> {
        serde_json::to_string(self)
            .map_err(|e| PollError::Internal(format!("event encoding failed: {e}")))
    }
}
