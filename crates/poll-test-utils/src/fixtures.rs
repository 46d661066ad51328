//! Poll specs and client frames.

use poll_service::models::{OptionSpec, PollSpec};
use serde_json::{json, Value};

/// A poll spec with the default timer.
pub fn poll_spec(question: &str, options: &[&str]) -> PollSpec {
    PollSpec {
        question_text: question.to_string(),
        options: options.iter().map(|o| OptionSpec::new(*o)).collect(),
        timer_seconds: None,
    }
}

/// `{"event": event, "data": data}` as a text frame.
pub fn frame(event: &str, data: Value) -> String {
    json!({ "event": event, "data": data }).to_string()
}

pub fn join_frame(display_name: &str) -> String {
    frame("joinRoster", json!({ "displayName": display_name }))
}

pub fn create_poll_frame(question: &str, options: &[&str]) -> String {
    let options: Vec<Value> = options.iter().map(|o| json!({ "text": o })).collect();
    frame(
        "createPoll",
        json!({ "questionText": question, "options": options }),
    )
}

pub fn vote_frame(option_text: &str) -> String {
    frame("submitVote", json!({ "optionText": option_text }))
}

pub fn kick_frame(display_name: &str) -> String {
    frame("kick", json!({ "displayName": display_name }))
}

pub fn chat_frame(payload: Value) -> String {
    frame("chatMessage", payload)
}
