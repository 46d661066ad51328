//! Domain types for polls, tallies and rosters.
//!
//! Wire names are camelCase. Creation requests accept the short field names
//! used by existing classroom clients (`question`, `timer`, `correct`) as
//! aliases.

use crate::errors::PollError;
use chrono::{DateTime, Utc};
use common::types::{Namespace, PollId};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashSet;

/// Timer length used when a creation request omits `timerSeconds`.
pub const DEFAULT_TIMER_SECONDS: u32 = 60;

/// Longest timer a poll may carry: one day. Also keeps the value inside the
/// `INTEGER` column it is stored in.
pub const MAX_TIMER_SECONDS: u32 = 86_400;

/// Minimum number of options a poll must offer.
pub const MIN_POLL_OPTIONS: usize = 2;

/// Ordered list of display names of joined participants.
pub type RosterSnapshot = Vec<String>;

/// One answer option in a creation request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionSpec {
    pub text: String,
    #[serde(default, alias = "correct")]
    pub is_correct_answer: bool,
}

impl OptionSpec {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_correct_answer: false,
        }
    }

    #[must_use]
    pub fn correct(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_correct_answer: true,
        }
    }
}

/// A presenter's poll creation request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollSpec {
    #[serde(alias = "question")]
    pub question_text: String,
    pub options: Vec<OptionSpec>,
    #[serde(default, alias = "timer")]
    pub timer_seconds: Option<u32>,
}

impl PollSpec {
    /// Validate the request.
    ///
    /// Requires non-blank question text, at least [`MIN_POLL_OPTIONS`]
    /// options with non-blank, pairwise distinct text, and a timer between 1
    /// and [`MAX_TIMER_SECONDS`] when one is given. Option texts must be distinct because the tally is
    /// keyed by option text.
    pub fn validate(&self) -> Result<(), PollError> {
        if self.question_text.trim().is_empty() {
            return Err(PollError::InvalidPollSpec(
                "question text must not be empty".to_string(),
            ));
        }

        if self.options.len() < MIN_POLL_OPTIONS {
            return Err(PollError::InvalidPollSpec(format!(
                "at least {MIN_POLL_OPTIONS} options are required"
            )));
        }

        let mut seen = HashSet::with_capacity(self.options.len());
        for option in &self.options {
            if option.text.trim().is_empty() {
                return Err(PollError::InvalidPollSpec(
                    "option text must not be empty".to_string(),
                ));
            }
            if !seen.insert(option.text.as_str()) {
                return Err(PollError::InvalidPollSpec(format!(
                    "duplicate option text '{}'",
                    option.text
                )));
            }
        }

        match self.timer_seconds {
            Some(0) => {
                return Err(PollError::InvalidPollSpec(
                    "timer must be a positive number of seconds".to_string(),
                ));
            }
            Some(seconds) if seconds > MAX_TIMER_SECONDS => {
                return Err(PollError::InvalidPollSpec(format!(
                    "timer must not exceed {MAX_TIMER_SECONDS} seconds"
                )));
            }
            _ => {}
        }

        Ok(())
    }
}

/// A validated poll about to be recorded by a persistence gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPoll {
    pub namespace: Namespace,
    pub question_text: String,
    pub options: Vec<OptionSpec>,
    pub timer_seconds: u32,
    pub created_at: DateTime<Utc>,
}

impl NewPoll {
    /// Build from an already validated spec.
    #[must_use]
    pub fn from_spec(namespace: Namespace, spec: PollSpec, default_timer_seconds: u32) -> Self {
        Self {
            namespace,
            question_text: spec.question_text,
            options: spec.options,
            timer_seconds: spec.timer_seconds.unwrap_or(default_timer_seconds),
            created_at: Utc::now(),
        }
    }
}

/// An answer option with its live vote count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollOption {
    pub text: String,
    pub is_correct_answer: bool,
    pub vote_count: u64,
}

/// A created poll. Immutable apart from per-option vote counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    pub id: PollId,
    pub presenter_namespace: Namespace,
    pub question_text: String,
    pub options: Vec<PollOption>,
    pub timer_seconds: u32,
    pub created_at: DateTime<Utc>,
}

impl Poll {
    /// Materialise a poll with zeroed counts under the given id.
    #[must_use]
    pub fn from_new(id: PollId, new_poll: NewPoll) -> Self {
        Self {
            id,
            presenter_namespace: new_poll.namespace,
            question_text: new_poll.question_text,
            options: new_poll
                .options
                .into_iter()
                .map(|o| PollOption {
                    text: o.text,
                    is_correct_answer: o.is_correct_answer,
                    vote_count: 0,
                })
                .collect(),
            timer_seconds: new_poll.timer_seconds,
            created_at: new_poll.created_at,
        }
    }

    /// Option texts in declaration order.
    pub fn option_texts(&self) -> impl Iterator<Item = &str> {
        self.options.iter().map(|o| o.text.as_str())
    }

    /// Bump the count of one option. Returns false if the option is unknown.
    pub fn increment(&mut self, option_text: &str) -> bool {
        match self.options.iter_mut().find(|o| o.text == option_text) {
            Some(option) => {
                option.vote_count += 1;
                true
            }
            None => false,
        }
    }
}

/// Vote counts per option, in option declaration order.
///
/// Serialises as a JSON object (`{"Red": 1, "Blue": 0}`) whose keys keep
/// declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tally(Vec<(String, u64)>);

impl Tally {
    #[must_use]
    pub fn new(entries: Vec<(String, u64)>) -> Self {
        Self(entries)
    }

    /// Count for one option, if the option exists.
    #[must_use]
    pub fn get(&self, option_text: &str) -> Option<u64> {
        self.0
            .iter()
            .find(|(text, _)| text == option_text)
            .map(|(_, count)| *count)
    }

    /// Sum of all counts.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.0.iter().map(|(_, count)| count).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(text, count)| (text.as_str(), *count))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for Tally {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (text, count) in &self.0 {
            map.serialize_entry(text, count)?;
        }
        map.end()
    }
}

/// Response body for `POST /api/v1/presenters`.
#[derive(Debug, Clone, Serialize)]
pub struct PresenterResponse {
    pub status: &'static str,
    pub username: String,
}

/// Response body for `GET /api/v1/polls/:namespace`.
#[derive(Debug, Clone, Serialize)]
pub struct PollListResponse {
    pub data: Vec<Poll>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn spec(question: &str, options: &[&str]) -> PollSpec {
        PollSpec {
            question_text: question.to_string(),
            options: options.iter().map(|o| OptionSpec::new(*o)).collect(),
            timer_seconds: None,
        }
    }

    #[test]
    fn test_valid_spec() {
        assert!(spec("Color?", &["Red", "Blue"]).validate().is_ok());
    }

    #[test]
    fn test_empty_question_rejected() {
        let result = spec("   ", &["Red", "Blue"]).validate();
        assert!(matches!(result, Err(PollError::InvalidPollSpec(_))));
    }

    #[test]
    fn test_single_option_rejected() {
        let result = spec("Color?", &["Red"]).validate();
        assert!(matches!(result, Err(PollError::InvalidPollSpec(_))));
    }

    #[test]
    fn test_blank_option_rejected() {
        let result = spec("Color?", &["Red", ""]).validate();
        assert!(matches!(result, Err(PollError::InvalidPollSpec(_))));
    }

    #[test]
    fn test_duplicate_option_rejected() {
        let result = spec("Color?", &["Red", "Red"]).validate();
        assert!(matches!(result, Err(PollError::InvalidPollSpec(_))));
    }

    #[test]
    fn test_zero_timer_rejected() {
        let mut s = spec("Color?", &["Red", "Blue"]);
        s.timer_seconds = Some(0);
        assert!(matches!(s.validate(), Err(PollError::InvalidPollSpec(_))));
    }

    #[test]
    fn test_timer_upper_bound() {
        let mut s = spec("Color?", &["Red", "Blue"]);

        s.timer_seconds = Some(MAX_TIMER_SECONDS);
        assert!(s.validate().is_ok());

        for seconds in [MAX_TIMER_SECONDS + 1, u32::MAX] {
            s.timer_seconds = Some(seconds);
            assert!(matches!(s.validate(), Err(PollError::InvalidPollSpec(_))));
        }
    }

    #[test]
    fn test_spec_accepts_short_field_names() {
        let json = r#"{
            "question": "2 + 2?",
            "options": [{"text": "4", "correct": true}, {"text": "5"}],
            "timer": 30
        }"#;
        let parsed: PollSpec = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.question_text, "2 + 2?");
        assert_eq!(parsed.timer_seconds, Some(30));
        assert!(parsed.options[0].is_correct_answer);
        assert!(!parsed.options[1].is_correct_answer);
    }

    #[test]
    fn test_new_poll_defaults_timer() {
        let new_poll = NewPoll::from_spec(
            Namespace::from("presenter1234"),
            spec("Color?", &["Red", "Blue"]),
            DEFAULT_TIMER_SECONDS,
        );
        assert_eq!(new_poll.timer_seconds, 60);
    }

    #[test]
    fn test_poll_serializes_camel_case() {
        let new_poll = NewPoll::from_spec(
            Namespace::from("presenter1234"),
            spec("Color?", &["Red", "Blue"]),
            DEFAULT_TIMER_SECONDS,
        );
        let poll = Poll::from_new(PollId::new(), new_poll);
        let json = serde_json::to_value(&poll).unwrap();
        assert_eq!(json["questionText"], "Color?");
        assert_eq!(json["presenterNamespace"], "presenter1234");
        assert_eq!(json["timerSeconds"], 60);
        assert_eq!(json["options"][1]["text"], "Blue");
        assert_eq!(json["options"][1]["voteCount"], 0);
        assert_eq!(json["options"][1]["isCorrectAnswer"], false);
    }

    #[test]
    fn test_tally_serializes_in_declaration_order() {
        let tally = Tally::new(vec![
            ("Zebra".to_string(), 2),
            ("Apple".to_string(), 0),
        ]);
        assert_eq!(
            serde_json::to_string(&tally).unwrap(),
            r#"{"Zebra":2,"Apple":0}"#
        );
        assert_eq!(tally.total(), 2);
        assert_eq!(tally.get("Apple"), Some(0));
        assert_eq!(tally.get("Mango"), None);
    }
}
