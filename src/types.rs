//! Common types shared by the dispatcher, the QnA client and the Discord host.

use std::collections::HashMap;
use std::fmt;

/// What kind of activity started a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityKind {
    /// A user message carrying (possibly empty) text
    Message,
    /// Any other host event, identified by name
    Other(String),
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivityKind::Message => f.write_str("message"),
            ActivityKind::Other(name) => f.write_str(name),
        }
    }
}

/// One inbound activity, built by the host for a single turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub kind: ActivityKind,
    pub text: Option<String>,
}

impl InboundMessage {
    pub fn message(text: impl Into<String>) -> Self {
        Self {
            kind: ActivityKind::Message,
            text: Some(text.into()),
        }
    }

    pub fn event(name: impl Into<String>) -> Self {
        Self {
            kind: ActivityKind::Other(name.into()),
            text: None,
        }
    }
}

/// A candidate answer returned by the knowledge base.
///
/// `score` is normalized to `0.0..=1.0`. Telemetry records it as the shortest
/// decimal that round-trips the `f64` (a service score of 95.23 becomes `0.9523`).
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredAnswer {
    pub answer: String,
    pub score: f64,
    /// Knowledge-base questions this answer was matched through, best first
    pub questions: Vec<String>,
}

/// Properties recorded for every answered question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryEvent {
    pub query_text: String,
    pub score: String,
    pub matched_question: String,
    pub answer_text: String,
}

impl TelemetryEvent {
    pub fn from_answer(query_text: &str, answer: &ScoredAnswer) -> Self {
        Self {
            query_text: query_text.to_string(),
            score: answer.score.to_string(),
            matched_question: answer.questions.first().cloned().unwrap_or_default(),
            answer_text: answer.answer.clone(),
        }
    }

    pub fn into_properties(self) -> HashMap<String, String> {
        HashMap::from([
            ("Question".to_string(), self.query_text),
            ("Score".to_string(), self.score),
            ("MatchedQuestion".to_string(), self.matched_question),
            ("Answer".to_string(), self.answer_text),
        ])
    }
}
