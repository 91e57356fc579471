//! Invocation attempt records.

use crate::errors::ParseError;
use serde::Serialize;

/// The parse outcome of a single attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// The text parsed and matched the expected shape.
    Parsed,
    /// The text was rejected by the parser.
    Rejected(ParseError),
}

impl AttemptOutcome {
    /// Returns a short tag for logs and events.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Parsed => "parsed",
            Self::Rejected(err) => err.kind(),
        }
    }
}

/// One try at getting usable structured output from the invoker.
///
/// Attempts live only for the duration of the call that made them; they are
/// logged and emitted as events, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationAttempt {
    /// 1-based attempt number.
    pub attempt: usize,
    /// Text returned by the invoker on this attempt.
    pub raw: String,
    /// What the parser made of it.
    pub outcome: AttemptOutcome,
}

/// Event payload for an attempt, without the raw text.
#[derive(Debug, Serialize)]
struct AttemptSummary<'a> {
    attempt: usize,
    max_attempts: usize,
    outcome: &'static str,
    raw_len: usize,
    label: &'a str,
}

impl InvocationAttempt {
    /// Creates a new attempt record.
    #[must_use]
    pub fn new(attempt: usize, raw: impl Into<String>, outcome: AttemptOutcome) -> Self {
        Self {
            attempt,
            raw: raw.into(),
            outcome,
        }
    }

    /// Returns true if the attempt produced a usable value.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Parsed)
    }

    /// Summarizes the attempt for event emission.
    #[must_use]
    pub fn to_event_data(&self, label: &str, max_attempts: usize) -> serde_json::Value {
        serde_json::to_value(AttemptSummary {
            attempt: self.attempt,
            max_attempts,
            outcome: self.outcome.label(),
            raw_len: self.raw.len(),
            label,
        })
        .unwrap_or(serde_json::Value::Null)
    }
}
