//! Stage responses and caller-facing run outcomes.

use super::RunStatus;
use serde::{Deserialize, Serialize};

/// A parsed, schema-checked JSON object produced from model text.
pub type StructuredResult = serde_json::Map<String, serde_json::Value>;

/// Error tag carried by the payload of a structured stage that ran out of
/// attempts.
pub const DEGRADED_ERROR: &str = "json_decode_error";

/// What a stage produced for a query.
///
/// Serializes untagged: a JSON object for `Structured`, a JSON string for
/// `Text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StageResponse {
    /// A structured result (possibly the degraded error payload).
    Structured(StructuredResult),
    /// Free text.
    Text(String),
}

impl StageResponse {
    /// Creates a text response.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Creates the degraded payload `{"error": "json_decode_error", "raw": ...}`.
    #[must_use]
    pub fn degraded(raw: impl Into<String>) -> Self {
        let mut map = StructuredResult::new();
        map.insert("error".to_string(), serde_json::json!(DEGRADED_ERROR));
        map.insert("raw".to_string(), serde_json::Value::String(raw.into()));
        Self::Structured(map)
    }

    /// Returns true if this is the degraded error payload.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        match self {
            Self::Structured(map) => {
                map.get("error").and_then(serde_json::Value::as_str) == Some(DEGRADED_ERROR)
                    && map.contains_key("raw")
            }
            Self::Text(_) => false,
        }
    }

    /// Returns the raw model text carried by a degraded payload.
    #[must_use]
    pub fn degraded_raw(&self) -> Option<&str> {
        if !self.is_degraded() {
            return None;
        }
        self.get("raw").and_then(serde_json::Value::as_str)
    }

    /// Returns the structured result, if any.
    #[must_use]
    pub fn as_structured(&self) -> Option<&StructuredResult> {
        match self {
            Self::Structured(map) => Some(map),
            Self::Text(_) => None,
        }
    }

    /// Returns the text, if this is a text response.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Structured(_) => None,
        }
    }

    /// Gets a field of a structured response.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.as_structured().and_then(|map| map.get(key))
    }

    /// Renders the response as prompt-ready text.
    ///
    /// Text is returned as-is, structured results as compact JSON.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Structured(map) => serde_json::Value::Object(map.clone()).to_string(),
        }
    }

    /// Converts to a JSON value.
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        match self {
            Self::Text(text) => serde_json::Value::String(text.clone()),
            Self::Structured(map) => serde_json::Value::Object(map.clone()),
        }
    }
}

impl From<StructuredResult> for StageResponse {
    fn from(map: StructuredResult) -> Self {
        Self::Structured(map)
    }
}

impl From<String> for StageResponse {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

/// The caller-facing result of a pipeline run.
///
/// Serializes as `{"status": "handled", "stage_name": ..., "response": ...}`
/// or `{"status": "unhandled", "message": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// A stage produced a response.
    Handled {
        /// The stage that produced the response.
        stage_name: String,
        /// The response itself.
        response: StageResponse,
    },
    /// No stage claimed the query.
    Unhandled {
        /// Human-readable fallback message.
        message: String,
    },
}

impl RunOutcome {
    /// Creates a handled outcome.
    #[must_use]
    pub fn handled(stage_name: impl Into<String>, response: StageResponse) -> Self {
        Self::Handled {
            stage_name: stage_name.into(),
            response,
        }
    }

    /// Creates an unhandled outcome.
    #[must_use]
    pub fn unhandled(message: impl Into<String>) -> Self {
        Self::Unhandled {
            message: message.into(),
        }
    }

    /// Returns the run status.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        match self {
            Self::Handled { .. } => RunStatus::Handled,
            Self::Unhandled { .. } => RunStatus::Unhandled,
        }
    }

    /// Returns true if a stage handled the query.
    #[must_use]
    pub fn is_handled(&self) -> bool {
        self.status().is_handled()
    }

    /// Returns the name of the stage that handled the query.
    #[must_use]
    pub fn stage_name(&self) -> Option<&str> {
        match self {
            Self::Handled { stage_name, .. } => Some(stage_name),
            Self::Unhandled { .. } => None,
        }
    }

    /// Returns the stage response, if handled.
    #[must_use]
    pub fn response(&self) -> Option<&StageResponse> {
        match self {
            Self::Handled { response, .. } => Some(response),
            Self::Unhandled { .. } => None,
        }
    }

    /// Returns the fallback message, if unhandled.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Unhandled { message } => Some(message),
            Self::Handled { .. } => None,
        }
    }

    /// Converts to a JSON value.
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        match self {
            Self::Handled {
                stage_name,
                response,
            } => serde_json::json!({
                "status": RunStatus::Handled.to_string(),
                "stage_name": stage_name,
                "response": response.to_value(),
            }),
            Self::Unhandled { message } => serde_json::json!({
                "status": RunStatus::Unhandled.to_string(),
                "message": message,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_degraded_payload() {
        let response = StageResponse::degraded("not json");
        assert!(response.is_degraded());
        assert_eq!(response.degraded_raw(), Some("not json"));
        assert_eq!(
            response.to_value(),
            serde_json::json!({"error": "json_decode_error", "raw": "not json"})
        );
    }

    #[test]
    fn test_error_field_alone_is_not_degraded() {
        let mut map = StructuredResult::new();
        map.insert("error".to_string(), serde_json::json!("json_decode_error"));
        assert!(!StageResponse::Structured(map).is_degraded());
        assert!(!StageResponse::text("json_decode_error").is_degraded());
    }

    #[test]
    fn test_render() {
        assert_eq!(StageResponse::text("hello").render(), "hello");

        let mut map = StructuredResult::new();
        map.insert("a".to_string(), serde_json::json!(1));
        assert_eq!(StageResponse::Structured(map).render(), r#"{"a":1}"#);
    }

    #[test]
    fn test_handled_outcome_shape() {
        let outcome = RunOutcome::handled("billing", StageResponse::text("Refunds take 5 days."));
        assert!(outcome.is_handled());
        assert_eq!(outcome.stage_name(), Some("billing"));

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "status": "handled",
                "stage_name": "billing",
                "response": "Refunds take 5 days."
            })
        );
        assert_eq!(json, outcome.to_value());
    }

    #[test]
    fn test_unhandled_outcome_shape() {
        let outcome = RunOutcome::unhandled("Transferring you to a human.");
        assert_eq!(outcome.status(), RunStatus::Unhandled);
        assert!(outcome.response().is_none());

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"status": "unhandled", "message": "Transferring you to a human."})
        );
    }

    #[test]
    fn test_outcome_deserialize() {
        let json = r#"{"status":"handled","stage_name":"kb","response":{"response":"hi","knowledge_items_used":2}}"#;
        let outcome: RunOutcome = serde_json::from_str(json).unwrap();
        assert_eq!(outcome.stage_name(), Some("kb"));
        assert_eq!(
            outcome.response().and_then(|r| r.get("knowledge_items_used")),
            Some(&serde_json::json!(2))
        );
    }
}
