//! Error types for the rolechain framework.
//!
//! Three failure families are distinct:
//! [`ParseError`] (the model answered but the text was unusable),
//! [`InvokerError`] (the model could not be reached at all) and
//! [`PipelineValidationError`] (the pipeline was assembled incorrectly).
//! "No capable stage" is not an error; it is an unhandled [`RunOutcome`].
//!
//! [`RunOutcome`]: crate::core::RunOutcome

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for rolechain operations.
#[derive(Debug, Error)]
pub enum RolechainError {
    /// The external invoker failed (network, auth, rate limit, timeout).
    #[error("{0}")]
    Invoker(#[from] InvokerError),

    /// A pipeline validation error occurred.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// A delegation layer tried to overwrite a field produced by a lower layer.
    #[error("Augmentation conflict in layer '{layer}': key '{key}' already present")]
    AugmentationConflict {
        /// The transform that produced the conflicting key.
        layer: String,
        /// The conflicting key.
        key: String,
    },

    /// A prompt template referenced a variable that was not supplied.
    #[error("Prompt template is missing variable '{variable}'")]
    Template {
        /// The unresolved placeholder name.
        variable: String,
    },

    /// A knowledge base operation referenced a missing item.
    #[error("Knowledge base error: {0}")]
    Knowledge(String),

    /// A version store operation referenced a missing version.
    #[error("Version store error: {0}")]
    Version(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RolechainError {
    /// Creates an augmentation conflict error.
    #[must_use]
    pub fn augmentation_conflict(layer: impl Into<String>, key: impl Into<String>) -> Self {
        Self::AugmentationConflict {
            layer: layer.into(),
            key: key.into(),
        }
    }

    /// Returns true if the error means the model was unreachable.
    #[must_use]
    pub fn is_invoker_unavailable(&self) -> bool {
        matches!(self, Self::Invoker(_))
    }
}

/// Failure to turn raw model text into a structured result.
///
/// Both variants are retryable by the caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    /// The text was not syntactically valid JSON (or not a JSON object).
    #[error("Malformed model output: {reason}")]
    MalformedOutput {
        /// The raw text as received from the model.
        raw: String,
        /// Why parsing failed.
        reason: String,
    },

    /// The JSON parsed but required keys are missing.
    #[error("Schema mismatch: missing keys [{}]", missing.join(", "))]
    SchemaMismatch {
        /// The required keys that were not present, sorted.
        missing: Vec<String>,
        /// The parsed value, kept so a caller may accept it partially.
        value: serde_json::Map<String, serde_json::Value>,
    },
}

impl ParseError {
    /// Creates a malformed output error.
    #[must_use]
    pub fn malformed(raw: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedOutput {
            raw: raw.into(),
            reason: reason.into(),
        }
    }

    /// Returns the error kind as a short machine-readable tag.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedOutput { .. } => "malformed_output",
            Self::SchemaMismatch { .. } => "schema_mismatch",
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("type".to_string(), serde_json::json!(self.kind()));
        match self {
            Self::MalformedOutput { raw, reason } => {
                map.insert("raw".to_string(), serde_json::json!(raw));
                map.insert("reason".to_string(), serde_json::json!(reason));
            }
            Self::SchemaMismatch { missing, .. } => {
                map.insert("missing".to_string(), serde_json::json!(missing));
            }
        }
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

/// Failure of the external text-generation call itself.
///
/// Every variant is an "invoker unavailable" condition. The core never
/// retries these; the invoker implementation may have its own backoff.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvokerError {
    /// Transport or server failure.
    #[error("Invoker unavailable: {reason}")]
    Unavailable {
        /// Reason reported by the transport.
        reason: String,
    },

    /// The call did not finish in time.
    #[error("Invoker timed out after {elapsed_ms}ms")]
    Timeout {
        /// Time waited before giving up.
        elapsed_ms: u64,
    },

    /// The endpoint rejected the call because of rate limiting.
    #[error("Invoker rate limited: {reason}")]
    RateLimited {
        /// Body or reason reported by the endpoint.
        reason: String,
    },

    /// The endpoint rejected the credentials.
    #[error("Invoker unauthorized: {reason}")]
    Unauthorized {
        /// Body or reason reported by the endpoint.
        reason: String,
    },

    /// The endpoint answered but the envelope carried no text.
    #[error("Invalid invoker response: {reason}")]
    InvalidResponse {
        /// What was missing or wrong.
        reason: String,
    },
}

impl InvokerError {
    /// Creates an unavailable error.
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(elapsed_ms: u64) -> Self {
        Self::Timeout { elapsed_ms }
    }

    /// Creates a rate limited error.
    #[must_use]
    pub fn rate_limited(reason: impl Into<String>) -> Self {
        Self::RateLimited {
            reason: reason.into(),
        }
    }

    /// Creates an unauthorized error.
    #[must_use]
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized {
            reason: reason.into(),
        }
    }

    /// Creates an invalid response error.
    #[must_use]
    pub fn invalid_response(reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            reason: reason.into(),
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        let kind = match self {
            Self::Unavailable { .. } => "unavailable",
            Self::Timeout { .. } => "timeout",
            Self::RateLimited { .. } => "rate_limited",
            Self::Unauthorized { .. } => "unauthorized",
            Self::InvalidResponse { .. } => "invalid_response",
        };
        map.insert("type".to_string(), serde_json::json!("InvokerUnavailable"));
        map.insert("kind".to_string(), serde_json::json!(kind));
        if let Self::Timeout { elapsed_ms } = self {
            map.insert("elapsed_ms".to_string(), serde_json::json!(elapsed_ms));
        }
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "PIPELINE-DUPLICATE-STAGE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("code".to_string(), serde_json::Value::String(self.code.clone()));
        map.insert("summary".to_string(), serde_json::Value::String(self.summary.clone()));

        if let Some(ref hint) = self.fix_hint {
            map.insert("fix_hint".to_string(), serde_json::Value::String(hint.clone()));
        }
        if !self.context.is_empty() {
            let context_map: serde_json::Map<String, serde_json::Value> = self
                .context
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            map.insert("context".to_string(), serde_json::Value::Object(context_map));
        }

        map
    }
}

/// Error raised when pipeline validation fails.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            error_info: None,
        }
    }

    /// Error for a pipeline with no stages.
    #[must_use]
    pub fn empty(pipeline: &str) -> Self {
        Self::new(format!("Pipeline '{pipeline}' has no stages")).with_error_info(
            ContractErrorInfo::new("PIPELINE-EMPTY", "Pipeline has no stages")
                .with_fix_hint("Register at least one stage before building.")
                .with_context_entry("pipeline", pipeline),
        )
    }

    /// Error for two stages sharing a name.
    #[must_use]
    pub fn duplicate_stage(pipeline: &str, stage: &str) -> Self {
        Self::new(format!(
            "Pipeline '{pipeline}' already has a stage named '{stage}'"
        ))
        .with_stages(vec![stage.to_string()])
        .with_error_info(
            ContractErrorInfo::new("PIPELINE-DUPLICATE-STAGE", "Stage names must be unique")
                .with_fix_hint("Rename one of the stages; names identify the handler in results.")
                .with_context_entry("pipeline", pipeline),
        )
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("message".to_string(), serde_json::Value::String(self.message.clone()));
        map.insert("stages".to_string(), serde_json::json!(self.stages));
        if let Some(ref info) = self.error_info {
            let info_map: serde_json::Map<String, serde_json::Value> =
                info.to_dict().into_iter().collect();
            map.insert("error_info".to_string(), serde_json::Value::Object(info_map));
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_kinds() {
        let err = ParseError::malformed("not json", "expected value");
        assert_eq!(err.kind(), "malformed_output");
        assert_eq!(err.to_dict().get("raw").unwrap(), "not json");

        let err = ParseError::SchemaMismatch {
            missing: vec!["a".to_string(), "b".to_string()],
            value: serde_json::Map::new(),
        };
        assert_eq!(err.kind(), "schema_mismatch");
        assert!(err.to_string().contains("a, b"));
    }

    #[test]
    fn test_invoker_error_to_dict() {
        let err = InvokerError::timeout(1500);
        let dict = err.to_dict();
        assert_eq!(dict.get("type").unwrap(), "InvokerUnavailable");
        assert_eq!(dict.get("kind").unwrap(), "timeout");
        assert_eq!(dict.get("elapsed_ms").unwrap(), 1500);
    }

    #[test]
    fn test_rolechain_error_from_invoker() {
        let err: RolechainError = InvokerError::rate_limited("slow down").into();
        assert!(err.is_invoker_unavailable());
        assert!(err.to_string().contains("slow down"));

        let err = RolechainError::augmentation_conflict("emotion", "response");
        assert!(!err.is_invoker_unavailable());
    }

    #[test]
    fn test_duplicate_stage_error() {
        let err = PipelineValidationError::duplicate_stage("support", "billing");
        assert_eq!(err.stages, vec!["billing".to_string()]);
        let info = err.error_info.as_ref().unwrap();
        assert_eq!(info.code, "PIPELINE-DUPLICATE-STAGE");
        assert_eq!(info.context.get("pipeline"), Some(&"support".to_string()));

        let dict = err.to_dict();
        assert!(dict.get("error_info").is_some());
    }

    #[test]
    fn test_empty_pipeline_error() {
        let err = PipelineValidationError::empty("support");
        assert!(err.to_string().contains("no stages"));
        assert_eq!(err.error_info.unwrap().code, "PIPELINE-EMPTY");
    }
}
