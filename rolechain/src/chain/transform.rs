//! Transformation layers applied on top of a stage result.

use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

use crate::core::StageResponse;
use crate::errors::RolechainError;
use crate::events::{noop_sink, SharedEventSink};
use crate::invoker::SharedInvoker;
use crate::parsing::{ExpectedKeys, StructuredResponseParser};
use crate::prompt::PromptTemplate;
use crate::retry::RetryConfig;
use crate::stages::StructuredCall;

/// Emotion scoring. Variables: `query`.
pub const EMOTION_TEMPLATE: &str = r#"Analyze the emotional content of the following text:
"{query}"

Provide emotion scores for the following emotions:
- Joy
- Sadness
- Anger
- Fear
- Surprise

Return the results as a compact JSON object with emotions as keys and scores (0 to 1) as values."#;

/// Personalized rewrite. Variables: `query`, `result`, `response`.
pub const PERSONALIZE_TEMPLATE: &str = r#"Given the following:

Customer Query: "{query}"
Current Result: {result}
Base Response: "{response}"

Generate a personalized response that:
1. Addresses the customer's query
2. Takes into account their emotional state
3. Aims to improve their emotional state if negative
4. Maintains a professional and empathetic tone

Provide only the generated response, without any additional explanation."#;

/// What a layer contributes to the result.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformOutput {
    /// Adds a new top-level field. The key must not already exist.
    Annotate {
        /// Field name.
        key: String,
        /// Field value.
        value: serde_json::Value,
    },
    /// Replaces the caller-facing `response`, keeping the first one under
    /// `base_response` and recording the revision.
    Revise {
        /// The new response text.
        response: String,
    },
}

impl TransformOutput {
    /// Creates an annotation.
    #[must_use]
    pub fn annotate(key: impl Into<String>, value: serde_json::Value) -> Self {
        Self::Annotate {
            key: key.into(),
            value,
        }
    }

    /// Creates a revision.
    #[must_use]
    pub fn revise(response: impl Into<String>) -> Self {
        Self::Revise {
            response: response.into(),
        }
    }
}

/// One augmentation step in a [`DelegationChain`](super::DelegationChain).
#[async_trait]
pub trait Transform: Send + Sync + Debug {
    /// Returns the layer name.
    fn name(&self) -> &str;

    /// Computes this layer's contribution from the query and the result so
    /// far.
    ///
    /// # Errors
    ///
    /// Fails when the invoker is unreachable.
    async fn apply(
        &self,
        query: &str,
        current: &StageResponse,
    ) -> Result<TransformOutput, RolechainError>;
}

/// A shared, type-erased transform handle.
pub type SharedTransform = Arc<dyn Transform>;

/// A closure-backed transform.
pub struct FnTransform<F>
where
    F: Fn(&str, &StageResponse) -> Result<TransformOutput, RolechainError> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnTransform<F>
where
    F: Fn(&str, &StageResponse) -> Result<TransformOutput, RolechainError> + Send + Sync,
{
    /// Creates a new function-based transform.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnTransform<F>
where
    F: Fn(&str, &StageResponse) -> Result<TransformOutput, RolechainError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTransform").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> Transform for FnTransform<F>
where
    F: Fn(&str, &StageResponse) -> Result<TransformOutput, RolechainError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(
        &self,
        query: &str,
        current: &StageResponse,
    ) -> Result<TransformOutput, RolechainError> {
        (self.func)(query, current)
    }
}

#[derive(Debug, Clone)]
enum Mode {
    Annotate {
        key: String,
        expected_keys: Option<ExpectedKeys>,
    },
    Revise,
}

/// An invoker-backed transform.
///
/// Templates may use `{query}`, `{result}` (the result so far as compact
/// JSON) and `{response}` (its `response` field, or the whole result when
/// there is none).
pub struct LlmTransform {
    name: String,
    invoker: SharedInvoker,
    template: PromptTemplate,
    mode: Mode,
    parser: StructuredResponseParser,
    retry: RetryConfig,
    events: SharedEventSink,
}

impl Debug for LlmTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmTransform")
            .field("name", &self.name)
            .field("invoker", &self.invoker.name())
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl LlmTransform {
    fn with_mode(
        name: impl Into<String>,
        invoker: SharedInvoker,
        template: impl Into<PromptTemplate>,
        mode: Mode,
    ) -> Self {
        Self {
            name: name.into(),
            invoker,
            template: template.into(),
            mode,
            parser: StructuredResponseParser::default(),
            retry: RetryConfig::default(),
            events: noop_sink(),
        }
    }

    /// A layer that stores a structured model answer under `key`.
    ///
    /// If every attempt is unusable the degraded payload is stored instead,
    /// so the layer never removes information.
    pub fn annotate(
        name: impl Into<String>,
        key: impl Into<String>,
        invoker: SharedInvoker,
        template: impl Into<PromptTemplate>,
        expected_keys: Option<ExpectedKeys>,
    ) -> Self {
        Self::with_mode(
            name,
            invoker,
            template,
            Mode::Annotate {
                key: key.into(),
                expected_keys,
            },
        )
    }

    /// A layer that rewrites the caller-facing response.
    pub fn revise(
        name: impl Into<String>,
        invoker: SharedInvoker,
        template: impl Into<PromptTemplate>,
    ) -> Self {
        Self::with_mode(name, invoker, template, Mode::Revise)
    }

    /// Emotion scoring under `emotion_scores`, with the default prompt.
    pub fn emotion_scores(invoker: SharedInvoker) -> Self {
        Self::annotate("emotion", "emotion_scores", invoker, EMOTION_TEMPLATE, None)
    }

    /// Emotion-aware rewrite of the response, with the default prompt.
    pub fn personalize(invoker: SharedInvoker) -> Self {
        Self::revise("personalize", invoker, PERSONALIZE_TEMPLATE)
    }

    /// Sets the retry policy for structured annotations.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the event sink for attempt events.
    #[must_use]
    pub fn with_events(mut self, events: SharedEventSink) -> Self {
        self.events = events;
        self
    }

    fn prompt(&self, query: &str, current: &StageResponse) -> Result<String, RolechainError> {
        let result = current.render();
        let response = current
            .get("response")
            .map_or_else(|| result.clone(), |value| match value {
                serde_json::Value::String(text) => text.clone(),
                other => other.to_string(),
            });
        self.template.render(&[
            ("query", query),
            ("result", &result),
            ("response", &response),
        ])
    }
}

#[async_trait]
impl Transform for LlmTransform {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(
        &self,
        query: &str,
        current: &StageResponse,
    ) -> Result<TransformOutput, RolechainError> {
        let prompt = self.prompt(query, current)?;
        match &self.mode {
            Mode::Annotate { key, expected_keys } => {
                let response =
                    StructuredCall::new(&self.name, self.invoker.as_ref(), &self.parser, &self.retry)
                        .with_events(self.events.as_ref())
                        .object(&prompt, expected_keys.as_ref())
                        .await?
                        .into_response();
                Ok(TransformOutput::annotate(key.clone(), response.to_value()))
            }
            Mode::Revise => {
                let text = self.invoker.invoke(&prompt).await?;
                Ok(TransformOutput::revise(text.trim()))
            }
        }
    }
}
