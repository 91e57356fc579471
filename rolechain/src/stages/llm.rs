//! Invoker-backed stage.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use super::history::{Interaction, InteractionHistory};
use super::structured::{StructuredCall, StructuredSpec};
use super::versions::VersionStore;
use super::Stage;
use crate::config::RolechainConfig;
use crate::core::StageResponse;
use crate::errors::RolechainError;
use crate::events::{kinds, noop_sink, SharedEventSink};
use crate::invoker::SharedInvoker;
use crate::parsing::{ParserConfig, StructuredResponseParser};
use crate::prompt::{PromptTemplate, ANSWER_TEMPLATE, CLASSIFY_TEMPLATE};
use crate::retry::RetryConfig;

const AFFIRMATIVE: [&str; 2] = ["true", "yes"];

/// Returns true only for an exact affirmative token, ignoring case and
/// surrounding whitespace.
///
/// Anything else ("True.", "yes, probably", an empty reply) is a no.
#[must_use]
pub fn is_affirmative(reply: &str) -> bool {
    let token = reply.trim().to_lowercase();
    AFFIRMATIVE.contains(&token.as_str())
}

/// A stage that classifies and answers through an invoker.
///
/// Text stages return the trimmed model reply. Structured stages parse it
/// with bounded re-invocation and degrade to the error payload when every
/// attempt is unusable.
pub struct LlmStage {
    name: String,
    capabilities: Vec<String>,
    invoker: SharedInvoker,
    classify: PromptTemplate,
    answer: PromptTemplate,
    instruction: Option<String>,
    structured: Option<StructuredSpec>,
    parser: StructuredResponseParser,
    retry: RetryConfig,
    events: SharedEventSink,
    history: Option<InteractionHistory>,
    versions: Option<Arc<VersionStore>>,
}

impl std::fmt::Debug for LlmStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmStage")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .field("invoker", &self.invoker.name())
            .field("structured", &self.structured)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl LlmStage {
    /// Creates a text stage.
    pub fn new<I, S>(name: impl Into<String>, capabilities: I, invoker: SharedInvoker) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            invoker,
            classify: PromptTemplate::new(CLASSIFY_TEMPLATE),
            answer: PromptTemplate::new(ANSWER_TEMPLATE),
            instruction: None,
            structured: None,
            parser: StructuredResponseParser::default(),
            retry: RetryConfig::default(),
            events: noop_sink(),
            history: None,
            versions: None,
        }
    }

    /// Declares structured output.
    #[must_use]
    pub fn structured(mut self, spec: StructuredSpec) -> Self {
        self.structured = Some(spec);
        self
    }

    /// Replaces the classification prompt (`{query}`, `{capabilities}`).
    #[must_use]
    pub fn with_classify_template(mut self, template: impl Into<PromptTemplate>) -> Self {
        self.classify = template.into();
        self
    }

    /// Replaces the answer prompt (`{query}`, `{capabilities}`).
    #[must_use]
    pub fn with_answer_template(mut self, template: impl Into<PromptTemplate>) -> Self {
        self.answer = template.into();
        self
    }

    /// Appends a fixed instruction to every answer prompt, e.g. a reply
    /// language.
    #[must_use]
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    /// Sets the parser configuration.
    #[must_use]
    pub fn with_parser(mut self, config: ParserConfig) -> Self {
        self.parser = StructuredResponseParser::new(config);
        self
    }

    /// Applies the parser and retry sections of a loaded config.
    #[must_use]
    pub fn with_config(self, config: &RolechainConfig) -> Self {
        self.with_parser(config.parser.clone())
            .with_retry(config.retry.clone())
    }

    /// Sets the retry policy for structured output.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: SharedEventSink) -> Self {
        self.events = events;
        self
    }

    /// Keeps the last `capacity` successful interactions.
    #[must_use]
    pub fn with_history(mut self, capacity: usize) -> Self {
        self.history = Some(InteractionHistory::new(capacity));
        self
    }

    /// Stores every successful response as a new version authored by this
    /// stage. The store may be shared with other stages.
    #[must_use]
    pub fn with_versions(mut self, store: Arc<VersionStore>) -> Self {
        self.versions = Some(store);
        self
    }

    /// Returns the version store, if one is attached.
    #[must_use]
    pub fn versions(&self) -> Option<&Arc<VersionStore>> {
        self.versions.as_ref()
    }

    /// Returns recorded interactions, oldest first. Empty without history.
    #[must_use]
    pub fn history(&self) -> Vec<Interaction> {
        self.history
            .as_ref()
            .map(InteractionHistory::snapshot)
            .unwrap_or_default()
    }

    /// Returns the retry policy.
    #[must_use]
    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    fn capability_list(&self) -> String {
        self.capabilities.join(", ")
    }

    fn answer_prompt(&self, query: &str) -> Result<String, RolechainError> {
        let capabilities = self.capability_list();
        let prompt = self
            .answer
            .render(&[("query", query), ("capabilities", &capabilities)])?;
        Ok(match &self.instruction {
            Some(instruction) => format!("{prompt}\n{instruction}"),
            None => prompt,
        })
    }
}

#[async_trait]
impl Stage for LlmStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    async fn can_handle(&self, query: &str) -> Result<bool, RolechainError> {
        let capabilities = self.capability_list();
        let prompt = self
            .classify
            .render(&[("query", query), ("capabilities", &capabilities)])?;
        let reply = self.invoker.invoke(&prompt).await?;
        let accepted = is_affirmative(&reply);
        debug!(stage = %self.name, accepted, reply = %reply.trim(), "Capability check");
        Ok(accepted)
    }

    async fn process(&self, query: &str) -> Result<StageResponse, RolechainError> {
        let prompt = self.answer_prompt(query)?;

        let response = match &self.structured {
            Some(spec) => {
                StructuredCall::new(&self.name, self.invoker.as_ref(), &self.parser, &self.retry)
                    .with_events(self.events.as_ref())
                    .object(&prompt, spec.expected_keys.as_ref())
                    .await?
                    .into_response()
            }
            None => StageResponse::text(self.invoker.invoke(&prompt).await?.trim()),
        };

        if response.is_degraded() {
            return Ok(response);
        }

        if let Some(history) = &self.history {
            history.record(query, response.clone());
        }
        if let Some(versions) = &self.versions {
            versions.create_version(response.render(), self.name.as_str());
        }
        info!(stage = %self.name, structured = self.structured.is_some(), "Stage completed");
        self.events
            .try_emit(kinds::STAGE_COMPLETED, Some(serde_json::json!({"stage": self.name})));
        Ok(response)
    }
}
