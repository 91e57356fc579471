//! Post-hoc review of a pipeline interaction.

use crate::core::{RunOutcome, StageResponse};
use crate::errors::RolechainError;
use crate::events::{noop_sink, SharedEventSink};
use crate::invoker::SharedInvoker;
use crate::parsing::{ExpectedKeys, StructuredResponseParser};
use crate::prompt::PromptTemplate;
use crate::retry::RetryConfig;
use crate::stages::StructuredCall;

/// Review prompt. Variables: `query`, `outcome`.
pub const ANALYSIS_TEMPLATE: &str = r#"Analyze the following customer service interaction:

Customer Query: "{query}"
Agent Response: {outcome}

Provide an analysis including:
1. Appropriateness of the agent selection
2. Quality and relevance of the response
3. Customer satisfaction prediction
4. Areas for improvement
5. Any missed opportunities in the interaction

Return your analysis as a JSON object with these sections as keys."#;

/// Asks the model for a structured review of a query and its outcome.
///
/// Degrades to the error payload like any structured stage.
pub struct InteractionAnalyzer {
    invoker: SharedInvoker,
    template: PromptTemplate,
    expected_keys: Option<ExpectedKeys>,
    parser: StructuredResponseParser,
    retry: RetryConfig,
    events: SharedEventSink,
}

impl std::fmt::Debug for InteractionAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractionAnalyzer")
            .field("invoker", &self.invoker.name())
            .field("expected_keys", &self.expected_keys)
            .finish_non_exhaustive()
    }
}

impl InteractionAnalyzer {
    /// Creates an analyzer with the default prompt.
    #[must_use]
    pub fn new(invoker: SharedInvoker) -> Self {
        Self {
            invoker,
            template: PromptTemplate::new(ANALYSIS_TEMPLATE),
            expected_keys: None,
            parser: StructuredResponseParser::default(),
            retry: RetryConfig::default(),
            events: noop_sink(),
        }
    }

    /// Replaces the prompt (`{query}`, `{outcome}`).
    #[must_use]
    pub fn with_template(mut self, template: impl Into<PromptTemplate>) -> Self {
        self.template = template.into();
        self
    }

    /// Requires the given keys in the analysis.
    #[must_use]
    pub fn with_expected_keys(mut self, keys: ExpectedKeys) -> Self {
        self.expected_keys = Some(keys);
        self
    }

    /// Sets the retry policy.
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

    /// Reviews one interaction.
    ///
    /// # Errors
    ///
    /// Fails only if the invoker is unreachable.
    pub async fn analyze(
        &self,
        query: &str,
        outcome: &RunOutcome,
    ) -> Result<StageResponse, RolechainError> {
        let rendered = serde_json::to_string_pretty(&outcome.to_value())?;
        let prompt = self
            .template
            .render(&[("query", query), ("outcome", &rendered)])?;

        let outcome = StructuredCall::new("analysis", self.invoker.as_ref(), &self.parser, &self.retry)
            .with_events(self.events.as_ref())
            .object(&prompt, self.expected_keys.as_ref())
            .await?;
        Ok(outcome.into_response())
    }
}
