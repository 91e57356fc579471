//! Pipeline builder with validation.

use std::collections::HashSet;

use super::router::Pipeline;
use crate::errors::PipelineValidationError;
use crate::events::{noop_sink, SharedEventSink};
use crate::stages::SharedStage;

/// Message returned when no stage handles a query.
pub const DEFAULT_FALLBACK_MESSAGE: &str = "I'm sorry, but I couldn't find a suitable agent to handle your query. Let me transfer you to a human representative.";

/// Builder for creating validated pipelines.
pub struct PipelineBuilder {
    name: String,
    stages: Vec<SharedStage>,
    fallback_message: String,
    events: SharedEventSink,
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("name", &self.name)
            .field("stages", &self.stages.iter().map(|s| s.name()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            fallback_message: DEFAULT_FALLBACK_MESSAGE.to_string(),
            events: noop_sink(),
        }
    }

    /// Appends a stage. Registration order is routing order.
    #[must_use]
    pub fn stage(mut self, stage: SharedStage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Appends several stages in order.
    #[must_use]
    pub fn stages(mut self, stages: impl IntoIterator<Item = SharedStage>) -> Self {
        self.stages.extend(stages);
        self
    }

    /// Sets the message returned for unhandled queries.
    #[must_use]
    pub fn fallback_message(mut self, message: impl Into<String>) -> Self {
        self.fallback_message = message.into();
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn event_sink(mut self, events: SharedEventSink) -> Self {
        self.events = events;
        self
    }

    /// Validates and builds the pipeline.
    ///
    /// # Errors
    ///
    /// - `PIPELINE-EMPTY` if no stage was registered.
    /// - `PIPELINE-DUPLICATE-STAGE` if two stages share a name.
    pub fn build(self) -> Result<Pipeline, PipelineValidationError> {
        if self.stages.is_empty() {
            return Err(PipelineValidationError::empty(&self.name));
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage.name()) {
                return Err(PipelineValidationError::duplicate_stage(&self.name, stage.name()));
            }
        }

        let mut capabilities: Vec<String> = Vec::new();
        for capability in self.stages.iter().flat_map(|s| s.capabilities()) {
            if !capabilities.contains(capability) {
                capabilities.push(capability.clone());
            }
        }

        tracing::debug!(pipeline = %self.name, stages = self.stages.len(), "Pipeline built");
        Ok(Pipeline {
            name: self.name,
            stages: self.stages,
            capabilities,
            fallback_message: self.fallback_message,
            events: self.events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageResponse;
    use crate::testing::FixedStage;
    use std::sync::Arc;

    fn stage(name: &str) -> SharedStage {
        Arc::new(FixedStage::new(name, StageResponse::text("ok")))
    }

    #[test]
    fn test_empty_pipeline_rejected() {
        let err = PipelineBuilder::new("empty").build().unwrap_err();
        assert_eq!(err.error_info.unwrap().code, "PIPELINE-EMPTY");
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let err = PipelineBuilder::new("dup")
            .stage(stage("billing"))
            .stage(stage("shipping"))
            .stage(stage("billing"))
            .build()
            .unwrap_err();
        assert_eq!(err.stages, vec!["billing".to_string()]);
        assert_eq!(err.error_info.unwrap().code, "PIPELINE-DUPLICATE-STAGE");
    }

    #[test]
    fn test_build_keeps_order_and_defaults() {
        let pipeline = PipelineBuilder::new("support")
            .stages([stage("billing"), stage("shipping")])
            .build()
            .unwrap();
        assert_eq!(pipeline.stage_names(), vec!["billing", "shipping"]);
        assert_eq!(pipeline.fallback_message(), DEFAULT_FALLBACK_MESSAGE);
    }

    #[test]
    fn test_capabilities_union() {
        let billing: SharedStage = Arc::new(
            FixedStage::new("billing", StageResponse::text("ok"))
                .with_capabilities(["refund", "pricing"]),
        );
        let shipping: SharedStage = Arc::new(
            FixedStage::new("shipping", StageResponse::text("ok"))
                .with_capabilities(["delivery", "refund"]),
        );
        let pipeline = PipelineBuilder::new("support")
            .stage(billing)
            .stage(shipping)
            .build()
            .unwrap();
        assert_eq!(
            crate::stages::Stage::capabilities(&pipeline),
            ["refund".to_string(), "pricing".to_string(), "delivery".to_string()]
        );
    }
}
