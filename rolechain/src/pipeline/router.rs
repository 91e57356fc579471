//! First-match routing pipeline.

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::core::{RunOutcome, StageResponse};
use crate::errors::RolechainError;
use crate::events::{kinds, SharedEventSink};
use crate::stages::{SharedStage, Stage};

/// A response tagged with the stage that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// The producing stage.
    pub stage_name: String,
    /// What it produced.
    pub response: StageResponse,
}

/// An ordered, validated sequence of stages.
///
/// Built with [`PipelineBuilder`](super::PipelineBuilder). Stages are held by
/// reference, so the same stage may sit in several pipelines.
pub struct Pipeline {
    pub(super) name: String,
    pub(super) stages: Vec<SharedStage>,
    pub(super) capabilities: Vec<String>,
    pub(super) fallback_message: String,
    pub(super) events: SharedEventSink,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("stages", &self.stage_names())
            .field("fallback_message", &self.fallback_message)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the stage names in registration order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Returns the stages in registration order.
    #[must_use]
    pub fn stages(&self) -> &[SharedStage] {
        &self.stages
    }

    /// Returns the caller-facing message for unhandled queries.
    #[must_use]
    pub fn fallback_message(&self) -> &str {
        &self.fallback_message
    }

    /// Returns the first stage, in registration order, that handles the
    /// query. Later stages are not asked once one accepts.
    ///
    /// # Errors
    ///
    /// Propagates the first invoker failure from a capability check.
    pub async fn route(&self, query: &str) -> Result<Option<SharedStage>, RolechainError> {
        Ok(self.select(query).await?.map(|(stage, _)| stage))
    }

    /// Picks the registered stage for the query together with the stage that
    /// will answer it. The two differ only when the registered stage is a
    /// nested pipeline, which is descended into instead of asked through
    /// `can_handle`, so a query is classified once at every depth.
    fn select<'a>(
        &'a self,
        query: &'a str,
    ) -> BoxFuture<'a, Result<Option<(SharedStage, SharedStage)>, RolechainError>> {
        async move {
            for stage in &self.stages {
                if let Some(nested) = stage.as_pipeline() {
                    if let Some((_, handler)) = nested.select(query).await? {
                        return Ok(Some((SharedStage::clone(stage), handler)));
                    }
                } else if stage.can_handle(query).await? {
                    return Ok(Some((SharedStage::clone(stage), SharedStage::clone(stage))));
                }
            }
            Ok(None)
        }
        .boxed()
    }

    /// Routes the query and processes it with the chosen stage.
    ///
    /// When the chosen stage is a nested pipeline, the outcome names the
    /// nested pipeline and the answer comes from the stage it routed to.
    /// No capable stage is not an error: the outcome is
    /// [`RunOutcome::Unhandled`] with the fallback message.
    ///
    /// # Errors
    ///
    /// Propagates invoker failures from routing or processing.
    pub async fn run(&self, query: &str) -> Result<RunOutcome, RolechainError> {
        let run_id = Uuid::now_v7();
        let span = info_span!("pipeline.run", pipeline = %self.name, %run_id);
        self.run_inner(query, run_id).instrument(span).await
    }

    async fn run_inner(&self, query: &str, run_id: Uuid) -> Result<RunOutcome, RolechainError> {
        let Some((stage, handler)) = self.select(query).await? else {
            info!("No stage can handle the query");
            self.events.try_emit(
                kinds::PIPELINE_UNHANDLED,
                Some(serde_json::json!({"pipeline": self.name, "run_id": run_id.to_string()})),
            );
            return Ok(RunOutcome::unhandled(self.fallback_message.clone()));
        };

        info!(stage = stage.name(), handler = handler.name(), "Routed query");
        self.events.try_emit(
            kinds::PIPELINE_ROUTED,
            Some(serde_json::json!({
                "pipeline": self.name,
                "run_id": run_id.to_string(),
                "stage": stage.name(),
                "handler": handler.name(),
            })),
        );

        let response = handler.process(query).await?;
        Ok(RunOutcome::handled(stage.name(), response))
    }

    /// Runs every stage in order, feeding each the rendered response of the
    /// previous one; the first stage receives the query. Routing is skipped.
    ///
    /// Stops after a degraded response, which is included in the results.
    ///
    /// # Errors
    ///
    /// Propagates the first stage failure.
    pub async fn relay(&self, query: &str) -> Result<Vec<StageResult>, RolechainError> {
        let mut results = Vec::with_capacity(self.stages.len());
        let mut input = query.to_string();

        for stage in &self.stages {
            let response = stage.process(&input).await?;
            let degraded = response.is_degraded();
            input = response.render();
            results.push(StageResult {
                stage_name: stage.name().to_string(),
                response,
            });
            if degraded {
                info!(pipeline = %self.name, stage = stage.name(), "Relay stopped at degraded output");
                break;
            }
        }
        Ok(results)
    }
}

/// A pipeline is itself a stage: it handles a query when any member does,
/// and answers with the routed stage's response or the fallback text.
#[async_trait]
impl Stage for Pipeline {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    async fn can_handle(&self, query: &str) -> Result<bool, RolechainError> {
        Ok(self.route(query).await?.is_some())
    }

    async fn process(&self, query: &str) -> Result<StageResponse, RolechainError> {
        Ok(match self.run(query).await? {
            RunOutcome::Handled { response, .. } => response,
            RunOutcome::Unhandled { message } => StageResponse::Text(message),
        })
    }

    fn as_pipeline(&self) -> Option<&Pipeline> {
        Some(self)
    }
}
