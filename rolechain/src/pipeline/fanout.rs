//! Concurrent dispatch of queries to several stages.

use futures::future::join_all;
use tracing::{debug, warn};

use crate::core::StageResponse;
use crate::errors::RolechainError;
use crate::stages::SharedStage;

/// The result of one fan-out assignment.
#[derive(Debug)]
pub struct FanOutResult {
    /// The stage that was asked.
    pub stage_name: String,
    /// The query it received.
    pub query: String,
    /// Its response, or why it failed.
    pub outcome: Result<StageResponse, RolechainError>,
}

impl FanOutResult {
    /// Returns true if the stage produced a response.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Returns the response, if any.
    #[must_use]
    pub fn response(&self) -> Option<&StageResponse> {
        self.outcome.as_ref().ok()
    }
}

/// A set of `(stage, query)` assignments processed concurrently.
///
/// Stages share no state with each other, so assignments run in parallel.
/// Results come back in assignment order, and one failure does not cancel
/// the others. Routing is not consulted.
#[derive(Default)]
pub struct FanOut {
    assignments: Vec<(SharedStage, String)>,
}

impl std::fmt::Debug for FanOut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanOut")
            .field(
                "assignments",
                &self
                    .assignments
                    .iter()
                    .map(|(stage, query)| (stage.name(), query.as_str()))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl FanOut {
    /// Creates an empty fan-out.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends the same query to every stage.
    #[must_use]
    pub fn broadcast(stages: impl IntoIterator<Item = SharedStage>, query: &str) -> Self {
        Self {
            assignments: stages.into_iter().map(|s| (s, query.to_string())).collect(),
        }
    }

    /// Adds an assignment.
    #[must_use]
    pub fn assign(mut self, stage: SharedStage, query: impl Into<String>) -> Self {
        self.assignments.push((stage, query.into()));
        self
    }

    /// Returns the number of assignments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    /// Returns true if there is nothing to run.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Processes every assignment concurrently.
    pub async fn run(&self) -> Vec<FanOutResult> {
        let futures = self.assignments.iter().map(|(stage, query)| async move {
            let outcome = stage.process(query).await;
            if let Err(err) = &outcome {
                warn!(stage = stage.name(), error = %err, "Fan-out assignment failed");
            }
            FanOutResult {
                stage_name: stage.name().to_string(),
                query: query.clone(),
                outcome,
            }
        });

        let results = join_all(futures).await;
        debug!(
            assignments = results.len(),
            failed = results.iter().filter(|r| !r.is_ok()).count(),
            "Fan-out complete"
        );
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::InvokerError;
    use crate::stages::{FnStage, LlmStage};
    use crate::testing::ScriptedInvoker;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_results_in_assignment_order() {
        let slow = Arc::new(FnStage::new("slow", |q: &str| {
            std::thread::sleep(Duration::from_millis(20));
            Ok(StageResponse::text(format!("slow:{q}")))
        }));
        let fast = Arc::new(FnStage::new("fast", |q: &str| {
            Ok(StageResponse::text(format!("fast:{q}")))
        }));

        let results = FanOut::new()
            .assign(slow, "one")
            .assign(fast, "two")
            .run()
            .await;

        let names: Vec<_> = results.iter().map(|r| r.stage_name.as_str()).collect();
        assert_eq!(names, vec!["slow", "fast"]);
        assert_eq!(results[0].response(), Some(&StageResponse::text("slow:one")));
        assert_eq!(results[1].response(), Some(&StageResponse::text("fast:two")));
    }

    #[tokio::test]
    async fn test_failure_is_per_assignment() {
        let down = Arc::new(ScriptedInvoker::new().fail_with(InvokerError::unavailable("down")));
        let broken = Arc::new(LlmStage::new("broken", ["x"], down));
        let ok = Arc::new(FnStage::new("ok", |_: &str| Ok(StageResponse::text("fine"))));

        let results = FanOut::broadcast([broken as SharedStage, ok as SharedStage], "q")
            .run()
            .await;

        assert_eq!(results.len(), 2);
        assert!(!results[0].is_ok());
        assert!(results[1].is_ok());
    }

    #[tokio::test]
    async fn test_empty_fan_out() {
        let fan_out = FanOut::new();
        assert!(fan_out.is_empty());
        assert!(fan_out.run().await.is_empty());
    }
}
