//! Stage trait and implementations.
//!
//! A stage is a named query handler: it can say whether a query is in its
//! domain ([`Stage::can_handle`]) and answer it ([`Stage::process`]).

mod history;
mod knowledge;
mod llm;
mod structured;
mod versions;

pub use history::{Interaction, InteractionHistory};
pub use knowledge::{KnowledgeBase, KnowledgeItem, KnowledgeStage, KnowledgeUpdate};
pub use llm::{is_affirmative, LlmStage};
pub use structured::{RetryOutcome, StructuredCall, StructuredOutcome, StructuredSpec};
pub use versions::{diff_lines, ConflictResolver, DiffLine, Edit, Version, VersionStore};

use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

use crate::chain::DelegationChain;
use crate::core::StageResponse;
use crate::errors::RolechainError;
use crate::pipeline::Pipeline;

/// A unit of query handling.
///
/// Implementations must be safe to share across concurrent callers; any
/// internal state is owned by the instance and serialized internally.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the name of the stage, unique within a pipeline.
    fn name(&self) -> &str;

    /// Returns the free-text domains this stage claims to handle.
    fn capabilities(&self) -> &[String] {
        &[]
    }

    /// Decides whether the query is in this stage's domain.
    ///
    /// # Errors
    ///
    /// Fails only when the invoker is unreachable; an unclear answer is
    /// `Ok(false)`.
    async fn can_handle(&self, query: &str) -> Result<bool, RolechainError>;

    /// Produces a response for the query.
    ///
    /// Structured stages degrade to the error payload instead of failing
    /// when the model keeps returning unusable text.
    ///
    /// # Errors
    ///
    /// Fails when the invoker is unreachable or a layer is misconfigured.
    async fn process(&self, query: &str) -> Result<StageResponse, RolechainError>;

    /// Returns the delegation chain behind this stage, if it is one.
    fn as_chain(&self) -> Option<&DelegationChain> {
        None
    }

    /// Returns the pipeline behind this stage, if it is one.
    fn as_pipeline(&self) -> Option<&Pipeline> {
        None
    }
}

/// A shared, type-erased stage handle.
pub type SharedStage = Arc<dyn Stage>;

type Matcher = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// A closure-backed stage.
///
/// Accepts every query unless a matcher is set.
pub struct FnStage<F>
where
    F: Fn(&str) -> Result<StageResponse, RolechainError> + Send + Sync,
{
    name: String,
    capabilities: Vec<String>,
    matcher: Option<Matcher>,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(&str) -> Result<StageResponse, RolechainError> + Send + Sync,
{
    /// Creates a new function-based stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            capabilities: Vec::new(),
            matcher: None,
            func,
        }
    }

    /// Sets the declared capabilities.
    #[must_use]
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the predicate used by `can_handle`.
    #[must_use]
    pub fn with_matcher(mut self, matcher: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.matcher = Some(Box::new(matcher));
        self
    }
}

impl<F> Debug for FnStage<F>
where
    F: Fn(&str) -> Result<StageResponse, RolechainError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(&str) -> Result<StageResponse, RolechainError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    async fn can_handle(&self, query: &str) -> Result<bool, RolechainError> {
        Ok(self.matcher.as_ref().map_or(true, |matcher| matcher(query)))
    }

    async fn process(&self, query: &str) -> Result<StageResponse, RolechainError> {
        (self.func)(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_stage_defaults_to_accepting() {
        let stage = FnStage::new("echo", |q: &str| Ok(StageResponse::text(q.to_uppercase())));
        assert!(stage.can_handle("anything").await.unwrap());
        assert_eq!(stage.process("hi").await.unwrap(), StageResponse::text("HI"));
        assert!(stage.capabilities().is_empty());
        assert!(stage.as_chain().is_none());
        assert!(stage.as_pipeline().is_none());
    }

    #[tokio::test]
    async fn test_fn_stage_matcher() {
        let stage = FnStage::new("billing", |_: &str| Ok(StageResponse::text("ok")))
            .with_capabilities(["refund", "pricing"])
            .with_matcher(|q| q.contains("refund"));

        assert!(stage.can_handle("when will my refund arrive").await.unwrap());
        assert!(!stage.can_handle("where is my parcel").await.unwrap());
        assert_eq!(stage.capabilities(), ["refund".to_string(), "pricing".to_string()]);
    }

    #[test]
    fn test_fn_stage_debug_hides_closure() {
        let stage = FnStage::new("x", |_: &str| Ok(StageResponse::text("")));
        assert!(format!("{stage:?}").contains("FnStage"));
    }
}
