//! The delegation chain stage.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::transform::{SharedTransform, Transform, TransformOutput};
use crate::core::{StageResponse, StructuredResult};
use crate::errors::RolechainError;
use crate::events::{kinds, noop_sink, SharedEventSink};
use crate::stages::{SharedStage, Stage};

const RESPONSE_KEY: &str = "response";
const BASE_RESPONSE_KEY: &str = "base_response";
const REVISIONS_KEY: &str = "revisions";

/// A stage built by wrapping another stage and augmenting its result.
///
/// `process` runs the base, then each transform in order. A text base result
/// is lifted to `{"response": text}` before the first layer. A degraded base
/// result, or a chain with no transforms, returns the base result unchanged.
///
/// Nesting chains is equivalent to concatenating their transform lists; see
/// [`DelegationChain::flatten`]. The equivalence holds for deterministic
/// transforms only, since model-backed layers can answer differently on
/// every call.
pub struct DelegationChain {
    name: String,
    base: SharedStage,
    transforms: Vec<SharedTransform>,
    events: SharedEventSink,
}

impl std::fmt::Debug for DelegationChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegationChain")
            .field("name", &self.name)
            .field("layers", &self.layers())
            .finish()
    }
}

impl DelegationChain {
    /// Wraps a base stage.
    #[must_use]
    pub fn new(name: impl Into<String>, base: SharedStage) -> Self {
        Self {
            name: name.into(),
            base,
            transforms: Vec::new(),
            events: noop_sink(),
        }
    }

    /// Appends a transform.
    #[must_use]
    pub fn then(mut self, transform: impl Transform + 'static) -> Self {
        self.transforms.push(Arc::new(transform));
        self
    }

    /// Appends an already-shared transform.
    #[must_use]
    pub fn then_shared(mut self, transform: SharedTransform) -> Self {
        self.transforms.push(transform);
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: SharedEventSink) -> Self {
        self.events = events;
        self
    }

    /// Returns the wrapped stage.
    #[must_use]
    pub fn base(&self) -> &SharedStage {
        &self.base
    }

    /// Returns this chain's own transforms.
    #[must_use]
    pub fn transforms(&self) -> &[SharedTransform] {
        &self.transforms
    }

    /// Lists the innermost stage followed by every transform, innermost
    /// first.
    #[must_use]
    pub fn layers(&self) -> Vec<String> {
        let mut layers = match self.base.as_chain() {
            Some(inner) => inner.layers(),
            None => vec![self.base.name().to_string()],
        };
        layers.extend(self.transforms.iter().map(|t| t.name().to_string()));
        layers
    }

    /// Builds the single-level chain equivalent to this one: the innermost
    /// stage with every nested transform in order. Keeps this chain's name
    /// and event sink.
    #[must_use]
    pub fn flatten(&self) -> Self {
        let (base, mut transforms) = match self.base.as_chain() {
            Some(inner) => {
                let flat = inner.flatten();
                (flat.base, flat.transforms)
            }
            None => (Arc::clone(&self.base), Vec::new()),
        };
        transforms.extend(self.transforms.iter().cloned());
        Self {
            name: self.name.clone(),
            base,
            transforms,
            events: Arc::clone(&self.events),
        }
    }

    fn merge(
        &self,
        result: &mut StructuredResult,
        layer: &str,
        output: TransformOutput,
    ) -> Result<(), RolechainError> {
        match output {
            TransformOutput::Annotate { key, value } => {
                if result.contains_key(&key) {
                    return Err(RolechainError::augmentation_conflict(layer, key));
                }
                result.insert(key, value);
            }
            TransformOutput::Revise { response } => {
                if !result.contains_key(BASE_RESPONSE_KEY) {
                    if let Some(original) = result.remove(RESPONSE_KEY) {
                        result.insert(BASE_RESPONSE_KEY.to_string(), original);
                    }
                }
                let revisions = result
                    .entry(REVISIONS_KEY)
                    .or_insert_with(|| serde_json::Value::Array(Vec::new()));
                let Some(revisions) = revisions.as_array_mut() else {
                    return Err(RolechainError::augmentation_conflict(layer, REVISIONS_KEY));
                };
                revisions.push(serde_json::json!({"layer": layer, "response": response}));
                result.insert(RESPONSE_KEY.to_string(), serde_json::Value::String(response));
            }
        }
        Ok(())
    }
}

fn lift(response: StageResponse) -> StructuredResult {
    match response {
        StageResponse::Structured(map) => map,
        StageResponse::Text(text) => {
            let mut map = StructuredResult::new();
            map.insert(RESPONSE_KEY.to_string(), serde_json::Value::String(text));
            map
        }
    }
}

#[async_trait]
impl Stage for DelegationChain {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &[String] {
        self.base.capabilities()
    }

    async fn can_handle(&self, query: &str) -> Result<bool, RolechainError> {
        self.base.can_handle(query).await
    }

    async fn process(&self, query: &str) -> Result<StageResponse, RolechainError> {
        let base = self.base.process(query).await?;
        if base.is_degraded() || self.transforms.is_empty() {
            return Ok(base);
        }

        let mut result = lift(base);
        for transform in &self.transforms {
            let current = StageResponse::Structured(result.clone());
            let output = transform.apply(query, &current).await?;
            let kind = match &output {
                TransformOutput::Annotate { .. } => "annotate",
                TransformOutput::Revise { .. } => "revise",
            };
            self.merge(&mut result, transform.name(), output)?;

            debug!(chain = %self.name, layer = transform.name(), kind, "Layer applied");
            self.events.try_emit(
                kinds::CHAIN_LAYER_APPLIED,
                Some(serde_json::json!({
                    "chain": self.name,
                    "layer": transform.name(),
                    "kind": kind,
                })),
            );
        }
        Ok(StageResponse::Structured(result))
    }

    fn as_chain(&self) -> Option<&DelegationChain> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::FnTransform;
    use crate::stages::FnStage;
    use crate::testing::FixedStage;
    use pretty_assertions::assert_eq;

    fn annotate(key: &'static str, value: serde_json::Value) -> impl Transform {
        FnTransform::new(key, move |_: &str, _: &StageResponse| {
            Ok(TransformOutput::annotate(key, value.clone()))
        })
    }

    fn revise(name: &'static str, text: &'static str) -> impl Transform {
        FnTransform::new(name, move |_: &str, _: &StageResponse| Ok(TransformOutput::revise(text)))
    }

    fn structured_base() -> SharedStage {
        let mut map = StructuredResult::new();
        map.insert("a".to_string(), serde_json::json!(1));
        Arc::new(FixedStage::new("base", StageResponse::Structured(map)))
    }

    #[tokio::test]
    async fn test_annotation_is_additive() {
        let chain = DelegationChain::new("emotional", structured_base())
            .then(annotate("emotion_scores", serde_json::json!({"anger": 0.9})));

        let result = chain.process("q").await.unwrap();
        assert_eq!(
            result.to_value(),
            serde_json::json!({"a": 1, "emotion_scores": {"anger": 0.9}})
        );
    }

    #[tokio::test]
    async fn test_annotation_conflict() {
        let chain = DelegationChain::new("bad", structured_base())
            .then(annotate("a", serde_json::json!(2)));

        let err = chain.process("q").await.unwrap_err();
        assert!(matches!(
            err,
            RolechainError::AugmentationConflict { ref layer, ref key } if layer == "a" && key == "a"
        ));
    }

    #[tokio::test]
    async fn test_text_base_lifted_and_revised() {
        let base: SharedStage = Arc::new(FixedStage::new("kb", StageResponse::text("5 days.")));
        let chain = DelegationChain::new("polite", base)
            .then(revise("first", "Sorry! 5 days."))
            .then(revise("second", "So sorry! 5 days."));

        let result = chain.process("q").await.unwrap();
        assert_eq!(
            result.to_value(),
            serde_json::json!({
                "response": "So sorry! 5 days.",
                "base_response": "5 days.",
                "revisions": [
                    {"layer": "first", "response": "Sorry! 5 days."},
                    {"layer": "second", "response": "So sorry! 5 days."}
                ]
            })
        );
    }

    #[tokio::test]
    async fn test_degraded_base_passes_through() {
        let base: SharedStage = Arc::new(FixedStage::new("s", StageResponse::degraded("oops")));
        let chain = DelegationChain::new("c", base).then(annotate("x", serde_json::json!(1)));
        assert_eq!(chain.process("q").await.unwrap(), StageResponse::degraded("oops"));
    }

    #[tokio::test]
    async fn test_no_transforms_is_identity() {
        let base: SharedStage = Arc::new(FixedStage::new("s", StageResponse::text("plain")));
        let chain = DelegationChain::new("c", base);
        assert_eq!(chain.process("q").await.unwrap(), StageResponse::text("plain"));
    }

    #[tokio::test]
    async fn test_nested_equals_flattened() {
        let inner = DelegationChain::new("inner", structured_base())
            .then(annotate("b", serde_json::json!(2)));
        let outer = DelegationChain::new("outer", Arc::new(inner))
            .then(revise("r", "done"))
            .then(annotate("c", serde_json::json!(3)));
        let flat = outer.flatten();

        assert_eq!(outer.layers(), vec!["base", "b", "r", "c"]);
        assert_eq!(flat.layers(), outer.layers());
        assert_eq!(flat.transforms().len(), 3);
        assert!(flat.base().as_chain().is_none());
        assert_eq!(outer.process("q").await.unwrap(), flat.process("q").await.unwrap());
    }

    #[tokio::test]
    async fn test_delegates_routing_to_base() {
        let base: SharedStage = Arc::new(
            FnStage::new("billing", |_: &str| Ok(StageResponse::text("ok")))
                .with_capabilities(["refund"])
                .with_matcher(|q| q.contains("refund")),
        );
        let chain = DelegationChain::new("wrapped", base);
        assert!(chain.can_handle("refund please").await.unwrap());
        assert!(!chain.can_handle("parcel").await.unwrap());
        assert_eq!(chain.capabilities(), ["refund".to_string()]);
    }
}
