//! Structured event emission.
//!
//! Pipelines and stages report what they did to an injected [`EventSink`].
//! There is no process-wide sink: whoever builds the pipeline decides where
//! events go, and the default discards them.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, SharedEventSink};

/// Event type names.
pub mod kinds {
    /// A stage claimed the query.
    pub const PIPELINE_ROUTED: &str = "pipeline.routed";
    /// No stage claimed the query.
    pub const PIPELINE_UNHANDLED: &str = "pipeline.unhandled";
    /// A structured attempt produced unusable text.
    pub const STAGE_ATTEMPT_FAILED: &str = "stage.attempt_failed";
    /// A structured stage ran out of attempts.
    pub const STAGE_DEGRADED: &str = "stage.degraded";
    /// A stage produced a usable response.
    pub const STAGE_COMPLETED: &str = "stage.completed";
    /// A delegation layer augmented a result.
    pub const CHAIN_LAYER_APPLIED: &str = "chain.layer_applied";
}

/// Returns the default sink, which discards everything.
#[must_use]
pub fn noop_sink() -> SharedEventSink {
    std::sync::Arc::new(NoOpEventSink)
}
