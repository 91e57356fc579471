//! # Rolechain
//!
//! Composable LLM-backed role stages.
//!
//! Rolechain provides building blocks for assistants made of specialised
//! roles, with support for:
//!
//! - **Robust structured output**: fence stripping, newline handling, key
//!   validation and bounded retries that degrade to an error payload
//! - **Capability stages**: model-backed stages that decide whether they can
//!   handle a query, and answer it
//! - **Routing pipelines**: first-match dispatch with a fallback message
//! - **Delegation chains**: wrap any stage and augment its result layer by
//!   layer, where nesting is equivalent to flattening
//! - **Knowledge stages**: answer from a self-updating knowledge base
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rolechain::prelude::*;
//! use std::sync::Arc;
//!
//! let invoker: SharedInvoker = Arc::new(OpenAiInvoker::from_env()?);
//!
//! let billing = Arc::new(LlmStage::new("billing", ["refund", "invoice"], invoker.clone()));
//! let shipping = Arc::new(LlmStage::new("shipping", ["delivery", "tracking"], invoker.clone()));
//! let emotional = DelegationChain::new("billing+emotion", billing)
//!     .then(LlmTransform::emotion_scores(invoker.clone()));
//!
//! let pipeline = PipelineBuilder::new("support")
//!     .stage(Arc::new(emotional))
//!     .stage(shipping)
//!     .build()?;
//!
//! match pipeline.run("When will my refund arrive?").await? {
//!     RunOutcome::Handled { stage_name, response } => println!("{stage_name}: {}", response.render()),
//!     RunOutcome::Unhandled { message } => println!("{message}"),
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod analysis;
pub mod chain;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod invoker;
pub mod observability;
pub mod parsing;
pub mod pipeline;
pub mod prompt;
pub mod retry;
pub mod stages;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::analysis::InteractionAnalyzer;
    pub use crate::chain::{
        DelegationChain, FnTransform, LlmTransform, SharedTransform, Transform, TransformOutput,
    };
    pub use crate::config::{InvokerConfig, RolechainConfig};
    pub use crate::core::{RunOutcome, RunStatus, StageResponse, StructuredResult};
    pub use crate::errors::{
        InvokerError, ParseError, PipelineValidationError, RolechainError,
    };
    pub use crate::events::{
        CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, SharedEventSink,
    };
    #[cfg(feature = "openai")]
    pub use crate::invoker::OpenAiInvoker;
    pub use crate::invoker::{Invoker, SharedInvoker, TimeoutInvoker};
    pub use crate::observability::{init_logging, LogFormat};
    pub use crate::parsing::{
        expected_keys, parse_as, ExpectedKeys, NewlinePolicy, ParserConfig,
        StructuredResponseParser,
    };
    pub use crate::pipeline::{FanOut, Pipeline, PipelineBuilder};
    pub use crate::prompt::PromptTemplate;
    pub use crate::retry::{BackoffStrategy, JitterStrategy, RetryConfig};
    pub use crate::stages::{
        ConflictResolver, Edit, FnStage, KnowledgeBase, KnowledgeItem, KnowledgeStage, LlmStage,
        SharedStage, Stage, StructuredSpec, VersionStore,
    };
}
