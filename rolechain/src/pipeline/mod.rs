//! Routing pipelines and concurrent fan-out.
//!
//! A [`Pipeline`] holds stages in registration order. Routing asks each stage
//! in turn whether it handles the query and picks the first that says yes;
//! there is no scoring.

mod builder;
mod fanout;
mod router;

pub use builder::{PipelineBuilder, DEFAULT_FALLBACK_MESSAGE};
pub use fanout::{FanOut, FanOutResult};
pub use router::{Pipeline, StageResult};
