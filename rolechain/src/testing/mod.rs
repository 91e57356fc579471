//! Testing utilities for rolechain pipelines.
//!
//! This module provides:
//! - A scripted invoker that replays canned model replies
//! - A fixed-response stage with call tracking
//! - Assertions for run outcomes and degraded responses

mod assertions;
mod mocks;

pub use assertions::{
    assert_degraded, assert_handled, assert_has_key, assert_not_degraded, assert_unhandled,
};
pub use mocks::{FixedStage, ScriptedInvoker};
