//! Core domain model types for rolechain.
//!
//! This module contains the values that flow between stages:
//! - Stage responses (structured or text) and the degraded error payload
//! - Caller-facing run outcomes and their status
//! - Ephemeral invocation attempt records

mod attempt;
mod output;
mod status;

pub use attempt::{AttemptOutcome, InvocationAttempt};
pub use output::{RunOutcome, StageResponse, StructuredResult, DEGRADED_ERROR};
pub use status::RunStatus;
