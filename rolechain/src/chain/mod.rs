//! Decorator-style composition of stages.
//!
//! A [`DelegationChain`] wraps one base stage and applies an ordered list of
//! [`Transform`]s to its result. Layers only ever add to the result:
//! annotations go under new keys, and a revised answer keeps the first answer
//! under `base_response`.

mod delegation;
mod transform;

pub use delegation::DelegationChain;
pub use transform::{
    FnTransform, LlmTransform, SharedTransform, Transform, TransformOutput, EMOTION_TEMPLATE,
    PERSONALIZE_TEMPLATE,
};
