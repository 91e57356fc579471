//! Mock invokers and stages for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::core::StageResponse;
use crate::errors::{InvokerError, RolechainError};
use crate::invoker::Invoker;
use crate::stages::Stage;

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Fail(InvokerError),
}

#[derive(Debug, Clone)]
enum Fallback {
    Exhausted,
    Text(String),
    Echo,
}

/// An invoker that replays scripted replies and records every prompt.
///
/// Replies resolve in this order: the first `when_contains` pattern found in
/// the prompt, then the queue of `respond`/`fail_with` entries, then the
/// `otherwise`/`echo` fallback. With nothing left the call fails as
/// unavailable.
#[derive(Debug)]
pub struct ScriptedInvoker {
    patterns: Vec<(String, String)>,
    queue: Mutex<VecDeque<Reply>>,
    fallback: Fallback,
    prompts: Mutex<Vec<String>>,
}

impl Default for ScriptedInvoker {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedInvoker {
    /// Creates an invoker with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self {
            patterns: Vec::new(),
            queue: Mutex::new(VecDeque::new()),
            fallback: Fallback::Exhausted,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Queues a reply.
    #[must_use]
    pub fn respond(self, text: impl Into<String>) -> Self {
        self.queue.lock().push_back(Reply::Text(text.into()));
        self
    }

    /// Queues a failure.
    #[must_use]
    pub fn fail_with(self, error: InvokerError) -> Self {
        self.queue.lock().push_back(Reply::Fail(error));
        self
    }

    /// Answers any prompt containing `pattern` with `reply`, ahead of the
    /// queue.
    #[must_use]
    pub fn when_contains(mut self, pattern: impl Into<String>, reply: impl Into<String>) -> Self {
        self.patterns.push((pattern.into(), reply.into()));
        self
    }

    /// Answers with `text` once the queue is empty.
    #[must_use]
    pub fn otherwise(mut self, text: impl Into<String>) -> Self {
        self.fallback = Fallback::Text(text.into());
        self
    }

    /// Answers with the prompt itself once the queue is empty.
    #[must_use]
    pub fn echo(mut self) -> Self {
        self.fallback = Fallback::Echo;
        self
    }

    /// Returns the number of invocations so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.prompts.lock().len()
    }

    /// Returns every prompt received, in order.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl Invoker for ScriptedInvoker {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn invoke(&self, prompt: &str) -> Result<String, InvokerError> {
        self.prompts.lock().push(prompt.to_string());

        if let Some((_, reply)) = self.patterns.iter().find(|(p, _)| prompt.contains(p.as_str())) {
            return Ok(reply.clone());
        }
        if let Some(reply) = self.queue.lock().pop_front() {
            return match reply {
                Reply::Text(text) => Ok(text),
                Reply::Fail(err) => Err(err),
            };
        }
        match &self.fallback {
            Fallback::Text(text) => Ok(text.clone()),
            Fallback::Echo => Ok(prompt.to_string()),
            Fallback::Exhausted => Err(InvokerError::unavailable("script exhausted")),
        }
    }
}

/// A stage that returns a fixed response and counts its calls.
#[derive(Debug)]
pub struct FixedStage {
    name: String,
    capabilities: Vec<String>,
    response: StageResponse,
    accepts: bool,
    can_handle_calls: AtomicUsize,
    process_calls: AtomicUsize,
}

impl FixedStage {
    /// Creates a stage that accepts every query.
    #[must_use]
    pub fn new(name: impl Into<String>, response: StageResponse) -> Self {
        Self {
            name: name.into(),
            capabilities: Vec::new(),
            response,
            accepts: true,
            can_handle_calls: AtomicUsize::new(0),
            process_calls: AtomicUsize::new(0),
        }
    }

    /// Makes the stage decline every query.
    #[must_use]
    pub fn rejecting(mut self) -> Self {
        self.accepts = false;
        self
    }

    /// Sets the advertised capabilities.
    #[must_use]
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    /// Returns how many times `can_handle` was called.
    #[must_use]
    pub fn can_handle_calls(&self) -> usize {
        self.can_handle_calls.load(Ordering::SeqCst)
    }

    /// Returns how many times `process` was called.
    #[must_use]
    pub fn process_calls(&self) -> usize {
        self.process_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for FixedStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    async fn can_handle(&self, _query: &str) -> Result<bool, RolechainError> {
        self.can_handle_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.accepts)
    }

    async fn process(&self, _query: &str) -> Result<StageResponse, RolechainError> {
        self.process_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.response.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolution_order() {
        let invoker = ScriptedInvoker::new()
            .when_contains("classify", "yes")
            .respond("first")
            .fail_with(InvokerError::rate_limited("slow down"))
            .otherwise("fallback");

        assert_eq!(invoker.invoke("please classify").await.unwrap(), "yes");
        assert_eq!(invoker.invoke("a").await.unwrap(), "first");
        assert!(invoker.invoke("b").await.is_err());
        assert_eq!(invoker.invoke("c").await.unwrap(), "fallback");
        assert_eq!(invoker.call_count(), 4);
        assert_eq!(invoker.prompts()[1], "a");
    }

    #[tokio::test]
    async fn test_exhausted_and_echo() {
        let empty = ScriptedInvoker::new();
        assert!(matches!(
            empty.invoke("x").await,
            Err(InvokerError::Unavailable { .. })
        ));

        let echo = ScriptedInvoker::new().echo();
        assert_eq!(echo.invoke("hello").await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_fixed_stage_counts() {
        let stage = FixedStage::new("s", StageResponse::text("ok")).rejecting();
        assert!(!stage.can_handle("q").await.unwrap());
        assert_eq!(stage.process("q").await.unwrap(), StageResponse::text("ok"));
        assert_eq!(stage.can_handle_calls(), 1);
        assert_eq!(stage.process_calls(), 1);
    }
}
