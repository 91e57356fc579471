//! The external text-generation collaborator.
//!
//! Everything the framework needs from a model is `invoke(prompt) -> text`.
//! Invokers are constructed once by the caller and passed down to stages as
//! [`SharedInvoker`] handles.

#[cfg(feature = "openai")]
mod openai;

#[cfg(feature = "openai")]
pub use openai::OpenAiInvoker;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::errors::InvokerError;

/// A text-generation endpoint.
#[async_trait]
pub trait Invoker: Send + Sync {
    /// Returns a short name for logs.
    fn name(&self) -> &str {
        "invoker"
    }

    /// Sends a prompt and returns the model's text.
    ///
    /// # Errors
    ///
    /// Any failure to obtain text is an [`InvokerError`]; unusable text is
    /// not an error at this level.
    async fn invoke(&self, prompt: &str) -> Result<String, InvokerError>;
}

/// A shared, type-erased invoker handle.
pub type SharedInvoker = Arc<dyn Invoker>;

/// Invokes with a deadline, mapping an elapsed deadline to
/// [`InvokerError::Timeout`].
pub async fn invoke_with_timeout(
    invoker: &dyn Invoker,
    prompt: &str,
    timeout: Duration,
) -> Result<String, InvokerError> {
    let started = Instant::now();
    match tokio::time::timeout(timeout, invoker.invoke(prompt)).await {
        Ok(result) => result,
        Err(_) => {
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            tracing::warn!(
                invoker = invoker.name(),
                elapsed_ms,
                "Invoker call timed out"
            );
            Err(InvokerError::timeout(elapsed_ms))
        }
    }
}

/// Wraps an invoker so that every call carries a fixed deadline.
pub struct TimeoutInvoker {
    inner: SharedInvoker,
    timeout: Duration,
}

impl TimeoutInvoker {
    /// Creates a new timeout wrapper.
    #[must_use]
    pub fn new(inner: SharedInvoker, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// Returns the configured deadline.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl std::fmt::Debug for TimeoutInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutInvoker")
            .field("inner", &self.inner.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[async_trait]
impl Invoker for TimeoutInvoker {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn invoke(&self, prompt: &str) -> Result<String, InvokerError> {
        invoke_with_timeout(self.inner.as_ref(), prompt, self.timeout).await
    }
}
