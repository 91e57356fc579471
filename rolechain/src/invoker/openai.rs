//! OpenAI-compatible chat completion invoker.
//!
//! Works with any endpoint that speaks the `/chat/completions` protocol
//! (OpenAI, Moonshot/Kimi, DeepSeek, vLLM, llama.cpp server).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::Invoker;
use crate::config::{InvokerConfig, RolechainConfig};
use crate::errors::InvokerError;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// Invoker backed by an OpenAI-compatible HTTP endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiInvoker {
    client: reqwest::Client,
    config: InvokerConfig,
}

impl OpenAiInvoker {
    /// Creates an invoker from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`InvokerError::Unavailable`] if the HTTP client cannot be built.
    pub fn new(config: InvokerConfig) -> Result<Self, InvokerError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| InvokerError::unavailable(format!("HTTP client error: {e}")))?;
        Ok(Self { client, config })
    }

    /// Creates an invoker from the invoker section of a loaded config.
    pub fn from_config(config: &RolechainConfig) -> Result<Self, InvokerError> {
        Self::new(config.invoker.clone())
    }

    /// Creates an invoker from the `OPENAI_API_BASE`/`OPENAI_API_KEY`
    /// environment.
    pub fn from_env() -> Result<Self, InvokerError> {
        Self::new(InvokerConfig::from_env())
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &InvokerConfig {
        &self.config
    }

    /// Returns the request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.config.timeout()
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn map_transport_error(&self, err: &reqwest::Error, started: Instant) -> InvokerError {
        if err.is_timeout() {
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            InvokerError::timeout(elapsed_ms)
        } else {
            InvokerError::unavailable(format!("Transport error: {err}"))
        }
    }
}

fn map_status(status: reqwest::StatusCode, body: String) -> InvokerError {
    match status.as_u16() {
        401 | 403 => InvokerError::unauthorized(body),
        429 => InvokerError::rate_limited(body),
        code => InvokerError::unavailable(format!("API error {code}: {body}")),
    }
}

#[async_trait]
impl Invoker for OpenAiInvoker {
    fn name(&self) -> &str {
        &self.config.model
    }

    async fn invoke(&self, prompt: &str) -> Result<String, InvokerError> {
        let started = Instant::now();
        let request = ChatRequest {
            model: &self.config.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.config.temperature,
        };

        let mut builder = self.client.post(self.endpoint()).json(&request);
        if !self.config.api_key.is_empty() {
            builder = builder.bearer_auth(&self.config.api_key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| self.map_transport_error(&e, started))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(model = %self.config.model, status = status.as_u16(), "Chat completion rejected");
            return Err(map_status(status, body));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| InvokerError::invalid_response(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| InvokerError::invalid_response("Missing content in response"))?;

        debug!(
            model = %self.config.model,
            latency_ms = started.elapsed().as_millis() as u64,
            chars = content.len(),
            "Chat completion received"
        );
        Ok(content)
    }
}
