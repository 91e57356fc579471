//! Configuration types.
//!
//! Everything has a serde default so partial JSON documents load cleanly.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::RolechainError;
use crate::parsing::ParserConfig;
use crate::retry::RetryConfig;

/// Connection settings for an OpenAI-compatible invoker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokerConfig {
    /// API base URL, without the `/chat/completions` suffix.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Bearer token. Empty means no `Authorization` header.
    #[serde(default)]
    pub api_key: String,
    /// Model identifier.
    #[serde(default = "default_model")]
    pub model: String,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: f64,
    /// Sampling temperature; endpoint default when absent.
    #[serde(default)]
    pub temperature: Option<f32>,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_timeout() -> f64 {
    60.0
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            model: default_model(),
            timeout_seconds: default_timeout(),
            temperature: None,
        }
    }
}

impl InvokerConfig {
    /// Creates a config for the given endpoint.
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            ..Self::default()
        }
    }

    /// Reads `OPENAI_API_BASE`, `OPENAI_API_KEY`, `ROLECHAIN_MODEL` and
    /// `ROLECHAIN_TIMEOUT_SECONDS`, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(base_url) = std::env::var("OPENAI_API_BASE") {
            config.base_url = base_url;
        }
        if let Ok(api_key) = std::env::var("OPENAI_API_KEY") {
            config.api_key = api_key;
        }
        if let Ok(model) = std::env::var("ROLECHAIN_MODEL") {
            config.model = model;
        }
        if let Some(seconds) = std::env::var("ROLECHAIN_TIMEOUT_SECONDS")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|s| Duration::try_from_secs_f64(*s).is_ok_and(|d| !d.is_zero()))
        {
            config.timeout_seconds = seconds;
        }
        config
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout_seconds(mut self, seconds: f64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Gets timeout as Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        match Duration::try_from_secs_f64(self.timeout_seconds) {
            Ok(timeout) if !timeout.is_zero() => timeout,
            _ => Duration::from_secs_f64(default_timeout()),
        }
    }
}

/// Top-level configuration document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RolechainConfig {
    /// Invoker connection settings.
    #[serde(default)]
    pub invoker: InvokerConfig,
    /// Structured output retry policy.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Parser normalization policy.
    #[serde(default)]
    pub parser: ParserConfig,
}

impl RolechainConfig {
    /// Loads a config from a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`RolechainError::Config`] if the document is invalid.
    pub fn from_json_str(json: &str) -> Result<Self, RolechainError> {
        serde_json::from_str(json).map_err(|e| RolechainError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsing::NewlinePolicy;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_invoker_config_defaults() {
        let config = InvokerConfig::default();
        assert_eq!(config.timeout(), Duration::from_secs(60));
        assert!(config.api_key.is_empty());
        assert!(config.temperature.is_none());
    }

    #[test]
    fn test_invoker_config_builder() {
        let config = InvokerConfig::new("http://localhost:8000/v1", "sk", "local")
            .with_timeout_seconds(2.5)
            .with_temperature(0.2);
        assert_eq!(config.timeout(), Duration::from_millis(2500));
        assert_eq!(config.temperature, Some(0.2));
        assert_eq!(config.model, "local");
    }

    #[test]
    fn test_invalid_timeout_falls_back() {
        let config = InvokerConfig::default().with_timeout_seconds(-1.0);
        assert_eq!(config.timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_huge_timeout_falls_back() {
        let config = InvokerConfig::default().with_timeout_seconds(1e30);
        assert_eq!(config.timeout(), Duration::from_secs(60));

        let config = RolechainConfig::from_json_str(r#"{"invoker": {"timeout_seconds": 1e30}}"#)
            .unwrap();
        assert_eq!(config.invoker.timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_from_json_partial() {
        let config = RolechainConfig::from_json_str(
            r#"{"invoker": {"model": "kimi"}, "retry": {"base_delay_ms": 0}, "parser": {"newlines": "keep"}}"#,
        )
        .unwrap();
        assert_eq!(config.invoker.model, "kimi");
        assert_eq!(config.invoker.base_url, default_base_url());
        assert_eq!(config.retry.base_delay_ms, 0);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.parser.newlines, NewlinePolicy::Keep);
    }

    #[test]
    fn test_from_json_empty() {
        assert_eq!(RolechainConfig::from_json_str("{}").unwrap(), RolechainConfig::default());
    }

    #[test]
    fn test_from_json_invalid() {
        let err = RolechainConfig::from_json_str("{\"retry\": 3}").unwrap_err();
        assert!(matches!(err, RolechainError::Config(_)));
    }
}
