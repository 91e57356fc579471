//! Normalization and parsing of raw model text into structured results.

use crate::core::StructuredResult;
use crate::errors::ParseError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// The set of keys a structured result must contain.
pub type ExpectedKeys = BTreeSet<String>;

/// Builds an [`ExpectedKeys`] set from string-like items.
pub fn expected_keys<I, S>(keys: I) -> ExpectedKeys
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    keys.into_iter().map(Into::into).collect()
}

static WRAPPING_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\A```(?i:json)?[ \t]*\r?\n?(.*?)\r?\n?[ \t]*```\z")
        .expect("wrapping fence pattern is valid")
});

static EMBEDDED_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?i:json)?[ \t]*\r?\n?(.*?)```").expect("embedded fence pattern is valid")
});

static NEWLINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\r\n]+").expect("newline pattern is valid"));

/// How embedded newlines are treated before parsing.
///
/// Models frequently emit literal newlines inside JSON string values, which
/// strict JSON rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NewlinePolicy {
    /// Leave newlines untouched.
    Keep,
    /// Delete every newline.
    Remove,
    /// Replace each run of newlines with a single space.
    #[default]
    Collapse,
}

/// Configuration for [`StructuredResponseParser`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParserConfig {
    /// Strip markdown code fences around (or inside) the text.
    #[serde(default = "default_strip_fences")]
    pub strip_fences: bool,
    /// Newline handling.
    #[serde(default)]
    pub newlines: NewlinePolicy,
}

fn default_strip_fences() -> bool {
    true
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            strip_fences: default_strip_fences(),
            newlines: NewlinePolicy::default(),
        }
    }
}

impl ParserConfig {
    /// Creates a new config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets fence stripping.
    #[must_use]
    pub fn with_strip_fences(mut self, strip: bool) -> Self {
        self.strip_fences = strip;
        self
    }

    /// Sets the newline policy.
    #[must_use]
    pub fn with_newlines(mut self, policy: NewlinePolicy) -> Self {
        self.newlines = policy;
        self
    }
}

/// Parses untrusted model text into a [`StructuredResult`].
///
/// The parser never retries; a failed parse is returned to the caller, which
/// decides whether to ask the model again.
#[derive(Debug, Clone, Default)]
pub struct StructuredResponseParser {
    config: ParserConfig,
}

impl StructuredResponseParser {
    /// Creates a parser with the given config.
    #[must_use]
    pub fn new(config: ParserConfig) -> Self {
        Self { config }
    }

    /// Returns the parser config.
    #[must_use]
    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Applies the normalization policy: trim, unwrap fences, handle newlines.
    ///
    /// A fence embedded in surrounding prose is only extracted when the text
    /// is not already valid JSON, so fences quoted inside string values
    /// survive.
    #[must_use]
    pub fn normalize(&self, raw: &str) -> String {
        let mut text = raw.trim();

        if self.config.strip_fences {
            if let Some(inner) = WRAPPING_FENCE.captures(text).and_then(|c| c.get(1)) {
                text = inner.as_str().trim();
            }
        }

        let candidate = self.apply_newlines(text);
        if !self.config.strip_fences || is_json(&candidate) {
            return candidate;
        }

        match EMBEDDED_FENCE.captures(text).and_then(|c| c.get(1)) {
            Some(inner) => self.apply_newlines(inner.as_str().trim()),
            None => candidate,
        }
    }

    fn apply_newlines(&self, text: &str) -> String {
        match self.config.newlines {
            NewlinePolicy::Keep => text.to_string(),
            NewlinePolicy::Remove => NEWLINES.replace_all(text, "").trim().to_string(),
            NewlinePolicy::Collapse => NEWLINES.replace_all(text, " ").trim().to_string(),
        }
    }

    /// Parses normalized text into any JSON value.
    pub fn parse_value(&self, raw: &str) -> Result<serde_json::Value, ParseError> {
        let normalized = self.normalize(raw);
        serde_json::from_str(&normalized).map_err(|e| ParseError::malformed(raw, e.to_string()))
    }

    /// Parses normalized text straight into a typed value.
    ///
    /// Both syntax errors and shape errors are [`ParseError::MalformedOutput`].
    pub fn parse_typed<T: serde::de::DeserializeOwned>(&self, raw: &str) -> Result<T, ParseError> {
        let value = self.parse_value(raw)?;
        serde_json::from_value(value).map_err(|e| ParseError::malformed(raw, e.to_string()))
    }

    /// Parses text into a JSON object and checks the expected keys.
    ///
    /// # Errors
    ///
    /// - [`ParseError::MalformedOutput`] if the text is not a JSON object.
    /// - [`ParseError::SchemaMismatch`] if any expected key is missing.
    pub fn parse(
        &self,
        raw: &str,
        expected: Option<&ExpectedKeys>,
    ) -> Result<StructuredResult, ParseError> {
        let map = match self.parse_value(raw)? {
            serde_json::Value::Object(map) => map,
            other => {
                return Err(ParseError::malformed(
                    raw,
                    format!("expected a JSON object, got {}", json_kind(&other)),
                ))
            }
        };

        if let Some(keys) = expected {
            let missing: Vec<String> = keys
                .iter()
                .filter(|key| !map.contains_key(key.as_str()))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(ParseError::SchemaMismatch {
                    missing,
                    value: map,
                });
            }
        }

        Ok(map)
    }
}

fn is_json(text: &str) -> bool {
    serde_json::from_str::<serde::de::IgnoredAny>(text).is_ok()
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parser() -> StructuredResponseParser {
        StructuredResponseParser::default()
    }

    #[test]
    fn test_plain_object() {
        let map = parser().parse(r#"{"a": 1, "b": "two"}"#, None).unwrap();
        assert_eq!(map.get("a"), Some(&serde_json::json!(1)));
        assert_eq!(map.get("b"), Some(&serde_json::json!("two")));
    }

    #[test]
    fn test_fenced_matches_unfenced() {
        let bare = r#"{"joy": 0.1, "anger": 0.8}"#;
        let inputs = [
            format!("```json\n{bare}\n```"),
            format!("```JSON\n{bare}\n```"),
            format!("```\n{bare}\n```"),
            format!("  ```json {bare}```  "),
            format!("\n\n```json\n{bare}\n```\n"),
        ];

        let expected = parser().parse(bare, None).unwrap();
        for input in &inputs {
            assert_eq!(parser().parse(input, None).unwrap(), expected, "input: {input:?}");
        }
    }

    #[test]
    fn test_embedded_fence() {
        let text = "Here is the analysis:\n```json\n{\"score\": 70}\n```\nLet me know!";
        let map = parser().parse(text, None).unwrap();
        assert_eq!(map.get("score"), Some(&serde_json::json!(70)));
    }

    #[test]
    fn test_fence_inside_string_value_is_kept() {
        let text = r#"{"answer": "Wrap it like ```json {\"a\":1}``` please"}"#;
        let map = parser().parse(text, None).unwrap();
        assert_eq!(
            map.get("answer"),
            Some(&serde_json::json!(r#"Wrap it like ```json {"a":1}``` please"#))
        );

        let fenced = format!("```json\n{text}\n```");
        assert_eq!(parser().parse(&fenced, None).unwrap(), map);
    }

    #[test]
    fn test_newline_in_string_value() {
        let text = "{\"summary\": \"line one\nline two\"}";
        let map = parser().parse(text, None).unwrap();
        assert_eq!(map.get("summary"), Some(&serde_json::json!("line one line two")));

        let remove = StructuredResponseParser::new(
            ParserConfig::new().with_newlines(NewlinePolicy::Remove),
        );
        let map = remove.parse(text, None).unwrap();
        assert_eq!(map.get("summary"), Some(&serde_json::json!("line oneline two")));

        let keep = StructuredResponseParser::new(
            ParserConfig::new().with_newlines(NewlinePolicy::Keep),
        );
        assert!(matches!(
            keep.parse(text, None),
            Err(ParseError::MalformedOutput { .. })
        ));
    }

    #[test]
    fn test_fences_kept_when_disabled() {
        let strict = StructuredResponseParser::new(ParserConfig::new().with_strip_fences(false));
        let err = strict.parse("```json\n{}\n```", None).unwrap_err();
        assert_eq!(err.kind(), "malformed_output");
    }

    #[test]
    fn test_non_json_is_malformed() {
        let err = parser().parse("I'm sorry, I can't do that.", None).unwrap_err();
        match err {
            ParseError::MalformedOutput { raw, .. } => {
                assert_eq!(raw, "I'm sorry, I can't do that.");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_non_object_is_malformed() {
        let err = parser().parse("[1, 2, 3]", None).unwrap_err();
        assert!(err.to_string().contains("an array"));
    }

    #[test]
    fn test_missing_keys_is_schema_mismatch() {
        let keys = expected_keys(["approach", "confidence", "findings"]);
        let err = parser()
            .parse(r#"{"approach": "survey"}"#, Some(&keys))
            .unwrap_err();

        match err {
            ParseError::SchemaMismatch { missing, value } => {
                assert_eq!(missing, vec!["confidence".to_string(), "findings".to_string()]);
                assert_eq!(value.get("approach"), Some(&serde_json::json!("survey")));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_expected_keys_present() {
        let keys = expected_keys(["a"]);
        let map = parser().parse(r#"{"a": null, "extra": true}"#, Some(&keys)).unwrap();
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_parse_value_array() {
        let value = parser().parse_value("```json\n[0, 2]\n```").unwrap();
        assert_eq!(value, serde_json::json!([0, 2]));
    }

    #[test]
    fn test_parse_typed() {
        let indices: Vec<usize> = parser().parse_typed("[1, 0]").unwrap();
        assert_eq!(indices, vec![1, 0]);

        let err = parser().parse_typed::<Vec<usize>>(r#"{"a": 1}"#).unwrap_err();
        assert_eq!(err.kind(), "malformed_output");
    }

    #[test]
    fn test_parser_config_deserialize_defaults() {
        let config: ParserConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ParserConfig::default());

        let config: ParserConfig = serde_json::from_str(r#"{"newlines": "remove"}"#).unwrap();
        assert_eq!(config.newlines, NewlinePolicy::Remove);
        assert!(config.strip_fences);
    }
}
