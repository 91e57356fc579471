//! Bounded re-invocation for structured model output.

use tracing::{debug, error, warn};

use crate::core::{AttemptOutcome, InvocationAttempt, StageResponse, StructuredResult};
use crate::errors::{InvokerError, ParseError};
use crate::events::{kinds, EventSink, NoOpEventSink};
use crate::invoker::Invoker;
use crate::parsing::{ExpectedKeys, StructuredResponseParser};
use crate::retry::{RetryConfig, RetryState};

static NOOP_SINK: NoOpEventSink = NoOpEventSink;

/// Declares that a stage answers with a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructuredSpec {
    /// Keys the object must contain. `None` accepts any object.
    pub expected_keys: Option<ExpectedKeys>,
}

impl StructuredSpec {
    /// Accepts any JSON object.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Requires the given keys.
    #[must_use]
    pub fn with_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            expected_keys: Some(crate::parsing::expected_keys(keys)),
        }
    }
}

/// Result of a bounded parse-and-retry loop.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome<T> {
    /// An attempt produced a usable value.
    Parsed {
        /// The parsed value.
        value: T,
        /// Invocations made, including the successful one.
        attempts: usize,
    },
    /// Every attempt was rejected.
    Exhausted {
        /// Text of the last attempt, as received.
        raw: String,
        /// Why the last attempt was rejected.
        error: ParseError,
        /// Invocations made.
        attempts: usize,
    },
}

impl<T> RetryOutcome<T> {
    /// Returns the number of invocations made.
    #[must_use]
    pub fn attempts(&self) -> usize {
        match self {
            Self::Parsed { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    /// Returns the parsed value, if any.
    #[must_use]
    pub fn ok(self) -> Option<T> {
        match self {
            Self::Parsed { value, .. } => Some(value),
            Self::Exhausted { .. } => None,
        }
    }
}

/// Outcome of a structured call that expects a JSON object.
pub type StructuredOutcome = RetryOutcome<StructuredResult>;

impl StructuredOutcome {
    /// Converts to a stage response, degrading to the error payload.
    #[must_use]
    pub fn into_response(self) -> StageResponse {
        match self {
            Self::Parsed { value, .. } => StageResponse::Structured(value),
            Self::Exhausted { raw, .. } => StageResponse::degraded(raw),
        }
    }
}

/// One structured request: invoke, parse, re-invoke on rejection.
///
/// Each attempt is a fresh call to the invoker. Parse failures are retried up
/// to the configured bound; invoker failures are returned immediately.
pub struct StructuredCall<'a> {
    label: &'a str,
    invoker: &'a dyn Invoker,
    parser: &'a StructuredResponseParser,
    retry: &'a RetryConfig,
    events: &'a dyn EventSink,
}

impl<'a> StructuredCall<'a> {
    /// Creates a call. `label` names the caller in logs and events.
    #[must_use]
    pub fn new(
        label: &'a str,
        invoker: &'a dyn Invoker,
        parser: &'a StructuredResponseParser,
        retry: &'a RetryConfig,
    ) -> Self {
        Self {
            label,
            invoker,
            parser,
            retry,
            events: &NOOP_SINK,
        }
    }

    /// Routes attempt events to a sink.
    #[must_use]
    pub fn with_events(mut self, events: &'a dyn EventSink) -> Self {
        self.events = events;
        self
    }

    /// Requests a JSON object with the expected keys.
    ///
    /// # Errors
    ///
    /// Returns the [`InvokerError`] of the first failed invocation.
    pub async fn object(
        &self,
        prompt: &str,
        expected: Option<&ExpectedKeys>,
    ) -> Result<StructuredOutcome, InvokerError> {
        self.run(prompt, |raw| self.parser.parse(raw, expected)).await
    }

    /// Requests any value the `parse` closure accepts.
    ///
    /// # Errors
    ///
    /// Returns the [`InvokerError`] of the first failed invocation.
    pub async fn run<T, F>(&self, prompt: &str, parse: F) -> Result<RetryOutcome<T>, InvokerError>
    where
        F: Fn(&str) -> Result<T, ParseError> + Send + Sync,
        T: Send,
    {
        let max_attempts = self.retry.attempts();
        let mut state = RetryState::new();
        let mut attempt = 1;

        loop {
            let raw = self.invoker.invoke(prompt).await?;

            let rejection = match parse(&raw) {
                Ok(value) => {
                    debug!(label = self.label, attempt, "Structured output parsed");
                    return Ok(RetryOutcome::Parsed {
                        value,
                        attempts: attempt,
                    });
                }
                Err(err) => err,
            };

            let record =
                InvocationAttempt::new(attempt, raw, AttemptOutcome::Rejected(rejection.clone()));
            self.events.try_emit(
                kinds::STAGE_ATTEMPT_FAILED,
                Some(record.to_event_data(self.label, max_attempts)),
            );

            if attempt >= max_attempts {
                error!(
                    label = self.label,
                    attempts = attempt,
                    error = %rejection,
                    "Structured output unusable after all attempts"
                );
                self.events.try_emit(
                    kinds::STAGE_DEGRADED,
                    Some(serde_json::json!({
                        "label": self.label,
                        "attempts": attempt,
                        "error": rejection.kind(),
                    })),
                );
                return Ok(RetryOutcome::Exhausted {
                    raw: record.raw,
                    error: rejection,
                    attempts: attempt,
                });
            }

            let delay = state.next_delay(self.retry);
            warn!(
                label = self.label,
                attempt,
                max_attempts,
                outcome = record.outcome.label(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Rejected structured output, asking again"
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::testing::ScriptedInvoker;
    use pretty_assertions::assert_eq;

    fn retry() -> RetryConfig {
        RetryConfig::immediate()
    }

    #[tokio::test]
    async fn test_first_attempt_parses() {
        let invoker = ScriptedInvoker::new().respond(r#"{"a": 1}"#);
        let parser = StructuredResponseParser::default();
        let retry = retry();

        let outcome = StructuredCall::new("t", &invoker, &parser, &retry)
            .object("prompt", None)
            .await
            .unwrap();

        assert_eq!(outcome.attempts(), 1);
        assert_eq!(invoker.call_count(), 1);
        assert_eq!(outcome.into_response().get("a"), Some(&serde_json::json!(1)));
    }

    #[tokio::test]
    async fn test_recovers_on_second_attempt() {
        let invoker = ScriptedInvoker::new()
            .respond("not json")
            .respond("```json\n{\"a\": 2}\n```");
        let parser = StructuredResponseParser::default();
        let retry = retry();
        let sink = CollectingEventSink::new();

        let outcome = StructuredCall::new("t", &invoker, &parser, &retry)
            .with_events(&sink)
            .object("prompt", None)
            .await
            .unwrap();

        assert_eq!(outcome.attempts(), 2);
        assert_eq!(sink.event_types(), vec![kinds::STAGE_ATTEMPT_FAILED.to_string()]);
    }

    #[tokio::test]
    async fn test_exhaustion_keeps_last_raw() {
        let invoker = ScriptedInvoker::new()
            .respond("first")
            .respond("second")
            .respond("third")
            .respond("{\"never\": \"reached\"}");
        let parser = StructuredResponseParser::default();
        let retry = retry();
        let sink = CollectingEventSink::new();

        let outcome = StructuredCall::new("t", &invoker, &parser, &retry)
            .with_events(&sink)
            .object("prompt", None)
            .await
            .unwrap();

        assert_eq!(invoker.call_count(), 3);
        match outcome {
            RetryOutcome::Exhausted { raw, attempts, .. } => {
                assert_eq!(raw, "third");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(sink.events_of_type(kinds::STAGE_ATTEMPT_FAILED).len(), 3);
        assert_eq!(sink.events_of_type(kinds::STAGE_DEGRADED).len(), 1);
    }

    #[tokio::test]
    async fn test_schema_mismatch_is_retried() {
        let invoker = ScriptedInvoker::new()
            .respond(r#"{"joy": 0.2}"#)
            .respond(r#"{"joy": 0.2, "anger": 0.7}"#);
        let parser = StructuredResponseParser::default();
        let retry = retry();
        let keys = crate::parsing::expected_keys(["joy", "anger"]);

        let outcome = StructuredCall::new("t", &invoker, &parser, &retry)
            .object("prompt", Some(&keys))
            .await
            .unwrap();
        assert_eq!(outcome.attempts(), 2);
    }

    #[tokio::test]
    async fn test_invoker_error_not_retried() {
        let invoker = ScriptedInvoker::new().fail_with(InvokerError::unavailable("down"));
        let parser = StructuredResponseParser::default();
        let retry = retry();

        let err = StructuredCall::new("t", &invoker, &parser, &retry)
            .object("prompt", None)
            .await
            .unwrap_err();
        assert_eq!(err, InvokerError::unavailable("down"));
        assert_eq!(invoker.call_count(), 1);
    }

    #[tokio::test]
    async fn test_custom_parse_closure() {
        let invoker = ScriptedInvoker::new().respond("[0, 2]");
        let parser = StructuredResponseParser::default();
        let retry = retry();

        let outcome = StructuredCall::new("t", &invoker, &parser, &retry)
            .run("prompt", |raw| parser.parse_typed::<Vec<usize>>(raw))
            .await
            .unwrap();
        assert_eq!(outcome.ok(), Some(vec![0, 2]));
    }

    #[test]
    fn test_structured_spec_keys() {
        let spec = StructuredSpec::with_keys(["b", "a"]);
        let keys: Vec<_> = spec.expected_keys.unwrap().into_iter().collect();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
        assert!(StructuredSpec::any().expected_keys.is_none());
    }
}
