//! Event sink trait and implementations.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, Level};

/// Receives events from pipelines, stages and chains.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event.
    ///
    /// * `event_type` - one of the names in [`kinds`](super::kinds)
    /// * `data` - optional payload
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>);

    /// Emits without awaiting. Must never panic.
    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>);
}

/// A shared sink handle.
pub type SharedEventSink = Arc<dyn EventSink>;

/// Discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event_type: &str, _data: Option<serde_json::Value>) {}

    fn try_emit(&self, _event_type: &str, _data: Option<serde_json::Value>) {}
}

/// Forwards events to `tracing` at a fixed level.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a logging sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event_type: &str, data: Option<&serde_json::Value>) {
        let payload = data.map(ToString::to_string).unwrap_or_default();
        if self.level == Level::DEBUG {
            debug!(event_type, event_data = %payload, "Event: {event_type}");
        } else {
            info!(event_type, event_data = %payload, "Event: {event_type}");
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.log_event(event_type, data.as_ref());
    }

    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.log_event(event_type, data.as_ref());
    }
}

/// Records events in memory, for tests and diagnostics.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<(String, Option<serde_json::Value>)>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<(String, Option<serde_json::Value>)> {
        self.events.read().clone()
    }

    /// Returns the collected event names, in order.
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        self.events.read().iter().map(|(t, _)| t.clone()).collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns events matching a type prefix.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<(String, Option<serde_json::Value>)> {
        self.events
            .read()
            .iter()
            .filter(|(t, _)| t.starts_with(type_prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.try_emit(event_type, data);
    }

    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.events.write().push((event_type.to_string(), data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::kinds;

    #[tokio::test]
    async fn test_logging_sink_accepts_payloads() {
        let sink = LoggingEventSink::debug();
        sink.emit(kinds::STAGE_COMPLETED, Some(serde_json::json!({"stage": "billing"})))
            .await;
        sink.try_emit(kinds::PIPELINE_UNHANDLED, None);
    }

    #[tokio::test]
    async fn test_collecting_sink_order() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit(kinds::PIPELINE_ROUTED, None).await;
        sink.try_emit(kinds::STAGE_COMPLETED, Some(serde_json::json!({"stage": "billing"})));

        assert_eq!(sink.len(), 2);
        assert_eq!(
            sink.event_types(),
            vec![kinds::PIPELINE_ROUTED.to_string(), kinds::STAGE_COMPLETED.to_string()]
        );
    }

    #[tokio::test]
    async fn test_collecting_sink_filter_and_clear() {
        let sink = CollectingEventSink::new();
        sink.emit(kinds::STAGE_ATTEMPT_FAILED, None).await;
        sink.emit(kinds::STAGE_DEGRADED, None).await;
        sink.emit(kinds::CHAIN_LAYER_APPLIED, None).await;

        assert_eq!(sink.events_of_type("stage.").len(), 2);
        assert_eq!(sink.events_of_type("chain.").len(), 1);

        sink.clear();
        assert!(sink.is_empty());
    }
}
