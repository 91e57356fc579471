//! Knowledge-backed stage with a self-updating knowledge base.
//!
//! The base is an append-only list of items. The model picks relevant items
//! by index, answers with them, and may propose a new item after each
//! successful answer. Confidence drifts down with age and up with usage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::structured::StructuredCall;
use super::Stage;
use crate::config::RolechainConfig;
use crate::core::{StageResponse, StructuredResult};
use crate::errors::{ParseError, RolechainError};
use crate::events::{kinds, noop_sink, SharedEventSink};
use crate::invoker::SharedInvoker;
use crate::parsing::StructuredResponseParser;
use crate::prompt::{PromptTemplate, CLASSIFY_TEMPLATE};
use crate::retry::RetryConfig;

const RELEVANCE_TEMPLATE: &str = r#"Given the following customer query:
"{query}"

And the following knowledge base items:
{items}

Return the indices of the most relevant knowledge items for this query.
Provide the result as a JSON array of integers."#;

const LEARN_TEMPLATE: &str = r#"Analyze the following customer interaction:

Query: "{query}"
Response: "{response}"

Determine if there's any new information that should be added to the knowledge base.
If so, provide the new knowledge item in the following JSON format:
{"content": "The new information to add", "category": "The appropriate category for this information", "confidence": 0.8}

If no new information should be added, return an empty JSON object {}."#;

const KNOWLEDGE_ANSWER_TEMPLATE: &str = r#"Given the following customer query:
"{query}"

And the following relevant knowledge base items:
{items}

Provide a comprehensive and accurate response to the customer's query.
Incorporate the relevant information from the knowledge base items."#;

const AGE_PENALTY_PER_YEAR: f64 = 0.1;
const USAGE_BONUS: f64 = 0.1;
const USAGE_SATURATION: f64 = 100.0;

/// One fact in the knowledge base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeItem {
    /// The fact itself.
    pub content: String,
    /// Free-text category.
    pub category: String,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Last explicit update.
    pub last_updated: DateTime<Utc>,
    /// Times this item was used in an answer.
    pub usage_count: u64,
}

impl KnowledgeItem {
    /// Creates an item stamped now with zero usage.
    #[must_use]
    pub fn new(content: impl Into<String>, category: impl Into<String>, confidence: f64) -> Self {
        Self {
            content: content.into(),
            category: category.into(),
            confidence: confidence.clamp(0.0, 1.0),
            last_updated: Utc::now(),
            usage_count: 0,
        }
    }

    /// Recomputes confidence as of `now`.
    ///
    /// `confidence - 0.1 * age_years + 0.1 * min(usage / 100, 1)`, clamped to
    /// [0, 1]. Age counts whole days since the last update.
    pub fn refresh_confidence(&mut self, now: DateTime<Utc>) {
        let age_years = (now - self.last_updated).num_days().max(0) as f64 / 365.0;
        let usage_factor = (self.usage_count as f64 / USAGE_SATURATION).min(1.0);
        self.confidence = (self.confidence - AGE_PENALTY_PER_YEAR * age_years
            + USAGE_BONUS * usage_factor)
            .clamp(0.0, 1.0);
    }
}

/// Partial update for [`KnowledgeBase::update_item`]. `None` keeps a field.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct KnowledgeUpdate {
    /// New content; empty strings are ignored.
    pub content: Option<String>,
    /// New category; empty strings are ignored.
    pub category: Option<String>,
    /// New confidence.
    pub confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ProposedItem {
    content: String,
    category: String,
    #[serde(default = "default_confidence")]
    confidence: f64,
}

fn default_confidence() -> f64 {
    1.0
}

/// An append-only, lock-protected list of knowledge items.
///
/// Indices are stable for the lifetime of the base. The lock is never held
/// across an invoker call.
pub struct KnowledgeBase {
    invoker: SharedInvoker,
    parser: StructuredResponseParser,
    retry: RetryConfig,
    events: SharedEventSink,
    items: RwLock<Vec<KnowledgeItem>>,
}

impl std::fmt::Debug for KnowledgeBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeBase")
            .field("invoker", &self.invoker.name())
            .field("items", &self.items.read().len())
            .finish_non_exhaustive()
    }
}

impl KnowledgeBase {
    /// Creates an empty knowledge base.
    #[must_use]
    pub fn new(invoker: SharedInvoker) -> Self {
        Self {
            invoker,
            parser: StructuredResponseParser::default(),
            retry: RetryConfig::default(),
            events: noop_sink(),
            items: RwLock::new(Vec::new()),
        }
    }

    /// Applies the parser and retry sections of a loaded config.
    #[must_use]
    pub fn with_config(mut self, config: &RolechainConfig) -> Self {
        self.parser = StructuredResponseParser::new(config.parser.clone());
        self.with_retry(config.retry.clone())
    }

    /// Sets the retry policy for relevance and learning calls.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: SharedEventSink) -> Self {
        self.events = events;
        self
    }

    /// Appends an item and returns its index.
    pub fn add_item(
        &self,
        content: impl Into<String>,
        category: impl Into<String>,
        confidence: f64,
    ) -> usize {
        let mut items = self.items.write();
        items.push(KnowledgeItem::new(content, category, confidence));
        items.len() - 1
    }

    /// Updates an item in place and restamps it.
    ///
    /// # Errors
    ///
    /// Returns [`RolechainError::Knowledge`] if `index` is out of range.
    pub fn update_item(&self, index: usize, update: KnowledgeUpdate) -> Result<(), RolechainError> {
        let mut items = self.items.write();
        let len = items.len();
        let item = items.get_mut(index).ok_or_else(|| {
            RolechainError::Knowledge(format!("no item at index {index} (size {len})"))
        })?;

        if let Some(content) = update.content.filter(|c| !c.is_empty()) {
            item.content = content;
        }
        if let Some(category) = update.category.filter(|c| !c.is_empty()) {
            item.category = category;
        }
        if let Some(confidence) = update.confidence {
            item.confidence = confidence.clamp(0.0, 1.0);
        }
        item.last_updated = Utc::now();
        Ok(())
    }

    /// Returns a copy of the item at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<KnowledgeItem> {
        self.items.read().get(index).cloned()
    }

    /// Returns a copy of every item.
    #[must_use]
    pub fn items(&self) -> Vec<KnowledgeItem> {
        self.items.read().clone()
    }

    /// Returns the number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    /// Returns true if the base holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Asks the model which items are relevant to the query.
    ///
    /// Out-of-range and duplicate indices are dropped. An empty base is not
    /// sent to the model. If the model never returns a usable index list the
    /// result is empty.
    ///
    /// # Errors
    ///
    /// Fails only if the invoker is unreachable.
    pub async fn relevant_items(
        &self,
        query: &str,
    ) -> Result<Vec<(usize, KnowledgeItem)>, RolechainError> {
        let snapshot = self.items();
        if snapshot.is_empty() {
            return Ok(Vec::new());
        }

        let prompt = PromptTemplate::new(RELEVANCE_TEMPLATE).render(&[
            ("query", query),
            ("items", &serde_json::to_string_pretty(&snapshot)?),
        ])?;

        let call = StructuredCall::new(
            "knowledge.relevance",
            self.invoker.as_ref(),
            &self.parser,
            &self.retry,
        );
        let outcome = call
            .with_events(self.events.as_ref())
            .run(&prompt, |raw| self.parser.parse_typed::<Vec<i64>>(raw))
            .await?;

        let Some(indices) = outcome.ok() else {
            warn!("No usable relevance answer, answering without knowledge items");
            return Ok(Vec::new());
        };

        let mut seen = BTreeSet::new();
        let relevant: Vec<(usize, KnowledgeItem)> = indices
            .into_iter()
            .filter_map(|i| usize::try_from(i).ok())
            .filter(|i| seen.insert(*i))
            .filter_map(|i| snapshot.get(i).cloned().map(|item| (i, item)))
            .collect();
        debug!(query_len = query.len(), relevant = relevant.len(), "Selected knowledge items");
        Ok(relevant)
    }

    /// Asks the model whether the interaction taught anything new, and adds
    /// the proposed item if so. Returns the new item's index.
    ///
    /// # Errors
    ///
    /// Fails only if the invoker is unreachable.
    pub async fn learn_from_interaction(
        &self,
        query: &str,
        response: &str,
    ) -> Result<Option<usize>, RolechainError> {
        let prompt = PromptTemplate::new(LEARN_TEMPLATE)
            .render(&[("query", query), ("response", response)])?;

        let call = StructuredCall::new(
            "knowledge.learn",
            self.invoker.as_ref(),
            &self.parser,
            &self.retry,
        );
        let outcome = call
            .with_events(self.events.as_ref())
            .run(&prompt, |raw| parse_proposal(&self.parser, raw))
            .await?;

        match outcome.ok().flatten() {
            Some(item) => {
                let index = self.add_item(item.content, item.category, item.confidence);
                info!(index, "Learned new knowledge item");
                Ok(Some(index))
            }
            None => Ok(None),
        }
    }

    /// Increments the usage count of each listed item.
    pub fn mark_used(&self, indices: &[usize]) {
        let mut items = self.items.write();
        for &index in indices {
            if let Some(item) = items.get_mut(index) {
                item.usage_count += 1;
            }
        }
    }

    /// Recomputes every item's confidence as of now.
    pub fn update_confidences(&self) {
        self.update_confidences_at(Utc::now());
    }

    /// Recomputes every item's confidence as of `now`.
    pub fn update_confidences_at(&self, now: DateTime<Utc>) {
        for item in self.items.write().iter_mut() {
            item.refresh_confidence(now);
        }
    }
}

/// `{}` means nothing to learn; anything else must name content and category.
fn parse_proposal(
    parser: &StructuredResponseParser,
    raw: &str,
) -> Result<Option<ProposedItem>, ParseError> {
    let map = parser.parse(raw, None)?;
    if map.is_empty() {
        return Ok(None);
    }
    let missing: Vec<String> = ["category", "content"]
        .into_iter()
        .filter(|key| !map.get(*key).is_some_and(serde_json::Value::is_string))
        .map(str::to_string)
        .collect();
    if !missing.is_empty() {
        return Err(ParseError::SchemaMismatch {
            missing,
            value: map,
        });
    }
    serde_json::from_value(serde_json::Value::Object(map))
        .map(Some)
        .map_err(|e| ParseError::malformed(raw, e.to_string()))
}

/// A stage that answers from a shared [`KnowledgeBase`].
///
/// Produces `{"response": text, "knowledge_items_used": n}`. The base is
/// touched only after the answer succeeds: used items are counted, the
/// interaction is offered for learning, and confidences are refreshed.
pub struct KnowledgeStage {
    name: String,
    capabilities: Vec<String>,
    invoker: SharedInvoker,
    knowledge: Arc<KnowledgeBase>,
    classify: PromptTemplate,
    answer: PromptTemplate,
    learn: bool,
    events: SharedEventSink,
}

impl std::fmt::Debug for KnowledgeStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeStage")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .field("knowledge", &self.knowledge)
            .field("learn", &self.learn)
            .finish_non_exhaustive()
    }
}

impl KnowledgeStage {
    /// Creates a knowledge stage. With no capabilities it accepts every
    /// query without asking the model.
    pub fn new<I, S>(
        name: impl Into<String>,
        capabilities: I,
        invoker: SharedInvoker,
        knowledge: Arc<KnowledgeBase>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            invoker,
            knowledge,
            classify: PromptTemplate::new(CLASSIFY_TEMPLATE),
            answer: PromptTemplate::new(KNOWLEDGE_ANSWER_TEMPLATE),
            learn: true,
            events: noop_sink(),
        }
    }

    /// Replaces the answer prompt (`{query}`, `{items}`).
    #[must_use]
    pub fn with_answer_template(mut self, template: impl Into<PromptTemplate>) -> Self {
        self.answer = template.into();
        self
    }

    /// Disables learning from interactions.
    #[must_use]
    pub fn without_learning(mut self) -> Self {
        self.learn = false;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: SharedEventSink) -> Self {
        self.events = events;
        self
    }

    /// Returns the knowledge base.
    #[must_use]
    pub fn knowledge(&self) -> &Arc<KnowledgeBase> {
        &self.knowledge
    }
}

#[async_trait]
impl Stage for KnowledgeStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    async fn can_handle(&self, query: &str) -> Result<bool, RolechainError> {
        if self.capabilities.is_empty() {
            return Ok(true);
        }
        let capabilities = self.capabilities.join(", ");
        let prompt = self
            .classify
            .render(&[("query", query), ("capabilities", &capabilities)])?;
        let reply = self.invoker.invoke(&prompt).await?;
        Ok(super::is_affirmative(&reply))
    }

    async fn process(&self, query: &str) -> Result<StageResponse, RolechainError> {
        let relevant = self.knowledge.relevant_items(query).await?;
        let used: Vec<KnowledgeItem> = relevant.iter().map(|(_, item)| item.clone()).collect();

        let prompt = self.answer.render(&[
            ("query", query),
            ("items", &serde_json::to_string_pretty(&used)?),
        ])?;
        let answer = self.invoker.invoke(&prompt).await?.trim().to_string();

        let indices: Vec<usize> = relevant.iter().map(|(i, _)| *i).collect();
        self.knowledge.mark_used(&indices);
        if self.learn {
            if let Err(err) = self.knowledge.learn_from_interaction(query, &answer).await {
                warn!(stage = %self.name, error = %err, "Learning step failed, keeping answer");
            }
        }
        self.knowledge.update_confidences();

        let mut result = StructuredResult::new();
        result.insert("response".to_string(), serde_json::Value::String(answer));
        result.insert(
            "knowledge_items_used".to_string(),
            serde_json::json!(used.len()),
        );
        self.events.try_emit(
            kinds::STAGE_COMPLETED,
            Some(serde_json::json!({"stage": self.name, "knowledge_items_used": used.len()})),
        );
        Ok(StageResponse::Structured(result))
    }
}
