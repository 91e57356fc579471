//! Bounded per-stage interaction history.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::core::StageResponse;

/// One successful query/response exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    /// The query as received.
    pub query: String,
    /// The response returned to the caller.
    pub response: StageResponse,
}

/// A ring buffer of recent interactions, oldest evicted first.
#[derive(Debug)]
pub struct InteractionHistory {
    capacity: usize,
    entries: Mutex<VecDeque<Interaction>>,
}

impl InteractionHistory {
    /// Creates a history holding at most `capacity` interactions.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Returns the capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends an interaction, evicting the oldest when full.
    pub fn record(&self, query: impl Into<String>, response: StageResponse) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(Interaction {
            query: query.into(),
            response,
        });
    }

    /// Returns a copy of the recorded interactions, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Interaction> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Returns the number of recorded interactions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drops every recorded interaction.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest() {
        let history = InteractionHistory::new(2);
        history.record("q1", StageResponse::text("a1"));
        history.record("q2", StageResponse::text("a2"));
        history.record("q3", StageResponse::text("a3"));

        let queries: Vec<_> = history.snapshot().into_iter().map(|i| i.query).collect();
        assert_eq!(queries, vec!["q2", "q3"]);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_zero_capacity_records_nothing() {
        let history = InteractionHistory::new(0);
        history.record("q", StageResponse::text("a"));
        assert!(history.is_empty());
    }

    #[test]
    fn test_clear() {
        let history = InteractionHistory::new(4);
        history.record("q", StageResponse::text("a"));
        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.capacity(), 4);
    }
}
