//! Token-bounded FIFO of rendered turns

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::warn;

use crate::metrics::METRICS;

/// A rendered turn and its token cost
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CondensedEntry {
    pub text: String,
    pub tokens: usize,
}

impl CondensedEntry {
    pub fn new(text: impl Into<String>, tokens: usize) -> Self {
        Self {
            text: text.into(),
            tokens,
        }
    }
}

/// Condensation block
///
/// Entries are kept in insertion order. After every push the oldest entries
/// are evicted until the total fits `token_limit`; the newest entry is never
/// evicted, so a single oversized entry may exceed the budget on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CondensationBlock {
    entries: VecDeque<CondensedEntry>,
    token_limit: usize,
    total_tokens: usize,
}

impl CondensationBlock {
    pub fn new(token_limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            token_limit,
            total_tokens: 0,
        }
    }

    /// Append an entry and evict from the front until within budget
    ///
    /// Returns the evicted entries, oldest first.
    pub fn push(&mut self, entry: CondensedEntry) -> Vec<CondensedEntry> {
        self.total_tokens += entry.tokens;
        self.entries.push_back(entry);
        self.trim()
    }

    /// Change the budget and evict from the front until within it
    ///
    /// Returns the evicted entries, oldest first.
    pub fn set_token_limit(&mut self, token_limit: usize) -> Vec<CondensedEntry> {
        if token_limit == self.token_limit {
            return Vec::new();
        }
        self.token_limit = token_limit;
        self.trim()
    }

    fn trim(&mut self) -> Vec<CondensedEntry> {
        let mut evicted = Vec::new();
        while self.total_tokens > self.token_limit && self.entries.len() > 1 {
            if let Some(oldest) = self.entries.pop_front() {
                self.total_tokens -= oldest.tokens;
                evicted.push(oldest);
            }
        }

        if self.total_tokens > self.token_limit {
            warn!(
                "Condensed entry exceeds block budget on its own: {} > {} tokens",
                self.total_tokens, self.token_limit
            );
            METRICS.record_oversized_entry();
        }

        evicted
    }

    pub fn entries(&self) -> impl Iterator<Item = &CondensedEntry> {
        self.entries.iter()
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.text.as_str())
    }

    pub fn total_tokens(&self) -> usize {
        self.total_tokens
    }

    pub fn token_limit(&self) -> usize {
        self.token_limit
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.total_tokens = 0;
    }
}
