//! Bounded session memory
//!
//! Holds the live window of each session and condenses its oldest turns into
//! a token-bounded block once the live window outgrows its budget:
//! - `append` adds turns and, unless deferred, flushes when over budget
//! - `flush` moves oldest turns into the condensation block, one at a time
//! - `render` returns the condensation block as one synthetic turn followed
//!   by the live window
//!
//! Writers on the same session are serialized; readers take no lock.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::budget::{MemoryBudget, MemoryConfig};
use super::condensation::CondensedEntry;
use super::models::{BudgetState, FlushMode, FlushReport, MemoryUsage, SessionState, Turn};
use super::render::{render_block, render_turn};
use super::token_estimator::{counter_from_config, TokenCounter};
use crate::config::Config;
use crate::error::{MemoryError, Result};
use crate::metrics::METRICS;
use crate::store::{store_from_config, SessionStore};

/// Token-bounded conversational memory over a pluggable session store
pub struct SessionMemory {
    config: MemoryConfig,
    budget: MemoryBudget,
    counter: Arc<dyn TokenCounter>,
    store: Arc<dyn SessionStore>,
    writers: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionMemory {
    /// Create a new session memory
    pub fn new(
        config: MemoryConfig,
        counter: Arc<dyn TokenCounter>,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self> {
        let budget =
            MemoryBudget::new(&config).map_err(|e| MemoryError::Configuration(e.to_string()))?;

        Ok(Self {
            config,
            budget,
            counter,
            store,
            writers: DashMap::new(),
        })
    }

    /// Build tokenizer and store from application configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let counter = counter_from_config(&config.tokenizer)?;
        let store = store_from_config(&config.store);
        Self::new(config.memory.clone(), counter, store)
    }

    /// Create an empty session under a fresh id
    pub async fn create_session(&self) -> Result<String> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let state = SessionState::new(&session_id, self.budget.condensed_limit());
        self.save(state).await?;
        info!("Created session {}", session_id);
        Ok(session_id)
    }

    /// Append turns, flushing when over budget if `auto_flush` is set
    pub async fn append(&self, session_id: &str, turns: Vec<Turn>) -> Result<FlushReport> {
        let mode = if self.config.auto_flush {
            FlushMode::Auto
        } else {
            FlushMode::Deferred
        };
        self.append_with(session_id, turns, mode).await
    }

    /// Append turns with an explicit flush mode
    pub async fn append_with(
        &self,
        session_id: &str,
        turns: Vec<Turn>,
        mode: FlushMode,
    ) -> Result<FlushReport> {
        validate_session_id(session_id)?;
        let writer = self.writer(session_id);
        let _guard = writer.lock().await;

        let mut state = self.load_or_create(session_id).await?;
        let appended = turns.len();
        state.live.extend(turns);

        let report = match mode {
            FlushMode::Auto => self.flush_state(&mut state)?,
            FlushMode::Deferred => FlushReport::default(),
        };

        state.touch();
        self.save(state).await?;

        METRICS.record_append(appended);
        METRICS.record_flush(&report);
        debug!(
            "Appended {} turns to session {} ({} condensed)",
            appended, session_id, report.turns_condensed
        );

        Ok(report)
    }

    /// Replace the live window, leaving the condensation block untouched
    pub async fn set(&self, session_id: &str, turns: Vec<Turn>) -> Result<FlushReport> {
        validate_session_id(session_id)?;
        let writer = self.writer(session_id);
        let _guard = writer.lock().await;

        let mut state = self.load_or_create(session_id).await?;
        state.live = turns;

        let report = if self.config.auto_flush {
            self.flush_state(&mut state)?
        } else {
            FlushReport::default()
        };

        state.touch();
        self.save(state).await?;
        METRICS.record_flush(&report);

        Ok(report)
    }

    /// Move oldest live turns into the condensation block until within budget
    ///
    /// Flushing an unknown session is a no-op.
    pub async fn flush(&self, session_id: &str) -> Result<FlushReport> {
        validate_session_id(session_id)?;
        if self.load(session_id).await?.is_none() {
            return Ok(FlushReport::default());
        }

        let writer = self.writer(session_id);
        let _guard = writer.lock().await;

        // Removed while waiting for the lock
        let Some((mut state, retrimmed)) = self.load_for_write(session_id).await? else {
            return Ok(FlushReport::default());
        };

        let report = self.flush_state(&mut state)?;
        if report.turns_condensed > 0 || retrimmed > 0 {
            state.touch();
            self.save(state).await?;
        }
        METRICS.record_flush(&report);

        Ok(report)
    }

    /// Effective context: condensation turn (if any) then the live window
    pub async fn render(&self, session_id: &str) -> Result<Vec<Turn>> {
        validate_session_id(session_id)?;
        METRICS.record_render();

        let Some(state) = self.load(session_id).await? else {
            return Ok(Vec::new());
        };

        let mut turns = Vec::with_capacity(state.live.len() + 1);
        if !state.condensed.is_empty() {
            let text = render_block(&self.config.block_name, state.condensed.texts());
            turns.push(Turn::new(self.config.insert_method.role(), text));
        }
        turns.extend(state.live);

        Ok(turns)
    }

    /// Rendered context as plain text, one `role: text` line per turn
    pub async fn render_text(&self, session_id: &str) -> Result<String> {
        let turns = self.render(session_id).await?;
        Ok(turns
            .iter()
            .map(|t| format!("{}: {}", t.role, t.text()))
            .collect::<Vec<_>>()
            .join("\n"))
    }

    /// Clear the live window and the condensation block
    pub async fn reset(&self, session_id: &str) -> Result<()> {
        validate_session_id(session_id)?;
        let writer = self.writer(session_id);
        let _guard = writer.lock().await;

        let mut state = self.load_or_create(session_id).await?;
        state.live.clear();
        state.condensed.clear();
        state.touch();
        self.save(state).await?;

        info!("Reset session {}", session_id);
        Ok(())
    }

    /// Delete a session from the store
    pub async fn remove(&self, session_id: &str) -> Result<bool> {
        validate_session_id(session_id)?;
        let writer = self.writer(session_id);
        let _guard = writer.lock().await;

        let existed = self
            .store
            .remove(session_id)
            .await
            .map_err(|e| MemoryError::invalid_session(session_id, e.to_string()))?;

        // Writers already queued hold their own clone and must keep sharing this lock
        self.writers
            .remove_if(session_id, |_, lock| Arc::strong_count(lock) == 2);

        if existed {
            info!("Removed session {}", session_id);
        }
        Ok(existed)
    }

    /// Full stored state of a session
    pub async fn snapshot(&self, session_id: &str) -> Result<Option<SessionState>> {
        validate_session_id(session_id)?;
        self.load(session_id).await
    }

    /// Token usage of a session; unknown sessions report as empty
    pub async fn usage(&self, session_id: &str) -> Result<MemoryUsage> {
        validate_session_id(session_id)?;
        let state = match self.load(session_id).await? {
            Some(state) => state,
            None => SessionState::new(session_id, self.budget.condensed_limit()),
        };

        let live_tokens = self.live_tokens(&state.live)?;
        let state_label = if self.budget.is_over(live_tokens) {
            BudgetState::OverBudget
        } else {
            BudgetState::UnderBudget
        };

        Ok(MemoryUsage {
            live_turns: state.live.len(),
            live_tokens,
            condensed_entries: state.condensed.len(),
            condensed_tokens: state.condensed.total_tokens(),
            threshold: self.budget.live_threshold(),
            state: state_label,
        })
    }

    pub async fn budget_state(&self, session_id: &str) -> Result<BudgetState> {
        Ok(self.usage(session_id).await?.state)
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn budget(&self) -> &MemoryBudget {
        &self.budget
    }

    /// Render and count every live turn, then condense from the front
    ///
    /// Costs are computed before anything moves so a tokenizer failure leaves
    /// `state` untouched.
    fn flush_state(&self, state: &mut SessionState) -> Result<FlushReport> {
        let mut pending = Vec::with_capacity(state.live.len());
        for turn in &state.live {
            let text = render_turn(turn, &self.config.excluded_aux_keys);
            let tokens = self.counter.count(&text)?;
            pending.push(CondensedEntry::new(text, tokens));
        }

        let mut live_tokens: usize = pending.iter().map(|e| e.tokens).sum();
        METRICS.observe_live_tokens(live_tokens);

        let mut moved = 0;
        while moved < pending.len() && self.budget.is_over(live_tokens) {
            live_tokens -= pending[moved].tokens;
            moved += 1;
        }

        if moved == 0 {
            return Ok(FlushReport {
                live_tokens,
                ..Default::default()
            });
        }

        state.live.drain(..moved);
        let mut evicted = 0;
        for entry in pending.into_iter().take(moved) {
            evicted += state.condensed.push(entry).len();
        }

        debug!(
            "Flushed session {}: {} turns condensed, {} entries evicted, {} live tokens left",
            state.session_id, moved, evicted, live_tokens
        );

        Ok(FlushReport {
            turns_condensed: moved,
            entries_evicted: evicted,
            live_tokens,
        })
    }

    fn live_tokens(&self, turns: &[Turn]) -> Result<usize> {
        let mut total = 0;
        for turn in turns {
            total += self
                .counter
                .count(&render_turn(turn, &self.config.excluded_aux_keys))?;
        }
        Ok(total)
    }

    fn writer(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.writers
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionState>> {
        self.store
            .get(session_id)
            .await
            .map_err(|e| MemoryError::invalid_session(session_id, e.to_string()))
    }

    /// Load a session for writing, re-applying the configured condensation budget
    ///
    /// The stored block may carry the limit of whichever memory last wrote it.
    /// Returns the state and the number of entries evicted by the re-trim.
    async fn load_for_write(&self, session_id: &str) -> Result<Option<(SessionState, usize)>> {
        let Some(mut state) = self.load(session_id).await? else {
            return Ok(None);
        };

        let evicted = state
            .condensed
            .set_token_limit(self.budget.condensed_limit())
            .len();
        if evicted > 0 {
            debug!(
                "Re-trimmed session {} to {} condensed tokens ({} entries evicted)",
                session_id,
                self.budget.condensed_limit(),
                evicted
            );
            METRICS.condensation_evictions.inc_by(evicted as f64);
        }

        Ok(Some((state, evicted)))
    }

    async fn load_or_create(&self, session_id: &str) -> Result<SessionState> {
        match self.load_for_write(session_id).await? {
            Some((state, _)) => Ok(state),
            None => {
                debug!("Creating session {} on first use", session_id);
                Ok(SessionState::new(session_id, self.budget.condensed_limit()))
            }
        }
    }

    async fn save(&self, state: SessionState) -> Result<()> {
        let session_id = state.session_id.clone();
        self.store
            .put(&session_id, state)
            .await
            .map_err(|e| MemoryError::invalid_session(&session_id, e.to_string()))
    }
}

fn validate_session_id(session_id: &str) -> Result<()> {
    if session_id.trim().is_empty() {
        return Err(MemoryError::invalid_session(session_id, "session id must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::token_estimator::{TokenizationError, WordBasedCounter};
    use crate::store::{InMemoryStore, StoreError};
    use async_trait::async_trait;
    use std::time::Duration;

    fn memory(token_limit: usize, ratio: f64) -> SessionMemory {
        let config = MemoryConfig {
            token_limit,
            chat_history_token_ratio: ratio,
            ..Default::default()
        };
        SessionMemory::new(
            config,
            Arc::new(WordBasedCounter::new(1.0)),
            Arc::new(InMemoryStore::new()),
        )
        .unwrap()
    }

    /// Fails on any text containing "boom"
    struct FailingCounter;

    impl TokenCounter for FailingCounter {
        fn count(&self, text: &str) -> std::result::Result<usize, TokenizationError> {
            if text.contains("boom") {
                Err(TokenizationError::Encode("boom".to_string()))
            } else {
                Ok(text.split_whitespace().count())
            }
        }
    }

    /// In-memory store with slow reads and deletes
    #[derive(Default)]
    struct SlowStore {
        inner: InMemoryStore,
    }

    #[async_trait]
    impl SessionStore for SlowStore {
        async fn get(&self, id: &str) -> std::result::Result<Option<SessionState>, StoreError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.inner.get(id).await
        }

        async fn put(&self, id: &str, state: SessionState) -> std::result::Result<(), StoreError> {
            self.inner.put(id, state).await
        }

        async fn remove(&self, id: &str) -> std::result::Result<bool, StoreError> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.inner.remove(id).await
        }

        async fn session_ids(&self) -> std::result::Result<Vec<String>, StoreError> {
            self.inner.session_ids().await
        }
    }

    fn live_texts(state: &SessionState) -> Vec<String> {
        state.live.iter().map(|t| t.text()).collect()
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = MemoryConfig {
            chat_history_token_ratio: 2.0,
            ..Default::default()
        };
        let result = SessionMemory::new(
            config,
            Arc::new(WordBasedCounter::default()),
            Arc::new(InMemoryStore::new()),
        );
        assert!(matches!(result, Err(MemoryError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_empty_session_id_rejected() {
        let memory = memory(100, 0.5);
        let result = memory.append(" ", vec![Turn::user("hi")]).await;
        assert!(matches!(result, Err(MemoryError::InvalidSession { .. })));
    }

    #[tokio::test]
    async fn test_under_budget_keeps_live_window() {
        let memory = memory(1000, 0.7);
        let report = memory
            .append("s", vec![Turn::user("hi"), Turn::assistant("hello")])
            .await
            .unwrap();

        assert_eq!(report.turns_condensed, 0);
        let rendered = memory.render("s").await.unwrap();
        assert_eq!(rendered.len(), 2);
        assert_eq!(rendered[0].text(), "hi");
    }

    #[tokio::test]
    async fn test_flush_moves_oldest_until_within_threshold() {
        // Each rendered turn "<message role=..>w1 w2 w3</message>" counts 4 words
        let memory = memory(100, 0.1);
        let turns = (0..5).map(|i| Turn::user(format!("t{} b c", i))).collect();
        memory.append_with("s", turns, FlushMode::Deferred).await.unwrap();
        assert_eq!(memory.budget_state("s").await.unwrap(), BudgetState::OverBudget);

        let report = memory.flush("s").await.unwrap();
        assert_eq!(report.turns_condensed, 3);
        assert_eq!(report.live_tokens, 8);

        let state = memory.snapshot("s").await.unwrap().unwrap();
        assert_eq!(state.live[0].text(), "t3 b c");
        assert_eq!(state.condensed.len(), 3);
        assert_eq!(memory.budget_state("s").await.unwrap(), BudgetState::UnderBudget);
    }

    #[tokio::test]
    async fn test_tokenizer_failure_leaves_state_untouched() {
        let config = MemoryConfig {
            token_limit: 100,
            chat_history_token_ratio: 0.0,
            ..Default::default()
        };
        let memory = SessionMemory::new(
            config,
            Arc::new(FailingCounter),
            Arc::new(InMemoryStore::new()),
        )
        .unwrap();

        memory
            .append_with("s", vec![Turn::user("fine")], FlushMode::Deferred)
            .await
            .unwrap();

        let result = memory.append("s", vec![Turn::user("boom")]).await;
        assert!(matches!(result, Err(MemoryError::Tokenization(_))));

        let state = memory.snapshot("s").await.unwrap().unwrap();
        assert_eq!(state.live.len(), 1);
        assert!(state.condensed.is_empty());
    }

    #[tokio::test]
    async fn test_flush_unknown_session_is_noop() {
        let memory = memory(100, 0.5);
        let report = memory.flush("missing").await.unwrap();
        assert_eq!(report, FlushReport::default());
        assert!(memory.snapshot("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reset_and_remove() {
        let memory = memory(100, 0.0);
        memory.append("s", vec![Turn::user("hi")]).await.unwrap();
        assert_eq!(memory.render("s").await.unwrap().len(), 1);

        memory.reset("s").await.unwrap();
        assert!(memory.render("s").await.unwrap().is_empty());

        assert!(memory.remove("s").await.unwrap());
        assert!(!memory.remove("s").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_replaces_live_window() {
        let memory = memory(1000, 0.7);
        memory.append("s", vec![Turn::user("one")]).await.unwrap();
        memory
            .set("s", vec![Turn::user("two"), Turn::assistant("three")])
            .await
            .unwrap();

        let texts: Vec<_> = memory
            .render("s")
            .await
            .unwrap()
            .iter()
            .map(|t| t.text())
            .collect();
        assert_eq!(texts, vec!["two", "three"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_remove_keeps_writers_serialized() {
        let memory = Arc::new(
            SessionMemory::new(
                MemoryConfig::default(),
                Arc::new(WordBasedCounter::new(1.0)),
                Arc::new(SlowStore::default()),
            )
            .unwrap(),
        );
        memory.append("s", vec![Turn::user("A")]).await.unwrap();

        let remover = {
            let memory = memory.clone();
            tokio::spawn(async move { memory.remove("s").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Queues behind the remove on the same lock
        let first = {
            let memory = memory.clone();
            tokio::spawn(async move { memory.append("s", vec![Turn::user("B")]).await })
        };
        assert!(remover.await.unwrap().unwrap());

        // Arrives while "B" is mid read-modify-write
        let second = {
            let memory = memory.clone();
            tokio::spawn(async move { memory.append("s", vec![Turn::user("C")]).await })
        };
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        let state = memory.snapshot("s").await.unwrap().unwrap();
        assert_eq!(live_texts(&state), vec!["B", "C"]);
    }

    #[tokio::test]
    async fn test_remove_drops_idle_writer_lock() {
        let memory = memory(100, 0.5);
        memory.append("s", vec![Turn::user("hi")]).await.unwrap();
        assert!(memory.writers.contains_key("s"));

        memory.remove("s").await.unwrap();
        assert!(!memory.writers.contains_key("s"));
    }

    #[tokio::test]
    async fn test_flush_unknown_session_allocates_no_lock() {
        let memory = memory(100, 0.5);
        for i in 0..10 {
            memory.flush(&format!("ghost-{}", i)).await.unwrap();
        }
        assert!(memory.writers.is_empty());
    }

    #[tokio::test]
    async fn test_shared_store_uses_configured_condensed_budget() {
        let store: Arc<dyn SessionStore> = Arc::new(InMemoryStore::new());
        let counter: Arc<dyn TokenCounter> = Arc::new(WordBasedCounter::new(1.0));

        let roomy = SessionMemory::new(
            MemoryConfig {
                token_limit: 1000,
                chat_history_token_ratio: 0.0,
                ..Default::default()
            },
            counter.clone(),
            store.clone(),
        )
        .unwrap();
        let tight = SessionMemory::new(
            MemoryConfig {
                token_limit: 20,
                chat_history_token_ratio: 0.0,
                ..Default::default()
            },
            counter,
            store,
        )
        .unwrap();

        let seed = (0..10).map(|i| Turn::user(format!("seed {} b c", i))).collect();
        roomy.append("s", seed).await.unwrap();
        assert!(roomy.usage("s").await.unwrap().condensed_tokens > 20);

        // An explicit flush with nothing live still re-applies the budget
        tight.flush("s").await.unwrap();
        let state = tight.snapshot("s").await.unwrap().unwrap();
        assert_eq!(state.condensed.token_limit(), 20);
        assert!(state.condensed.total_tokens() <= 20);

        for i in 0..20 {
            tight
                .append("s", vec![Turn::user(format!("turn {} b c", i))])
                .await
                .unwrap();
            let usage = tight.usage("s").await.unwrap();
            assert!(usage.condensed_tokens <= 20);
        }
    }

    #[tokio::test]
    async fn test_create_session() {
        let memory = memory(100, 0.5);
        let id = memory.create_session().await.unwrap();
        let state = memory.snapshot(&id).await.unwrap().unwrap();
        assert!(state.live.is_empty());
        assert_eq!(state.condensed.token_limit(), 100);
    }
}
