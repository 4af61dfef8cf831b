//! In-process session store

use async_trait::async_trait;
use dashmap::DashMap;

use super::{SessionStore, StoreError};
use crate::memory::SessionState;

/// Session states held in a concurrent map
#[derive(Default)]
pub struct InMemoryStore {
    sessions: DashMap<String, SessionState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn get(&self, session_id: &str) -> Result<Option<SessionState>, StoreError> {
        Ok(self.sessions.get(session_id).map(|s| s.value().clone()))
    }

    async fn put(&self, session_id: &str, state: SessionState) -> Result<(), StoreError> {
        self.sessions.insert(session_id.to_string(), state);
        Ok(())
    }

    async fn remove(&self, session_id: &str) -> Result<bool, StoreError> {
        Ok(self.sessions.remove(session_id).is_some())
    }

    async fn session_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.sessions.iter().map(|e| e.key().clone()).collect())
    }
}
