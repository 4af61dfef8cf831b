//! Byte-level session store using MessagePack encoding
//!
//! Stands in for embedded or networked key-value stores: every state crosses
//! a serialization boundary on put and get.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tracing::debug;

use super::{SessionStore, StoreError};
use crate::memory::SessionState;

#[derive(Default)]
pub struct EncodedStore {
    entries: DashMap<String, Bytes>,
}

impl EncodedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encode(state: &SessionState) -> Result<Bytes, StoreError> {
        rmp_serde::to_vec_named(state)
            .map(Bytes::from)
            .map_err(|e| StoreError::Codec(e.to_string()))
    }

    pub fn decode(raw: &[u8]) -> Result<SessionState, StoreError> {
        rmp_serde::from_slice(raw).map_err(|e| StoreError::Codec(e.to_string()))
    }

    /// Total encoded size of all sessions
    pub fn stored_bytes(&self) -> usize {
        self.entries.iter().map(|e| e.value().len()).sum()
    }
}

#[async_trait]
impl SessionStore for EncodedStore {
    async fn get(&self, session_id: &str) -> Result<Option<SessionState>, StoreError> {
        // Clone the buffer out so no shard lock is held while decoding
        let raw = self.entries.get(session_id).map(|e| e.value().clone());
        raw.map(|bytes| Self::decode(&bytes)).transpose()
    }

    async fn put(&self, session_id: &str, state: SessionState) -> Result<(), StoreError> {
        let bytes = Self::encode(&state)?;
        debug!("Encoded session {}: {} bytes", session_id, bytes.len());
        self.entries.insert(session_id.to_string(), bytes);
        Ok(())
    }

    async fn remove(&self, session_id: &str) -> Result<bool, StoreError> {
        Ok(self.entries.remove(session_id).is_some())
    }

    async fn session_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries.iter().map(|e| e.key().clone()).collect())
    }
}
