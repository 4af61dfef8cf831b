//! Pluggable key-value persistence for session state

pub mod encoded;
pub mod in_memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::memory::SessionState;

pub use encoded::EncodedStore;
pub use in_memory::InMemoryStore;

/// Session store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Codec error: {0}")]
    Codec(String),
}

/// Key-value store keyed by session id
///
/// Implementations only need single get/put semantics; the memory layer
/// serializes writers per session.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<Option<SessionState>, StoreError>;

    async fn put(&self, session_id: &str, state: SessionState) -> Result<(), StoreError>;

    /// Delete a session, returning whether it existed
    async fn remove(&self, session_id: &str) -> Result<bool, StoreError>;

    async fn session_ids(&self) -> Result<Vec<String>, StoreError>;
}

/// Store backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Encoded,
}

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,
}

fn default_backend() -> StoreBackend {
    StoreBackend::Memory
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
        }
    }
}

/// Build the configured store
pub fn store_from_config(config: &StoreConfig) -> Arc<dyn SessionStore> {
    match config.backend {
        StoreBackend::Memory => Arc::new(InMemoryStore::new()),
        StoreBackend::Encoded => Arc::new(EncodedStore::new()),
    }
}
