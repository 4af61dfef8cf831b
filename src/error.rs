//! Error types for session memory

use crate::memory::token_estimator::TokenizationError;
use thiserror::Error;

/// Errors surfaced by [`crate::memory::SessionMemory`]
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Invalid session '{session_id}': {reason}")]
    InvalidSession { session_id: String, reason: String },

    #[error("Tokenization failed: {0}")]
    Tokenization(#[from] TokenizationError),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl MemoryError {
    pub fn invalid_session(session_id: &str, reason: impl Into<String>) -> Self {
        Self::InvalidSession {
            session_id: session_id.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<config::ConfigError> for MemoryError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;
