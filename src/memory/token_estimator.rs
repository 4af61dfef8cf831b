//! Token counting using tiktoken

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tiktoken_rs::{cl100k_base, p50k_base, r50k_base, CoreBPE};

/// Tokenizer failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TokenizationError {
    #[error("Tokenizer initialization failed: {0}")]
    Initialization(String),

    #[error("Failed to tokenize text: {0}")]
    Encode(String),
}

/// Token counter trait for different tokenization strategies
///
/// Implementations must be deterministic: the same text always yields the
/// same count.
pub trait TokenCounter: Send + Sync {
    /// Count the tokens in the given text
    fn count(&self, text: &str) -> Result<usize, TokenizationError>;

    /// Count tokens for multiple texts
    fn count_batch(&self, texts: &[&str]) -> Result<Vec<usize>, TokenizationError> {
        texts.iter().map(|t| self.count(t)).collect()
    }
}

/// BPE encodings shipped with tiktoken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    Cl100kBase,
    P50kBase,
    R50kBase,
}

/// Tiktoken-based counter (cl100k_base by default, GPT-4 / GPT-3.5-turbo)
pub struct TiktokenCounter {
    bpe: Arc<CoreBPE>,
}

impl TiktokenCounter {
    pub fn new(encoding: Encoding) -> Result<Self, TokenizationError> {
        let bpe = match encoding {
            Encoding::Cl100kBase => cl100k_base(),
            Encoding::P50kBase => p50k_base(),
            Encoding::R50kBase => r50k_base(),
        }
        .map_err(|e| TokenizationError::Initialization(e.to_string()))?;

        Ok(Self { bpe: Arc::new(bpe) })
    }

    pub fn cl100k() -> Result<Self, TokenizationError> {
        Self::new(Encoding::Cl100kBase)
    }
}

impl TokenCounter for TiktokenCounter {
    fn count(&self, text: &str) -> Result<usize, TokenizationError> {
        Ok(self.bpe.encode_with_special_tokens(text).len())
    }
}

/// Word-based counter (fallback, ~1.3 tokens per word)
pub struct WordBasedCounter {
    tokens_per_word: f64,
}

impl WordBasedCounter {
    pub fn new(tokens_per_word: f64) -> Self {
        Self { tokens_per_word }
    }
}

impl Default for WordBasedCounter {
    fn default() -> Self {
        Self::new(1.3)
    }
}

impl TokenCounter for WordBasedCounter {
    fn count(&self, text: &str) -> Result<usize, TokenizationError> {
        let word_count = text.split_whitespace().count();
        Ok((word_count as f64 * self.tokens_per_word).ceil() as usize)
    }
}

/// Tokenizer selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TokenizerConfig {
    Tiktoken {
        #[serde(default = "default_encoding")]
        encoding: Encoding,
    },
    Words {
        #[serde(default = "default_tokens_per_word")]
        tokens_per_word: f64,
    },
}

fn default_encoding() -> Encoding {
    Encoding::Cl100kBase
}

fn default_tokens_per_word() -> f64 {
    1.3
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        TokenizerConfig::Tiktoken {
            encoding: default_encoding(),
        }
    }
}

/// Build a counter for the configured tokenizer
pub fn counter_from_config(
    config: &TokenizerConfig,
) -> Result<Arc<dyn TokenCounter>, TokenizationError> {
    let counter: Arc<dyn TokenCounter> = match config {
        TokenizerConfig::Tiktoken { encoding } => Arc::new(TiktokenCounter::new(*encoding)?),
        TokenizerConfig::Words { tokens_per_word } => {
            Arc::new(WordBasedCounter::new(*tokens_per_word))
        }
    };
    Ok(counter)
}
