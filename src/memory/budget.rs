//! Token budget for the live window and the condensation block
//!
//! The live window is bounded by `chat_history_token_ratio * token_limit`.
//! Once a flush runs, the oldest turns move into the condensation block, which
//! is bounded by `condensed_token_limit` (or `token_limit` when unset).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::models::InsertMethod;

/// Memory budget configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Token budget of the condensation block, and the base of the live threshold
    #[serde(default = "default_token_limit")]
    pub token_limit: usize,

    /// Fraction of `token_limit` the live window may hold before a flush
    #[serde(default = "default_chat_history_token_ratio")]
    pub chat_history_token_ratio: f64,

    /// Separate budget for the condensation block
    #[serde(default)]
    pub condensed_token_limit: Option<usize>,

    /// Role of the synthetic turn carrying the condensation block
    #[serde(default = "default_insert_method")]
    pub insert_method: InsertMethod,

    /// Flush on every append that leaves the session over budget
    #[serde(default = "default_auto_flush")]
    pub auto_flush: bool,

    /// Tag wrapping the condensed entries in rendered context
    #[serde(default = "default_block_name")]
    pub block_name: String,

    /// Auxiliary keys dropped before rendering, in addition to `session_id`
    #[serde(default)]
    pub excluded_aux_keys: Vec<String>,
}

fn default_token_limit() -> usize { 30_000 }
fn default_chat_history_token_ratio() -> f64 { 0.7 }
fn default_insert_method() -> InsertMethod { InsertMethod::System }
fn default_auto_flush() -> bool { true }
fn default_block_name() -> String { "condensed_memory".to_string() }

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            token_limit: default_token_limit(),
            chat_history_token_ratio: default_chat_history_token_ratio(),
            condensed_token_limit: None,
            insert_method: default_insert_method(),
            auto_flush: default_auto_flush(),
            block_name: default_block_name(),
            excluded_aux_keys: Vec::new(),
        }
    }
}

impl MemoryConfig {
    /// Validate that the budget configuration is consistent
    pub fn validate(&self) -> Result<(), BudgetError> {
        if self.token_limit == 0 {
            return Err(BudgetError::ZeroLimit("token_limit"));
        }

        let ratio = self.chat_history_token_ratio;
        if !ratio.is_finite() || !(0.0..=1.0).contains(&ratio) {
            return Err(BudgetError::RatioOutOfRange(ratio));
        }

        if self.condensed_token_limit == Some(0) {
            return Err(BudgetError::ZeroLimit("condensed_token_limit"));
        }

        if self.block_name.trim().is_empty() {
            return Err(BudgetError::EmptyBlockName);
        }

        Ok(())
    }
}

/// Budget errors
#[derive(Debug, Error, PartialEq)]
pub enum BudgetError {
    #[error("{0} must be greater than zero")]
    ZeroLimit(&'static str),

    #[error("chat_history_token_ratio must be within [0, 1], got {0}")]
    RatioOutOfRange(f64),

    #[error("block_name must not be empty")]
    EmptyBlockName,
}

/// Validated budget derived from [`MemoryConfig`]
#[derive(Debug, Clone, Copy)]
pub struct MemoryBudget {
    token_limit: usize,
    ratio: f64,
    condensed_limit: usize,
}

impl MemoryBudget {
    pub fn new(config: &MemoryConfig) -> Result<Self, BudgetError> {
        config.validate()?;
        Ok(Self {
            token_limit: config.token_limit,
            ratio: config.chat_history_token_ratio,
            condensed_limit: config.condensed_token_limit.unwrap_or(config.token_limit),
        })
    }

    /// Upper bound for the live window after a flush
    pub fn live_threshold(&self) -> f64 {
        self.ratio * self.token_limit as f64
    }

    /// Whether the live window needs flushing
    pub fn is_over(&self, live_tokens: usize) -> bool {
        live_tokens as f64 > self.live_threshold()
    }

    pub fn condensed_limit(&self) -> usize {
        self.condensed_limit
    }

    pub fn token_limit(&self) -> usize {
        self.token_limit
    }
}
