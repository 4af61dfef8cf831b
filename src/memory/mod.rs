//! Bounded session memory with automatic condensation
//!
//! Keeps each session's recent turns in a live window bounded by
//! `chat_history_token_ratio * token_limit`. Older turns are rendered to text
//! and moved into a condensation block with its own token budget, which drops
//! its oldest entries when full.

pub mod budget;
pub mod condensation;
pub mod manager;
pub mod models;
pub mod render;
pub mod token_estimator;

pub use budget::{BudgetError, MemoryBudget, MemoryConfig};
pub use condensation::{CondensationBlock, CondensedEntry};
pub use manager::SessionMemory;
pub use models::{
    AuxData, BudgetState, FlushMode, FlushReport, InsertMethod, MemoryUsage, Role, SessionState,
    Turn,
};
pub use render::{render_block, render_turn};
pub use token_estimator::{
    counter_from_config, Encoding, TiktokenCounter, TokenCounter, TokenizationError,
    TokenizerConfig, WordBasedCounter,
};
