//! Token-bounded conversational session memory
//!
//! Conversation turns are appended per session; once the live window grows
//! past its budget the oldest turns are condensed into a bounded text block,
//! and `render` produces the context to hand to a completion service.

pub mod config;
pub mod error;
pub mod logging;
pub mod memory;
pub mod metrics;
pub mod store;

pub use config::Config;
pub use error::{MemoryError, Result};
pub use memory::{FlushMode, InsertMethod, MemoryConfig, Role, SessionMemory, Turn};
pub use store::{EncodedStore, InMemoryStore, SessionStore};
