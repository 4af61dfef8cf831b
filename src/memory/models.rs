//! Data models for session memory

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::condensation::CondensationBlock;

/// Author of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Auxiliary data attached to a turn
///
/// Well-known keys are typed fields; anything else lands in `extra`, which
/// keeps insertion order so rendered output is stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuxData {
    /// Routing identifier. Transport-only, never rendered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub extra: IndexMap<String, Value>,
}

impl AuxData {
    pub fn is_empty(&self) -> bool {
        self.session_id.is_none()
            && self.tool_call_id.is_none()
            && self.tool_name.is_none()
            && self.name.is_none()
            && self.extra.is_empty()
    }

    /// Keys that survive rendering, well-known keys first.
    ///
    /// `session_id` is always dropped; `excluded` names further keys to drop.
    pub fn filtered(&self, excluded: &[String]) -> IndexMap<String, Value> {
        let keep = |key: &str| !excluded.iter().any(|k| k == key);
        let mut out = IndexMap::new();

        let known = [
            ("tool_call_id", &self.tool_call_id),
            ("tool_name", &self.tool_name),
            ("name", &self.name),
        ];
        for (key, value) in known {
            if let Some(v) = value {
                if keep(key) {
                    out.insert(key.to_string(), Value::String(v.clone()));
                }
            }
        }

        for (key, value) in &self.extra {
            if key != "session_id" && keep(key) && !out.contains_key(key) {
                out.insert(key.clone(), value.clone());
            }
        }

        out
    }
}

/// One message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    /// Text segments, concatenated in order when read as text
    pub content: Vec<String>,
    #[serde(default, skip_serializing_if = "AuxData::is_empty")]
    pub aux: AuxData,
}

impl Turn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![text.into()],
            aux: AuxData::default(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    pub fn tool(text: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        let mut turn = Self::new(Role::Tool, text);
        turn.aux.tool_call_id = Some(tool_call_id.into());
        turn
    }

    pub fn with_segment(mut self, segment: impl Into<String>) -> Self {
        self.content.push(segment.into());
        self
    }

    pub fn with_aux(mut self, aux: AuxData) -> Self {
        self.aux = aux;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.aux.extra.insert(key.into(), value);
        self
    }

    /// Concatenated text content
    pub fn text(&self) -> String {
        self.content.concat()
    }
}

/// How the condensation block is attached to rendered context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsertMethod {
    System,
    User,
}

impl InsertMethod {
    pub fn role(&self) -> Role {
        match self {
            InsertMethod::System => Role::System,
            InsertMethod::User => Role::User,
        }
    }
}

impl std::str::FromStr for InsertMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "system" => Ok(InsertMethod::System),
            "user" => Ok(InsertMethod::User),
            other => Err(format!("unknown insert method: {}", other)),
        }
    }
}

/// Whether an append triggers a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    Auto,
    Deferred,
}

/// Budget state of a session's live window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetState {
    UnderBudget,
    OverBudget,
}

/// Persisted state for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    /// Unflushed turns, oldest first
    pub live: Vec<Turn>,
    pub condensed: CondensationBlock,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>, condensed_token_limit: usize) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            live: Vec::new(),
            condensed: CondensationBlock::new(condensed_token_limit),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Result of a flush
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub turns_condensed: usize,
    pub entries_evicted: usize,
    pub live_tokens: usize,
}

/// Token usage snapshot for a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub live_turns: usize,
    pub live_tokens: usize,
    pub condensed_entries: usize,
    pub condensed_tokens: usize,
    pub threshold: f64,
    pub state: BudgetState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_turn_text_concatenates_segments() {
        let turn = Turn::user("Hello, ").with_segment("world");
        assert_eq!(turn.text(), "Hello, world");
    }

    #[test]
    fn test_filtered_drops_session_id() {
        let turn = Turn::user("hi")
            .with_aux(AuxData {
                session_id: Some("abc".to_string()),
                name: Some("logan".to_string()),
                ..Default::default()
            })
            .with_extra("session_id", json!("shadow"))
            .with_extra("score", json!(3));

        let filtered = turn.aux.filtered(&[]);
        let keys: Vec<_> = filtered.keys().cloned().collect();
        assert_eq!(keys, vec!["name", "score"]);
    }

    #[test]
    fn test_filtered_honors_excluded_keys() {
        let aux = AuxData {
            tool_call_id: Some("call_1".to_string()),
            ..Default::default()
        };
        let turn = Turn::tool("42", "call_1")
            .with_aux(aux)
            .with_extra("trace", json!("x"));

        let filtered = turn.aux.filtered(&["trace".to_string()]);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered["tool_call_id"], json!("call_1"));
    }

    #[test]
    fn test_insert_method_parse() {
        assert_eq!("System".parse::<InsertMethod>(), Ok(InsertMethod::System));
        assert_eq!("user".parse::<InsertMethod>(), Ok(InsertMethod::User));
        assert!("assistant".parse::<InsertMethod>().is_err());
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let encoded = serde_json::to_string(&Role::Assistant).unwrap();
        assert_eq!(encoded, "\"assistant\"");
    }
}
