//! Memory entries — the two kinds of record kept in an agent's log

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MemoryError;

static ENTRY_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A task request as it was handed to an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInput {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub agent: String,
    #[serde(rename = "input")]
    pub input_text: String,
    #[serde(default = "empty_object")]
    pub context: Value,
}

/// The payload an agent produced for a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub agent: String,
    pub task_id: String,
    pub result: Value,
    #[serde(default = "empty_object")]
    pub metadata: Value,
}

/// One immutable record in an agent's memory log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MemoryEntry {
    TaskInput(TaskInput),
    TaskResult(TaskResult),
}

/// Discriminant used to filter recalls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    TaskInput,
    TaskResult,
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TaskInput => write!(f, "task_input"),
            Self::TaskResult => write!(f, "task_result"),
        }
    }
}

impl std::str::FromStr for EntryKind {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "task_input" | "input" => Ok(Self::TaskInput),
            "task_result" | "result" => Ok(Self::TaskResult),
            other => Err(MemoryError::UnknownEntryKind(other.to_string())),
        }
    }
}

impl MemoryEntry {
    /// Build a task-input entry stamped with the current time
    pub fn input(agent: impl Into<String>, input_text: impl Into<String>, context: Value) -> Self {
        Self::TaskInput(TaskInput {
            id: next_entry_id("mem"),
            timestamp: Utc::now(),
            agent: agent.into(),
            input_text: input_text.into(),
            context: or_empty(context),
        })
    }

    /// Build a task-result entry stamped with the current time
    pub fn result(
        agent: impl Into<String>,
        task_id: impl Into<String>,
        result: Value,
        metadata: Value,
    ) -> Self {
        Self::TaskResult(TaskResult {
            id: next_entry_id("result"),
            timestamp: Utc::now(),
            agent: agent.into(),
            task_id: task_id.into(),
            result,
            metadata: or_empty(metadata),
        })
    }

    pub fn id(&self) -> &str {
        match self {
            Self::TaskInput(e) => &e.id,
            Self::TaskResult(e) => &e.id,
        }
    }

    pub fn agent(&self) -> &str {
        match self {
            Self::TaskInput(e) => &e.agent,
            Self::TaskResult(e) => &e.agent,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::TaskInput(e) => e.timestamp,
            Self::TaskResult(e) => e.timestamp,
        }
    }

    pub fn kind(&self) -> EntryKind {
        match self {
            Self::TaskInput(_) => EntryKind::TaskInput,
            Self::TaskResult(_) => EntryKind::TaskResult,
        }
    }

    /// Text of the input field, empty for results
    pub fn input_text(&self) -> String {
        match self {
            Self::TaskInput(e) => e.input_text.clone(),
            Self::TaskResult(_) => String::new(),
        }
    }

    /// Text of the result field, empty for inputs.
    ///
    /// Plain strings are returned verbatim; structured results are rendered as compact JSON.
    pub fn result_text(&self) -> String {
        match self {
            Self::TaskInput(_) => String::new(),
            Self::TaskResult(e) => render_value(&e.result),
        }
    }

    /// Case-insensitive substring match over the input and result renderings
    pub fn matches(&self, needle_lower: &str) -> bool {
        self.input_text().to_lowercase().contains(needle_lower)
            || self.result_text().to_lowercase().contains(needle_lower)
    }
}

/// Generate an entry id: `<prefix>_<YYYYmmdd_HHMMSS_micros>_<counter>`
pub fn next_entry_id(prefix: &str) -> String {
    let seq = ENTRY_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}_{}_{}", prefix, Utc::now().format("%Y%m%d_%H%M%S_%6f"), seq)
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

fn or_empty(value: Value) -> Value {
    if value.is_null() { empty_object() } else { value }
}
