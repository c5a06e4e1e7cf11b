//! Changefeed event types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of a changefeed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Put,
    Delete,
    TxCommit,
    TxRollback,
}

/// A published event. Stored as JSON under `changefeed:<seq BE>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Strictly monotone sequence, starting at 1.
    pub sequence: u64,
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Logical key the event refers to (row key, edge key, `tx:<id>`).
    pub key: String,
    /// New value for puts, when the writer chose to include it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    /// Wall-clock milliseconds at publish time.
    pub ts_ms: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// An event missing only its sequence and timestamp, built by writers
/// while a transaction stages mutations.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub event_type: EventType,
    pub key: String,
    pub value: Option<serde_json::Value>,
    pub metadata: BTreeMap<String, String>,
}

impl EventDraft {
    pub fn new(event_type: EventType, key: impl Into<String>) -> Self {
        EventDraft {
            event_type,
            key: key.into(),
            value: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_value(mut self, value: serde_json::Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
