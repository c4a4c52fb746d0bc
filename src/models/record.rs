//! Raw notifiable events buffered for digest delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One raw notifiable event. Immutable once appended; ordering within a
/// target is arrival order, not timestamp order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Opaque event payload. The digest builder expects a `group_id` field
    /// and optionally a `title`.
    pub payload: serde_json::Value,
}

impl Record {
    /// Creates a record from a timestamp and payload.
    pub fn new(timestamp: DateTime<Utc>, payload: serde_json::Value) -> Self {
        Self { timestamp, payload }
    }

    /// Extracts the domain grouping key from the payload, if present and
    /// well-formed.
    pub fn group_id(&self) -> Option<u64> {
        self.payload.get("group_id").and_then(serde_json::Value::as_u64)
    }

    /// Extracts the human-readable title from the payload, if present.
    pub fn title(&self) -> Option<&str> {
        self.payload.get("title").and_then(serde_json::Value::as_str)
    }
}
