//! The structured output of the digest builder.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::record::Record;

/// One group of records sharing a domain grouping key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DigestGroup {
    /// The domain grouping key (e.g. an issue id).
    pub group_id: u64,
    /// Human-readable title taken from the most recent record carrying one.
    pub title: Option<String>,
    /// Number of records in the group.
    pub count: usize,
    /// Timestamp of the most recent record in the group.
    pub latest: DateTime<Utc>,
    /// The records, ordered by timestamp descending.
    pub records: Vec<Record>,
}

/// A built digest: groups ordered by (count desc, latest desc). Opaque to the
/// store and scheduler; only the builder produces it and only the sink
/// consumes it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Digest {
    /// The ordered groups.
    pub groups: Vec<DigestGroup>,
}

impl Digest {
    /// The sentinel digest produced when every record was malformed.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether the digest contains no groups.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Total number of records across all groups.
    pub fn record_count(&self) -> usize {
        self.groups.iter().map(|g| g.count).sum()
    }
}
