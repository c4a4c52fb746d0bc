//! A set of helpers for testing

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

use crate::models::{
    monitor::{CheckIn, CheckInStatus, MonitorEnvironment, MonitorStatus},
    Record, TargetKey,
};

/// A fixed epoch all test timestamps are offset from.
pub const TEST_EPOCH: i64 = 1_700_000_000;

/// Returns a deterministic timestamp `secs` seconds past the test epoch.
pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(TEST_EPOCH + secs, 0).unwrap()
}

/// A builder for creating `Record` instances for testing.
#[derive(Debug, Default, Clone)]
pub struct RecordBuilder {
    timestamp: Option<DateTime<Utc>>,
    group_id: Option<u64>,
    title: Option<String>,
}

impl RecordBuilder {
    /// Creates a new `RecordBuilder`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the record timestamp.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the grouping key carried in the payload.
    pub fn group_id(mut self, group_id: u64) -> Self {
        self.group_id = Some(group_id);
        self
    }

    /// Sets the title carried in the payload.
    pub fn title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    /// Builds the `Record` with the provided or default values. A record
    /// built without a group id is malformed from the builder's perspective.
    pub fn build(self) -> Record {
        let mut payload = json!({});
        if let Some(group_id) = self.group_id {
            payload["group_id"] = json!(group_id);
        }
        if let Some(title) = self.title {
            payload["title"] = json!(title);
        }
        Record::new(self.timestamp.unwrap_or_else(|| ts(0)), payload)
    }
}

/// A builder for creating `MonitorEnvironment` instances for testing.
#[derive(Debug, Clone)]
pub struct MonitorEnvironmentBuilder {
    id: u64,
    status: MonitorStatus,
    last_checkin: Option<DateTime<Utc>>,
}

impl MonitorEnvironmentBuilder {
    /// Creates a new builder for the given environment id.
    pub fn new(id: u64) -> Self {
        Self { id, status: MonitorStatus::Active, last_checkin: None }
    }

    /// Sets the environment status.
    pub fn status(mut self, status: MonitorStatus) -> Self {
        self.status = status;
        self
    }

    /// Sets the last applied check-in timestamp.
    pub fn last_checkin(mut self, last_checkin: DateTime<Utc>) -> Self {
        self.last_checkin = Some(last_checkin);
        self
    }

    /// Builds the `MonitorEnvironment` with default values.
    pub fn build(self) -> MonitorEnvironment {
        MonitorEnvironment {
            id: self.id,
            monitor_id: 1,
            environment: "production".to_string(),
            status: self.status,
            last_checkin: self.last_checkin,
            next_checkin: None,
            next_checkin_latest: None,
            last_state_change: None,
        }
    }
}

/// Creates a check-in for an environment at the given offset from the test
/// epoch.
pub fn checkin_at(monitor_environment_id: u64, status: CheckInStatus, secs: i64) -> CheckIn {
    CheckIn { monitor_environment_id, status, date_added: ts(secs) }
}

/// A member target key under a fixed test project.
pub fn member_key(member_id: u64) -> TargetKey {
    TargetKey::member(1, member_id)
}
