//! Models for monitored processes and their check-ins.

use std::{str::FromStr, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{deserialize_duration_from_seconds, serialize_duration_to_seconds};

/// Raised when a status string stored in the backend is not recognized.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown status value: {0}")]
pub struct UnknownStatus(pub String);

/// The status of a monitored environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorStatus {
    /// The monitor is configured but has not checked in yet.
    Active,
    /// The most recent evaluation found the monitor healthy.
    Ok,
    /// The monitor missed a deadline or reported a failure.
    Error,
    /// Automatic transitions are suspended until re-enabled externally.
    Disabled,
}

impl MonitorStatus {
    /// Stable string form used by persistence backends.
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorStatus::Active => "active",
            MonitorStatus::Ok => "ok",
            MonitorStatus::Error => "error",
            MonitorStatus::Disabled => "disabled",
        }
    }
}

impl FromStr for MonitorStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(MonitorStatus::Active),
            "ok" => Ok(MonitorStatus::Ok),
            "error" => Ok(MonitorStatus::Error),
            "disabled" => Ok(MonitorStatus::Disabled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// The status reported by a single check-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckInStatus {
    /// The monitored job completed successfully.
    Ok,
    /// The monitored job reported a failure.
    Error,
    /// The monitored job started but has not finished.
    InProgress,
}

impl CheckInStatus {
    /// Stable string form used by persistence backends.
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckInStatus::Ok => "ok",
            CheckInStatus::Error => "error",
            CheckInStatus::InProgress => "in_progress",
        }
    }
}

impl FromStr for CheckInStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(CheckInStatus::Ok),
            "error" => Ok(CheckInStatus::Error),
            "in_progress" => Ok(CheckInStatus::InProgress),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// One check-in event. Immutable and append-only, ordered by `date_added`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckIn {
    /// The monitor environment this check-in belongs to.
    pub monitor_environment_id: u64,
    /// The reported status.
    pub status: CheckInStatus,
    /// When the check-in was recorded.
    pub date_added: DateTime<Utc>,
}

/// Per-environment monitor state. Mutated only by the check-in evaluator, and
/// only through a timestamp-guarded conditional update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorEnvironment {
    /// Unique identifier for the monitor environment.
    pub id: u64,
    /// The monitor this environment belongs to.
    pub monitor_id: u64,
    /// Environment name (e.g. "production").
    pub environment: String,
    /// Current status.
    pub status: MonitorStatus,
    /// Timestamp of the newest check-in applied to this state.
    pub last_checkin: Option<DateTime<Utc>>,
    /// When the next check-in is expected.
    pub next_checkin: Option<DateTime<Utc>>,
    /// Latest acceptable time for the next check-in before it counts as
    /// missed.
    pub next_checkin_latest: Option<DateTime<Utc>>,
    /// When the status last changed; marks recovery boundaries.
    pub last_state_change: Option<DateTime<Utc>>,
}

/// How often a monitor is expected to check in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckInSchedule {
    /// A fixed interval between check-ins.
    Interval {
        /// The expected gap between consecutive check-ins.
        #[serde(
            deserialize_with = "deserialize_duration_from_seconds",
            serialize_with = "serialize_duration_to_seconds"
        )]
        every: Duration,
    },
}

impl CheckInSchedule {
    /// The next expected check-in time, anchored at `ts`.
    pub fn next_expected(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            CheckInSchedule::Interval { every } => ts + *every,
        }
    }

    /// The latest acceptable time for the next check-in, anchored at `ts`.
    pub fn next_expected_latest(&self, ts: DateTime<Utc>, margin: Duration) -> DateTime<Utc> {
        self.next_expected(ts) + margin
    }
}

/// Monitor configuration, externally owned and read-only to the evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Number of trailing check-ins (including the current one) that must all
    /// be OK before a recovery transition is applied. Zero disables the
    /// debounce.
    #[serde(default)]
    pub recovery_threshold: u32,

    /// The expected check-in cadence.
    pub schedule: CheckInSchedule,

    /// Grace period added to the next expected check-in before it counts as
    /// missed.
    #[serde(
        deserialize_with = "deserialize_duration_from_seconds",
        serialize_with = "serialize_duration_to_seconds",
        default
    )]
    pub checkin_margin: Duration,
}

/// A monitor definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Monitor {
    /// Unique identifier for the monitor.
    pub id: u64,
    /// Name of the monitor.
    pub name: String,
    /// Monitor-level status; `Disabled` suppresses automatic status
    /// transitions.
    pub status: MonitorStatus,
    /// Evaluation configuration.
    pub config: MonitorConfig,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_interval_schedule_anchors_at_checkin_time() {
        let schedule = CheckInSchedule::Interval { every: Duration::from_secs(600) };
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

        assert_eq!(
            schedule.next_expected(ts),
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 10, 0).unwrap()
        );
        assert_eq!(
            schedule.next_expected_latest(ts, Duration::from_secs(120)),
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 12, 0).unwrap()
        );
    }

    #[test]
    fn test_status_string_round_trips() {
        for status in
            [MonitorStatus::Active, MonitorStatus::Ok, MonitorStatus::Error, MonitorStatus::Disabled]
        {
            assert_eq!(status.as_str().parse::<MonitorStatus>().unwrap(), status);
        }
        for status in [CheckInStatus::Ok, CheckInStatus::Error, CheckInStatus::InProgress] {
            assert_eq!(status.as_str().parse::<CheckInStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<MonitorStatus>().is_err());
    }
}
