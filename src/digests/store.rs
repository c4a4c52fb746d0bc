//! The durable per-target append buffer and scheduling metadata contract.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use uuid::Uuid;

use crate::{
    digests::error::StoreError,
    models::{Record, TargetKey},
};

/// Scheduling metadata for a target with unflushed records. Exists only while
/// the target has records and is not currently claimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    /// The target this entry schedules.
    pub key: TargetKey,
    /// Earliest time the target becomes eligible for delivery.
    pub ready_at: DateTime<Utc>,
}

/// An exclusive, time-bounded lease on a target held by one delivery attempt.
/// At most one active claim exists per target at any instant; claims that
/// outlive their lease are reclaimed by maintenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimToken {
    /// The claimed target.
    pub key: TargetKey,
    /// Opaque token identifying this claim.
    pub token: Uuid,
    /// When the claim was taken.
    pub claimed_at: DateTime<Utc>,
}

/// Durable per-target record buffer with claim-based mutual exclusion.
///
/// `claim`, `commit` and `abort` must be linearizable per target key; all
/// cross-worker mutual exclusion in the pipeline rests on them. Clock inputs
/// are explicit so schedulers and tests control time.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DigestStore: Send + Sync {
    /// Persists a record for the target. Creates a schedule entry at
    /// `now + minimum_delay` and returns it if the target had none and is not
    /// claimed; returns `None` when the target is already scheduled.
    async fn append(
        &self,
        key: &TargetKey,
        record: Record,
        minimum_delay: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<ScheduleEntry>, StoreError>;

    /// Atomically claims the target and detaches its current record set, in
    /// append order. Records appended after the claim are not included. Fails
    /// with [`StoreError::AlreadyClaimed`] if another claim is active.
    /// Claiming a target with no records succeeds with an empty set.
    async fn claim(
        &self,
        key: &TargetKey,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<(Vec<Record>, ClaimToken), StoreError>;

    /// Deletes the claimed record set and releases the claim. If the target
    /// accumulated records during the claim window, immediately recreates a
    /// schedule entry at `now + minimum_delay`. Fails with
    /// [`StoreError::InvalidState`] on an unknown or already-resolved token.
    async fn commit(
        &self,
        token: &ClaimToken,
        minimum_delay: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Releases the claim without deleting records; the detached set is
    /// reattached ahead of later appends and the target becomes
    /// re-schedulable at `now + minimum_delay`. Fails with
    /// [`StoreError::InvalidState`] on an unknown or already-resolved token.
    async fn abort(
        &self,
        token: &ClaimToken,
        minimum_delay: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Returns the targets whose `ready_at <= now` and that are not under an
    /// active claim. One snapshot per call.
    async fn sweep_ready(&self, now: DateTime<Utc>) -> Result<Vec<TargetKey>, StoreError>;

    /// Force-aborts every claim taken before `before`. This is maintenance
    /// against crashed workers and the system's sole retry mechanism.
    async fn reclaim_expired(
        &self,
        before: DateTime<Utc>,
        minimum_delay: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Removes all state for a target. Used when the target can no longer be
    /// resolved and its digest must be dropped rather than retried.
    async fn delete(&self, key: &TargetKey) -> Result<(), StoreError>;
}
