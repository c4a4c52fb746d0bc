//! State management for monitor environments and their check-in history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
#[cfg(test)]
use mockall::automock;
use tokio::sync::Mutex;

use crate::{
    models::monitor::{CheckIn, MonitorEnvironment, MonitorStatus},
    monitors::error::MonitorStoreError,
};

/// The field set a check-in evaluation wants to apply to a monitor
/// environment. `None` fields are left unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentUpdate {
    /// The evaluated check-in's timestamp; becomes the new `last_checkin`.
    pub last_checkin: DateTime<Utc>,
    /// The next expected check-in time.
    pub next_checkin: DateTime<Utc>,
    /// The latest acceptable time for the next check-in.
    pub next_checkin_latest: DateTime<Utc>,
    /// New status, when the evaluation decided a transition.
    pub status: Option<MonitorStatus>,
    /// Recovery boundary marker, set when the status leaves a non-OK state.
    pub last_state_change: Option<DateTime<Utc>>,
}

/// Persistence boundary for monitor environments and check-ins.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MonitorStore: Send + Sync {
    /// Appends one check-in to the ordered history.
    async fn record_checkin(&self, checkin: &CheckIn) -> Result<(), MonitorStoreError>;

    /// Returns the most recent `limit` check-ins for an environment, newest
    /// first.
    async fn recent_checkins(
        &self,
        monitor_environment_id: u64,
        limit: u32,
    ) -> Result<Vec<CheckIn>, MonitorStoreError>;

    /// Fetches the current state of a monitor environment.
    async fn environment(
        &self,
        monitor_environment_id: u64,
    ) -> Result<Option<MonitorEnvironment>, MonitorStoreError>;

    /// Creates or replaces a monitor environment record.
    async fn upsert_environment(&self, env: &MonitorEnvironment) -> Result<(), MonitorStoreError>;

    /// Applies `update` to the environment unless a check-in with a strictly
    /// newer timestamp than `guard_ts` has already been recorded on it. The
    /// read-check-write must be a single atomic operation per environment.
    /// Returns whether the update was applied.
    async fn update_environment(
        &self,
        monitor_environment_id: u64,
        guard_ts: DateTime<Utc>,
        update: &EnvironmentUpdate,
    ) -> Result<bool, MonitorStoreError>;
}

/// In-memory [`MonitorStore`]. Environments live in a [`DashMap`] so the
/// timestamp-guarded update is atomic per entry; keys are independent, so no
/// cross-monitor locking is needed.
pub struct InMemoryMonitorStore {
    environments: DashMap<u64, MonitorEnvironment>,
    checkins: Mutex<Vec<CheckIn>>,
}

impl InMemoryMonitorStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self { environments: DashMap::new(), checkins: Mutex::new(Vec::new()) }
    }
}

impl Default for InMemoryMonitorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MonitorStore for InMemoryMonitorStore {
    async fn record_checkin(&self, checkin: &CheckIn) -> Result<(), MonitorStoreError> {
        let mut checkins = self.checkins.lock().await;
        checkins.push(checkin.clone());
        Ok(())
    }

    async fn recent_checkins(
        &self,
        monitor_environment_id: u64,
        limit: u32,
    ) -> Result<Vec<CheckIn>, MonitorStoreError> {
        let checkins = self.checkins.lock().await;
        let mut recent: Vec<CheckIn> = checkins
            .iter()
            .filter(|c| c.monitor_environment_id == monitor_environment_id)
            .cloned()
            .collect();
        recent.sort_by(|a, b| b.date_added.cmp(&a.date_added));
        recent.truncate(limit as usize);
        Ok(recent)
    }

    async fn environment(
        &self,
        monitor_environment_id: u64,
    ) -> Result<Option<MonitorEnvironment>, MonitorStoreError> {
        Ok(self.environments.get(&monitor_environment_id).map(|entry| entry.value().clone()))
    }

    async fn upsert_environment(&self, env: &MonitorEnvironment) -> Result<(), MonitorStoreError> {
        self.environments.insert(env.id, env.clone());
        Ok(())
    }

    async fn update_environment(
        &self,
        monitor_environment_id: u64,
        guard_ts: DateTime<Utc>,
        update: &EnvironmentUpdate,
    ) -> Result<bool, MonitorStoreError> {
        // get_mut holds the shard lock for the entry, making the
        // read-check-write atomic per environment.
        let mut entry = self
            .environments
            .get_mut(&monitor_environment_id)
            .ok_or(MonitorStoreError::EnvironmentNotFound(monitor_environment_id))?;

        if entry.last_checkin.is_some_and(|last| last > guard_ts) {
            return Ok(false);
        }

        entry.last_checkin = Some(update.last_checkin);
        entry.next_checkin = Some(update.next_checkin);
        entry.next_checkin_latest = Some(update.next_checkin_latest);
        if let Some(status) = update.status {
            entry.status = status;
        }
        if let Some(changed_at) = update.last_state_change {
            entry.last_state_change = Some(changed_at);
        }
        Ok(true)
    }
}
