//! In-memory reference implementation of the digest store contract.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    digests::{
        error::StoreError,
        store::{ClaimToken, DigestStore, ScheduleEntry},
    },
    models::{Record, TargetKey},
};

/// An active claim on one target.
#[derive(Debug)]
struct ActiveClaim {
    token: Uuid,
    claimed_at: DateTime<Utc>,
    lease: Duration,
    /// The record set detached at claim time, in append order.
    detached: Vec<Record>,
}

/// Buffered state for one target.
#[derive(Debug, Default)]
struct TargetState {
    /// Records appended since the last claim, in append order.
    records: Vec<Record>,
    /// Earliest delivery time; present iff the target is scheduled.
    ready_at: Option<DateTime<Utc>>,
    claim: Option<ActiveClaim>,
}

impl TargetState {
    fn is_empty(&self) -> bool {
        self.records.is_empty() && self.ready_at.is_none() && self.claim.is_none()
    }
}

/// In-memory [`DigestStore`]. A single mutex over all targets makes every
/// operation trivially linearizable; this is the reference implementation the
/// contract tests run against.
pub struct InMemoryDigestStore {
    targets: Mutex<HashMap<TargetKey, TargetState>>,
    /// Optional cap on buffered records per target; oldest are truncated.
    capacity: Option<usize>,
}

impl InMemoryDigestStore {
    /// Creates a store without a per-target capacity limit.
    pub fn new() -> Self {
        Self { targets: Mutex::new(HashMap::new()), capacity: None }
    }

    /// Creates a store that truncates each target's buffer to `capacity`
    /// records, dropping the oldest first.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { targets: Mutex::new(HashMap::new()), capacity: Some(capacity) }
    }

    /// Number of unclaimed buffered records for a target.
    pub async fn pending_records(&self, key: &TargetKey) -> usize {
        let targets = self.targets.lock().await;
        targets.get(key).map(|state| state.records.len()).unwrap_or(0)
    }

    /// Releases a claim in place, reattaching its detached records ahead of
    /// later appends. The caller must hold the map lock.
    fn abort_locked(
        state: &mut TargetState,
        claim: ActiveClaim,
        minimum_delay: Duration,
        now: DateTime<Utc>,
    ) {
        let mut records = claim.detached;
        records.append(&mut state.records);
        state.records = records;
        state.ready_at =
            if state.records.is_empty() { None } else { Some(now + minimum_delay) };
    }
}

impl Default for InMemoryDigestStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DigestStore for InMemoryDigestStore {
    async fn append(
        &self,
        key: &TargetKey,
        record: Record,
        minimum_delay: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<ScheduleEntry>, StoreError> {
        let mut targets = self.targets.lock().await;
        let state = targets.entry(key.clone()).or_default();

        state.records.push(record);
        if let Some(capacity) = self.capacity {
            if state.records.len() > capacity {
                let excess = state.records.len() - capacity;
                state.records.drain(..excess);
                tracing::debug!(%key, dropped = excess, "truncated digest buffer to capacity");
            }
        }

        if state.ready_at.is_none() && state.claim.is_none() {
            let ready_at = now + minimum_delay;
            state.ready_at = Some(ready_at);
            return Ok(Some(ScheduleEntry { key: key.clone(), ready_at }));
        }
        Ok(None)
    }

    async fn claim(
        &self,
        key: &TargetKey,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<(Vec<Record>, ClaimToken), StoreError> {
        let mut targets = self.targets.lock().await;
        let state = targets.entry(key.clone()).or_default();

        if state.claim.is_some() {
            return Err(StoreError::AlreadyClaimed(key.clone()));
        }

        let detached = std::mem::take(&mut state.records);
        let token = Uuid::new_v4();
        state.ready_at = None;
        state.claim =
            Some(ActiveClaim { token, claimed_at: now, lease, detached: detached.clone() });

        Ok((detached, ClaimToken { key: key.clone(), token, claimed_at: now }))
    }

    async fn commit(
        &self,
        token: &ClaimToken,
        minimum_delay: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut targets = self.targets.lock().await;
        let state = targets.get_mut(&token.key).ok_or(StoreError::InvalidState(token.token))?;
        match &state.claim {
            Some(claim) if claim.token == token.token => {}
            _ => return Err(StoreError::InvalidState(token.token)),
        }

        // The detached set is dropped with the claim; records appended during
        // the claim window become immediately re-schedulable.
        state.claim = None;
        if state.records.is_empty() {
            targets.remove(&token.key);
        } else {
            state.ready_at = Some(now + minimum_delay);
        }
        Ok(())
    }

    async fn abort(
        &self,
        token: &ClaimToken,
        minimum_delay: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut targets = self.targets.lock().await;
        let state = targets.get_mut(&token.key).ok_or(StoreError::InvalidState(token.token))?;
        let claim = match state.claim.take() {
            Some(claim) if claim.token == token.token => claim,
            other => {
                state.claim = other;
                return Err(StoreError::InvalidState(token.token));
            }
        };

        Self::abort_locked(state, claim, minimum_delay, now);
        if state.is_empty() {
            targets.remove(&token.key);
        }
        Ok(())
    }

    async fn sweep_ready(&self, now: DateTime<Utc>) -> Result<Vec<TargetKey>, StoreError> {
        let targets = self.targets.lock().await;
        Ok(targets
            .iter()
            .filter(|(_, state)| {
                state.claim.is_none() && state.ready_at.is_some_and(|ready| ready <= now)
            })
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn reclaim_expired(
        &self,
        before: DateTime<Utc>,
        minimum_delay: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut targets = self.targets.lock().await;
        let mut emptied = Vec::new();
        for (key, state) in targets.iter_mut() {
            let expired = state.claim.as_ref().is_some_and(|claim| claim.claimed_at < before);
            if !expired {
                continue;
            }
            // take() cannot fail here; expiry was just checked on the claim.
            if let Some(claim) = state.claim.take() {
                tracing::warn!(
                    %key,
                    claimed_at = %claim.claimed_at,
                    lease_secs = claim.lease.as_secs(),
                    "reclaiming expired claim"
                );
                Self::abort_locked(state, claim, minimum_delay, now);
            }
            if state.is_empty() {
                emptied.push(key.clone());
            }
        }
        for key in emptied {
            targets.remove(&key);
        }
        Ok(())
    }

    async fn delete(&self, key: &TargetKey) -> Result<(), StoreError> {
        let mut targets = self.targets.lock().await;
        targets.remove(key);
        Ok(())
    }
}
