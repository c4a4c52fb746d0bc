//! Periodic sweep that recovers stuck claims and enqueues delivery work.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};

use crate::{
    config::EngineConfig,
    digests::store::DigestStore,
    queue::{DeliveryTask, WorkQueue},
};

/// Runs maintenance and readiness sweeps against the digest store on a fixed
/// period, emitting one delivery task per ready target.
///
/// Enqueues are fire-and-forget: duplicate tasks for the same key are
/// harmless because claims are exclusive, and enqueue failures only delay
/// delivery until the next sweep.
pub struct DigestScheduler<S, Q>
where
    S: DigestStore,
    Q: WorkQueue,
{
    store: Arc<S>,
    queue: Arc<Q>,
    schedule_interval: Duration,
    maintenance_timeout: Duration,
    minimum_delay: Duration,
}

impl<S, Q> DigestScheduler<S, Q>
where
    S: DigestStore,
    Q: WorkQueue,
{
    /// Creates a scheduler over the given store and queue.
    pub fn new(store: Arc<S>, queue: Arc<Q>, config: &EngineConfig) -> Self {
        Self {
            store,
            queue,
            schedule_interval: config.schedule_interval,
            maintenance_timeout: config.maintenance_timeout,
            minimum_delay: config.minimum_delay,
        }
    }

    /// Runs one sweep: reclaims claims older than the maintenance deadline,
    /// then enqueues a delivery task for every ready target. Errors are
    /// logged, never fatal.
    pub async fn tick(&self, now: DateTime<Utc>) {
        let deadline = now - self.maintenance_timeout;
        if let Err(e) = self.store.reclaim_expired(deadline, self.minimum_delay, now).await {
            tracing::error!(error = %e, "failed to reclaim expired claims");
        }

        let keys = match self.store.sweep_ready(now).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::error!(error = %e, "failed to sweep ready targets");
                return;
            }
        };

        for key in keys {
            tracing::debug!(%key, "enqueueing digest delivery");
            let task = DeliveryTask { key: key.clone(), scheduled_at: now };
            if let Err(e) = self.queue.enqueue(task).await {
                tracing::error!(%key, error = %e, "failed to enqueue digest delivery");
            }
        }
    }

    /// Runs sweeps forever on the configured interval. Spawn as a
    /// long-running task; the loop never exits on error.
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.schedule_interval);
        loop {
            interval.tick().await;
            self.tick(Utc::now()).await;
        }
    }
}
