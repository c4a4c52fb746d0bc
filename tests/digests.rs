//! Integration tests for the digest pipeline.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use herald::{
    config::EngineConfig,
    digests::{
        DeliveryCoordinator, DeliveryError, DigestScheduler, DigestStore, InMemoryDigestStore,
        StoreError, Target, TargetResolutionError, TargetResolver,
    },
    models::{Digest, TargetKey},
    notification::{NotificationSink, SinkError},
    queue::ChannelWorkQueue,
    test_helpers::{member_key, ts, RecordBuilder},
};
use tokio::sync::Mutex;

const MINIMUM_DELAY: Duration = Duration::from_secs(60);
const LEASE: Duration = Duration::from_secs(30);

/// Resolves every key against one fixed test project.
struct StaticResolver {
    known_project: u64,
}

#[async_trait]
impl TargetResolver for StaticResolver {
    async fn resolve(&self, key: &TargetKey) -> Result<Target, TargetResolutionError> {
        if key.project_id != self.known_project {
            return Err(TargetResolutionError::NotFound(key.clone()));
        }
        Ok(Target {
            key: key.clone(),
            project_name: "acme".to_string(),
            minimum_delay: MINIMUM_DELAY,
        })
    }
}

/// Records delivered digests; optionally fails a configurable number of
/// deliveries first.
struct RecordingSink {
    delivered: Mutex<Vec<Digest>>,
    failures_remaining: Mutex<u32>,
}

impl RecordingSink {
    fn new() -> Self {
        Self { delivered: Mutex::new(Vec::new()), failures_remaining: Mutex::new(0) }
    }

    fn failing(times: u32) -> Self {
        Self { delivered: Mutex::new(Vec::new()), failures_remaining: Mutex::new(times) }
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, _target: &Target, digest: &Digest) -> Result<(), SinkError> {
        let mut failures = self.failures_remaining.lock().await;
        if *failures > 0 {
            *failures -= 1;
            return Err(SinkError::NotifyFailed("transport unavailable".to_string()));
        }
        self.delivered.lock().await.push(digest.clone());
        Ok(())
    }
}

fn config() -> EngineConfig {
    EngineConfig {
        schedule_interval: Duration::from_secs(5),
        maintenance_timeout: Duration::from_secs(300),
        minimum_delay: MINIMUM_DELAY,
        lease_duration: LEASE,
        digest_capacity: None,
    }
}

#[tokio::test]
async fn test_end_to_end_append_sweep_deliver() {
    let store = Arc::new(InMemoryDigestStore::new());
    let (queue, mut tasks) = ChannelWorkQueue::new();
    let scheduler = DigestScheduler::new(store.clone(), Arc::new(queue), &config());

    let key = member_key(10);
    for n in 0..3u64 {
        let record = RecordBuilder::new()
            .timestamp(ts(n as i64))
            .group_id(n % 2)
            .title("request failed")
            .build();
        let entry = store.append(&key, record, MINIMUM_DELAY, ts(0)).await.unwrap();
        // Only the first append schedules the target, at t+60.
        if n == 0 {
            assert_eq!(entry.unwrap().ready_at, ts(60));
        } else {
            assert!(entry.is_none());
        }
    }

    // Before the minimum delay has elapsed, the sweep yields nothing.
    scheduler.tick(ts(30)).await;
    assert!(tasks.try_recv().is_err());

    scheduler.tick(ts(61)).await;
    let task = tasks.try_recv().unwrap();
    assert_eq!(task.key, key);
    assert_eq!(task.scheduled_at, ts(61));

    let sink = Arc::new(RecordingSink::new());
    let coordinator = DeliveryCoordinator::new(
        store.clone(),
        Arc::new(StaticResolver { known_project: 1 }),
        sink.clone(),
        LEASE,
    );
    coordinator.deliver(&task.key).await.unwrap();

    let delivered = sink.delivered.lock().await;
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].record_count(), 3);
    assert_eq!(delivered[0].groups.len(), 2);
    drop(delivered);

    // The store is empty for the target afterward.
    assert_eq!(store.pending_records(&key).await, 0);
    assert!(store.sweep_ready(ts(10_000)).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_claimers_only_one_wins() {
    let store = Arc::new(InMemoryDigestStore::new());
    let key = member_key(10);
    let record = RecordBuilder::new().group_id(1).build();
    store.append(&key, record, MINIMUM_DELAY, ts(0)).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let store = store.clone();
        let key = key.clone();
        handles.push(tokio::spawn(async move { store.claim(&key, LEASE, ts(61)).await }));
    }

    let mut successes = 0;
    let mut already_claimed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok((records, _)) => {
                assert_eq!(records.len(), 1);
                successes += 1;
            }
            Err(StoreError::AlreadyClaimed(_)) => already_claimed += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(successes, 1);
    assert_eq!(already_claimed, 15);
}

#[tokio::test]
async fn test_sink_failure_leaves_records_for_retry() {
    let store = Arc::new(InMemoryDigestStore::new());
    let key = member_key(10);
    for n in 0..3u64 {
        let record = RecordBuilder::new().timestamp(ts(n as i64)).group_id(n).build();
        store.append(&key, record, MINIMUM_DELAY, ts(0)).await.unwrap();
    }

    let sink = Arc::new(RecordingSink::failing(1));
    let coordinator = DeliveryCoordinator::new(
        store.clone(),
        Arc::new(StaticResolver { known_project: 1 }),
        sink.clone(),
        LEASE,
    );

    let err = coordinator.deliver(&key).await.unwrap_err();
    assert!(matches!(err, DeliveryError::Sink(_)));
    // The abort kept every record schedulable.
    assert_eq!(store.pending_records(&key).await, 3);

    // The next attempt succeeds and drains the target.
    coordinator.deliver(&key).await.unwrap();
    assert_eq!(sink.delivered.lock().await[0].record_count(), 3);
    assert_eq!(store.pending_records(&key).await, 0);
}

#[tokio::test]
async fn test_unknown_project_drops_digest_state() {
    let store = Arc::new(InMemoryDigestStore::new());
    let key = TargetKey::member(999, 10);
    let record = RecordBuilder::new().group_id(1).build();
    store.append(&key, record, MINIMUM_DELAY, ts(0)).await.unwrap();

    let coordinator = DeliveryCoordinator::new(
        store.clone(),
        Arc::new(StaticResolver { known_project: 1 }),
        Arc::new(RecordingSink::new()),
        LEASE,
    );

    coordinator.deliver(&key).await.unwrap();
    assert_eq!(store.pending_records(&key).await, 0);
    assert!(store.sweep_ready(ts(10_000)).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_records_appended_during_delivery_survive() {
    let store = Arc::new(InMemoryDigestStore::new());
    let key = member_key(10);
    store
        .append(&key, RecordBuilder::new().group_id(1).build(), MINIMUM_DELAY, ts(0))
        .await
        .unwrap();

    // Claim, then race an append in before the commit.
    let (records, token) = store.claim(&key, LEASE, ts(61)).await.unwrap();
    assert_eq!(records.len(), 1);
    store
        .append(&key, RecordBuilder::new().group_id(2).build(), MINIMUM_DELAY, ts(62))
        .await
        .unwrap();
    store.commit(&token, MINIMUM_DELAY, ts(63)).await.unwrap();

    // The late record was rescheduled, not lost.
    assert_eq!(store.pending_records(&key).await, 1);
    assert_eq!(store.sweep_ready(ts(123)).await.unwrap(), vec![key]);
}
