//! The work queue boundary between the scheduler and delivery workers.
//!
//! The queue is assumed at-least-once; consumer idempotency comes from the
//! digest store's exclusive claims, not from the queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::models::TargetKey;

/// One unit of delivery work emitted by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryTask {
    /// The target to deliver.
    pub key: TargetKey,
    /// When the scheduler observed the target as ready.
    pub scheduled_at: DateTime<Utc>,
}

/// Errors that can occur when enqueueing delivery work.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue is no longer accepting work.
    #[error("work queue is closed")]
    Closed,

    /// The queue backend failed.
    #[error("work queue error: {0}")]
    Backend(String),
}

/// An at-least-once work queue for delivery tasks.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Enqueues one delivery task. Duplicate enqueues for the same key are
    /// tolerated downstream because claims are exclusive.
    async fn enqueue(&self, task: DeliveryTask) -> Result<(), QueueError>;
}

/// A [`WorkQueue`] backed by an in-process unbounded channel. Suitable for
/// single-process deployments and tests; distributed deployments substitute
/// their own broker behind the trait.
pub struct ChannelWorkQueue {
    sender: mpsc::UnboundedSender<DeliveryTask>,
}

impl ChannelWorkQueue {
    /// Creates the queue and the receiving half delivery workers consume.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DeliveryTask>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl WorkQueue for ChannelWorkQueue {
    async fn enqueue(&self, task: DeliveryTask) -> Result<(), QueueError> {
        self.sender.send(task).map_err(|_| QueueError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[tokio::test]
    async fn test_enqueued_tasks_arrive_in_order() {
        let (queue, mut receiver) = ChannelWorkQueue::new();
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

        let first = DeliveryTask { key: TargetKey::member(1, 2), scheduled_at: now };
        let second = DeliveryTask { key: TargetKey::member(1, 3), scheduled_at: now };
        queue.enqueue(first.clone()).await.unwrap();
        queue.enqueue(second.clone()).await.unwrap();

        assert_eq!(receiver.recv().await, Some(first));
        assert_eq!(receiver.recv().await, Some(second));
    }

    #[tokio::test]
    async fn test_enqueue_after_receiver_dropped_is_closed() {
        let (queue, receiver) = ChannelWorkQueue::new();
        drop(receiver);

        let task = DeliveryTask {
            key: TargetKey::member(1, 2),
            scheduled_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        };
        assert!(matches!(queue.enqueue(task).await.unwrap_err(), QueueError::Closed));
    }
}
