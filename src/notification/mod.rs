//! The notification sink boundary.
//!
//! Delivery mechanisms (mail, webhooks, chat) live behind this trait and are
//! treated as black boxes. A sink failure is never retried synchronously;
//! the coordinator aborts the claim and relies on re-scheduling instead.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use thiserror::Error;

use crate::{digests::deliver::Target, models::Digest};

/// Defines the possible errors that can occur when handing a digest to a
/// notification sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink rejected or failed to deliver the digest.
    #[error("Notification failed: {0}")]
    NotifyFailed(String),

    /// An error related to invalid or missing sink configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// A delivery mechanism for built digests.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Delivers one digest to the resolved target. Must return an error
    /// rather than blocking on internal retries.
    async fn notify(&self, target: &Target, digest: &Digest) -> Result<(), SinkError>;
}
