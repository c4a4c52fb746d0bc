//! Error types for the digest pipeline.

use thiserror::Error;
use uuid::Uuid;

use crate::{models::TargetKey, notification::SinkError, persistence::error::PersistenceError};

/// Errors that can occur in a digest store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another delivery attempt holds an active claim on the target. A benign
    /// race; callers must not retry synchronously.
    #[error("target is already claimed: {0}")]
    AlreadyClaimed(TargetKey),

    /// The claim token is unknown or was already resolved. Someone else
    /// finished the delivery; callers must stop without side effects.
    #[error("claim token is no longer valid: {0}")]
    InvalidState(Uuid),

    /// The backing store failed.
    #[error("store backend error: {0}")]
    Backend(#[from] PersistenceError),
}

/// Errors surfaced by the delivery coordinator.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The digest store failed.
    #[error("digest store error: {0}")]
    Store(#[from] StoreError),

    /// The notification sink rejected the digest. The claim was aborted and
    /// delivery will be retried on a future sweep.
    #[error("notification sink failure: {0}")]
    Sink(#[from] SinkError),

    /// Target resolution failed for a reason other than the target no longer
    /// existing.
    #[error("target resolution failed: {0}")]
    Resolution(String),
}
