//! Error types for the monitor check-in subsystem.

use thiserror::Error;

use crate::persistence::error::PersistenceError;

/// Errors that can occur in a monitor store implementation.
#[derive(Debug, Error)]
pub enum MonitorStoreError {
    /// The monitor environment does not exist.
    #[error("monitor environment not found: {0}")]
    EnvironmentNotFound(u64),

    /// The backing store failed.
    #[error("monitor store backend error: {0}")]
    Backend(#[from] PersistenceError),
}
