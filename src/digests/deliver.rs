//! The delivery coordinator: claims a target's pending batch exclusively,
//! builds it, hands it to the notification sink and resolves store state.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
#[cfg(test)]
use mockall::automock;
use thiserror::Error;

use crate::{
    digests::{
        builder::build_digest,
        error::{DeliveryError, StoreError},
        store::{ClaimToken, DigestStore},
    },
    models::TargetKey,
    notification::NotificationSink,
};

/// A fully resolved delivery target, including its per-target configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    /// The aggregation key this target was resolved from.
    pub key: TargetKey,
    /// Display name of the owning project.
    pub project_name: String,
    /// Per-target minimum delay between first append and delivery.
    pub minimum_delay: Duration,
}

/// Errors that can occur while resolving a target key to a live target.
#[derive(Debug, Error)]
pub enum TargetResolutionError {
    /// The target no longer exists; its digest state must be dropped, not
    /// retried.
    #[error("target no longer exists: {0}")]
    NotFound(TargetKey),

    /// The resolver backend failed.
    #[error("target resolution backend error: {0}")]
    Backend(String),
}

/// Resolves a target key against externally owned configuration.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TargetResolver: Send + Sync {
    /// Resolves the key, returning the live target and its configuration.
    async fn resolve(&self, key: &TargetKey) -> Result<Target, TargetResolutionError>;
}

/// Coordinates one delivery attempt per dequeued target key.
pub struct DeliveryCoordinator<S, R, N>
where
    S: DigestStore,
    R: TargetResolver,
    N: NotificationSink,
{
    store: Arc<S>,
    resolver: Arc<R>,
    sink: Arc<N>,
    lease: Duration,
}

impl<S, R, N> DeliveryCoordinator<S, R, N>
where
    S: DigestStore,
    R: TargetResolver,
    N: NotificationSink,
{
    /// Creates a coordinator over the given collaborators.
    pub fn new(store: Arc<S>, resolver: Arc<R>, sink: Arc<N>, lease: Duration) -> Self {
        Self { store, resolver, sink, lease }
    }

    /// Runs one delivery attempt for a target key.
    ///
    /// Benign races ([`StoreError::AlreadyClaimed`], [`StoreError::InvalidState`])
    /// resolve to `Ok(())`; a sink failure aborts the claim so the records are
    /// retried on a later sweep, then surfaces as [`DeliveryError::Sink`].
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn deliver(&self, key: &TargetKey) -> Result<(), DeliveryError> {
        let target = match self.resolver.resolve(key).await {
            Ok(target) => target,
            Err(TargetResolutionError::NotFound(_)) => {
                tracing::info!(%key, "cannot deliver digest, target no longer exists; dropping");
                self.store.delete(key).await?;
                return Ok(());
            }
            Err(TargetResolutionError::Backend(reason)) => {
                return Err(DeliveryError::Resolution(reason));
            }
        };

        let (records, token) = match self.store.claim(key, self.lease, Utc::now()).await {
            Ok(claimed) => claimed,
            Err(StoreError::AlreadyClaimed(_)) => {
                tracing::info!(%key, "skipped digest delivery: another worker holds the claim");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if records.is_empty() {
            // Raced with a commit; nothing to deliver.
            tracing::debug!(%key, "claim yielded no records");
            self.abort_claim(&token, target.minimum_delay).await?;
            return Ok(());
        }

        let (digest, build_logs) = build_digest(&records);

        if digest.is_empty() {
            tracing::info!(
                %key,
                project = %target.project_name,
                ?build_logs,
                "skipped digest delivery due to empty digest"
            );
            self.commit_claim(&token, target.minimum_delay).await?;
            return Ok(());
        }

        match self.sink.notify(&target, &digest).await {
            Ok(()) => {
                self.commit_claim(&token, target.minimum_delay).await?;
                tracing::debug!(
                    %key,
                    records = digest.record_count(),
                    groups = digest.groups.len(),
                    "digest delivered"
                );
                Ok(())
            }
            Err(sink_error) => {
                tracing::error!(%key, error = %sink_error, "notification sink failed; aborting claim");
                self.abort_claim(&token, target.minimum_delay).await?;
                Err(DeliveryError::Sink(sink_error))
            }
        }
    }

    /// Commits a claim, treating a stale token as already resolved elsewhere.
    async fn commit_claim(
        &self,
        token: &ClaimToken,
        minimum_delay: Duration,
    ) -> Result<(), StoreError> {
        match self.store.commit(token, minimum_delay, Utc::now()).await {
            Err(StoreError::InvalidState(stale)) => {
                tracing::info!(key = %token.key, %stale, "skipped commit: claim already resolved");
                Ok(())
            }
            other => other,
        }
    }

    /// Aborts a claim, treating a stale token as already resolved elsewhere.
    async fn abort_claim(
        &self,
        token: &ClaimToken,
        minimum_delay: Duration,
    ) -> Result<(), StoreError> {
        match self.store.abort(token, minimum_delay, Utc::now()).await {
            Err(StoreError::InvalidState(stale)) => {
                tracing::info!(key = %token.key, %stale, "skipped abort: claim already resolved");
                Ok(())
            }
            other => other,
        }
    }
}
