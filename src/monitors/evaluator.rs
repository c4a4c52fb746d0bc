//! The check-in state machine: decides whether a monitored process has
//! recovered and recomputes its next expected deadlines.

use std::sync::Arc;

use crate::{
    models::monitor::{CheckIn, CheckInStatus, Monitor, MonitorStatus},
    monitors::{
        error::MonitorStoreError,
        store::{EnvironmentUpdate, MonitorStore},
    },
};

/// What an evaluation did with a check-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationOutcome {
    /// The environment state was updated.
    Applied,
    /// The recovery threshold window contained a non-OK check-in; no state
    /// change was made.
    Suppressed,
    /// A check-in with a newer timestamp already updated the environment;
    /// this one was discarded.
    Stale,
}

/// Evaluates incoming check-ins against per-environment monitor state.
///
/// The evaluator expects the check-in to already be recorded in the store's
/// history; the recovery window it inspects includes the current check-in.
pub struct CheckInEvaluator<S: MonitorStore> {
    store: Arc<S>,
}

impl<S: MonitorStore> CheckInEvaluator<S> {
    /// Creates an evaluator over the given store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Processes one check-in for the given monitor.
    ///
    /// With a positive `recovery_threshold`, the transition is suppressed
    /// entirely unless the most recent `recovery_threshold` check-ins
    /// (current included) are all OK; this debounces flapping monitors.
    /// The resulting update applies only if no newer check-in has already
    /// been recorded on the environment, which tolerates out-of-order
    /// delivery.
    #[tracing::instrument(skip(self, monitor), fields(monitor_id = monitor.id), level = "debug")]
    pub async fn evaluate(
        &self,
        monitor: &Monitor,
        checkin: &CheckIn,
    ) -> Result<EvaluationOutcome, MonitorStoreError> {
        let env_id = checkin.monitor_environment_id;
        let env = self
            .store
            .environment(env_id)
            .await?
            .ok_or(MonitorStoreError::EnvironmentNotFound(env_id))?;

        let threshold = monitor.config.recovery_threshold;
        if threshold > 0 {
            let recent = self.store.recent_checkins(env_id, threshold).await?;
            if !recent.iter().all(|c| c.status == CheckInStatus::Ok) {
                tracing::debug!(
                    monitor_environment_id = env_id,
                    threshold,
                    "recovery suppressed: window contains non-OK check-ins"
                );
                return Ok(EvaluationOutcome::Suppressed);
            }
        }

        let ts = checkin.date_added;
        let next_checkin = monitor.config.schedule.next_expected(ts);
        let next_checkin_latest =
            monitor.config.schedule.next_expected_latest(ts, monitor.config.checkin_margin);

        let mut update = EnvironmentUpdate {
            last_checkin: ts,
            next_checkin,
            next_checkin_latest,
            status: None,
            last_state_change: None,
        };
        if checkin.status == CheckInStatus::Ok {
            if monitor.status != MonitorStatus::Disabled {
                update.status = Some(MonitorStatus::Ok);
            }
            if env.status != MonitorStatus::Ok {
                update.last_state_change = Some(ts);
            }
        }

        let applied = self.store.update_environment(env_id, ts, &update).await?;
        if applied {
            Ok(EvaluationOutcome::Applied)
        } else {
            tracing::debug!(
                monitor_environment_id = env_id,
                checkin_ts = %ts,
                "discarded stale check-in: a newer one already updated the environment"
            );
            Ok(EvaluationOutcome::Stale)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{DateTime, TimeZone, Utc};

    use super::*;
    use crate::{
        models::monitor::{CheckInSchedule, MonitorConfig, MonitorEnvironment},
        monitors::store::InMemoryMonitorStore,
    };

    const ENV_ID: u64 = 1;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn monitor(recovery_threshold: u32, status: MonitorStatus) -> Monitor {
        Monitor {
            id: 5,
            name: "nightly-backup".to_string(),
            status,
            config: MonitorConfig {
                recovery_threshold,
                schedule: CheckInSchedule::Interval { every: Duration::from_secs(600) },
                checkin_margin: Duration::from_secs(120),
            },
        }
    }

    fn environment(status: MonitorStatus, last_checkin: Option<DateTime<Utc>>) -> MonitorEnvironment {
        MonitorEnvironment {
            id: ENV_ID,
            monitor_id: 5,
            environment: "production".to_string(),
            status,
            last_checkin,
            next_checkin: None,
            next_checkin_latest: None,
            last_state_change: None,
        }
    }

    fn checkin(status: CheckInStatus, ts: DateTime<Utc>) -> CheckIn {
        CheckIn { monitor_environment_id: ENV_ID, status, date_added: ts }
    }

    async fn setup(env: MonitorEnvironment, history: Vec<CheckIn>) -> Arc<InMemoryMonitorStore> {
        let store = Arc::new(InMemoryMonitorStore::new());
        store.upsert_environment(&env).await.unwrap();
        for entry in history {
            store.record_checkin(&entry).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_mixed_recovery_window_suppresses_transition() {
        // Window (newest first) is [OK, ERROR]; threshold 2 must suppress.
        let current = checkin(CheckInStatus::Ok, t(100));
        let store = setup(
            environment(MonitorStatus::Error, Some(t(50))),
            vec![checkin(CheckInStatus::Error, t(50)), current.clone()],
        )
        .await;
        let evaluator = CheckInEvaluator::new(store.clone());

        let outcome =
            evaluator.evaluate(&monitor(2, MonitorStatus::Active), &current).await.unwrap();
        assert_eq!(outcome, EvaluationOutcome::Suppressed);

        // No state change, no deadline recomputation.
        let env = store.environment(ENV_ID).await.unwrap().unwrap();
        assert_eq!(env.status, MonitorStatus::Error);
        assert_eq!(env.last_checkin, Some(t(50)));
        assert_eq!(env.next_checkin, None);
    }

    #[tokio::test]
    async fn test_all_ok_window_transitions_to_ok() {
        let current = checkin(CheckInStatus::Ok, t(100));
        let store = setup(
            environment(MonitorStatus::Error, Some(t(50))),
            vec![checkin(CheckInStatus::Ok, t(50)), current.clone()],
        )
        .await;
        let evaluator = CheckInEvaluator::new(store.clone());

        let outcome =
            evaluator.evaluate(&monitor(2, MonitorStatus::Active), &current).await.unwrap();
        assert_eq!(outcome, EvaluationOutcome::Applied);

        let env = store.environment(ENV_ID).await.unwrap().unwrap();
        assert_eq!(env.status, MonitorStatus::Ok);
        assert_eq!(env.last_checkin, Some(t(100)));
        assert_eq!(env.next_checkin, Some(t(700)));
        assert_eq!(env.next_checkin_latest, Some(t(820)));
        // Recovery boundary: previous status was not OK.
        assert_eq!(env.last_state_change, Some(t(100)));
    }

    #[tokio::test]
    async fn test_zero_threshold_skips_the_debounce() {
        let current = checkin(CheckInStatus::Ok, t(100));
        let store = setup(
            environment(MonitorStatus::Error, Some(t(50))),
            vec![checkin(CheckInStatus::Error, t(50)), current.clone()],
        )
        .await;
        let evaluator = CheckInEvaluator::new(store.clone());

        let outcome =
            evaluator.evaluate(&monitor(0, MonitorStatus::Active), &current).await.unwrap();
        assert_eq!(outcome, EvaluationOutcome::Applied);
        let env = store.environment(ENV_ID).await.unwrap().unwrap();
        assert_eq!(env.status, MonitorStatus::Ok);
    }

    #[tokio::test]
    async fn test_steady_ok_does_not_move_recovery_boundary() {
        let current = checkin(CheckInStatus::Ok, t(100));
        let store = setup(
            environment(MonitorStatus::Ok, Some(t(50))),
            vec![current.clone()],
        )
        .await;
        let evaluator = CheckInEvaluator::new(store.clone());

        let outcome =
            evaluator.evaluate(&monitor(0, MonitorStatus::Active), &current).await.unwrap();
        assert_eq!(outcome, EvaluationOutcome::Applied);
        let env = store.environment(ENV_ID).await.unwrap().unwrap();
        assert_eq!(env.last_state_change, None);
    }

    #[tokio::test]
    async fn test_disabled_monitor_keeps_status_but_updates_deadlines() {
        let current = checkin(CheckInStatus::Ok, t(100));
        let store = setup(
            environment(MonitorStatus::Error, Some(t(50))),
            vec![current.clone()],
        )
        .await;
        let evaluator = CheckInEvaluator::new(store.clone());

        let outcome =
            evaluator.evaluate(&monitor(0, MonitorStatus::Disabled), &current).await.unwrap();
        assert_eq!(outcome, EvaluationOutcome::Applied);

        let env = store.environment(ENV_ID).await.unwrap().unwrap();
        assert_eq!(env.status, MonitorStatus::Error);
        assert_eq!(env.next_checkin, Some(t(700)));
        // The recovery boundary still marks the OK check-in.
        assert_eq!(env.last_state_change, Some(t(100)));
    }

    #[tokio::test]
    async fn test_non_ok_checkin_updates_deadlines_without_transition() {
        let current = checkin(CheckInStatus::Error, t(100));
        let store = setup(
            environment(MonitorStatus::Ok, Some(t(50))),
            vec![current.clone()],
        )
        .await;
        let evaluator = CheckInEvaluator::new(store.clone());

        let outcome =
            evaluator.evaluate(&monitor(0, MonitorStatus::Active), &current).await.unwrap();
        assert_eq!(outcome, EvaluationOutcome::Applied);

        let env = store.environment(ENV_ID).await.unwrap().unwrap();
        assert_eq!(env.status, MonitorStatus::Ok);
        assert_eq!(env.last_checkin, Some(t(100)));
        assert_eq!(env.last_state_change, None);
    }

    #[tokio::test]
    async fn test_out_of_order_checkin_is_stale() {
        // last_checkin is t(100); an incoming check-in at t(50) must not
        // overwrite the newer state.
        let late = checkin(CheckInStatus::Ok, t(50));
        let store = setup(
            environment(MonitorStatus::Ok, Some(t(100))),
            vec![late.clone()],
        )
        .await;
        let evaluator = CheckInEvaluator::new(store.clone());

        let outcome =
            evaluator.evaluate(&monitor(0, MonitorStatus::Active), &late).await.unwrap();
        assert_eq!(outcome, EvaluationOutcome::Stale);

        let env = store.environment(ENV_ID).await.unwrap().unwrap();
        assert_eq!(env.last_checkin, Some(t(100)));
        assert_eq!(env.next_checkin, None);
    }

    #[tokio::test]
    async fn test_unknown_environment_is_an_error() {
        let store = Arc::new(InMemoryMonitorStore::new());
        let evaluator = CheckInEvaluator::new(store);

        let err = evaluator
            .evaluate(&monitor(0, MonitorStatus::Active), &checkin(CheckInStatus::Ok, t(0)))
            .await
            .unwrap_err();
        assert!(matches!(err, MonitorStoreError::EnvironmentNotFound(ENV_ID)));
    }
}
