//! This module provides a concrete implementation of the digest and monitor
//! store contracts using SQLite.
//!
//! Claim exclusivity rests on guarded `UPDATE ... WHERE claim_token IS NULL`
//! row updates inside transactions, which gives the per-key compare-and-swap
//! semantics the contracts require. Timestamps are stored as unix
//! microseconds so range scans and guards are plain integer comparisons.

use std::{str::FromStr, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteConnectOptions, Row, SqlitePool};
use uuid::Uuid;

use crate::{
    digests::{
        error::StoreError,
        store::{ClaimToken, DigestStore, ScheduleEntry},
    },
    models::{
        monitor::{CheckIn, CheckInStatus, MonitorEnvironment, MonitorStatus},
        Record, TargetKey,
    },
    monitors::{
        error::MonitorStoreError,
        store::{EnvironmentUpdate, MonitorStore},
    },
    persistence::error::PersistenceError,
};

/// Schema for the digest buffer, schedule metadata and monitor state.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS digest_records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        target_key TEXT NOT NULL,
        recorded_at INTEGER NOT NULL,
        payload TEXT NOT NULL,
        claim_token TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_digest_records_target
        ON digest_records (target_key, claim_token)",
    "CREATE TABLE IF NOT EXISTS digest_schedule (
        target_key TEXT PRIMARY KEY,
        ready_at INTEGER,
        claim_token TEXT,
        claimed_at INTEGER
    )",
    "CREATE TABLE IF NOT EXISTS monitor_environments (
        id INTEGER PRIMARY KEY,
        monitor_id INTEGER NOT NULL,
        environment TEXT NOT NULL,
        status TEXT NOT NULL,
        last_checkin INTEGER,
        next_checkin INTEGER,
        next_checkin_latest INTEGER,
        last_state_change INTEGER
    )",
    "CREATE TABLE IF NOT EXISTS monitor_checkins (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        monitor_environment_id INTEGER NOT NULL,
        status TEXT NOT NULL,
        date_added INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_monitor_checkins_env
        ON monitor_checkins (monitor_environment_id, date_added DESC)",
];

fn micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

fn from_micros(value: i64) -> Result<DateTime<Utc>, PersistenceError> {
    DateTime::from_timestamp_micros(value).ok_or_else(|| {
        PersistenceError::SerializationError(format!("timestamp out of range: {value}"))
    })
}

fn operation_failed(operation: &str) -> impl FnOnce(sqlx::Error) -> PersistenceError + '_ {
    move |e| {
        tracing::error!(error = %e, operation, "database operation failed");
        PersistenceError::OperationFailed(format!("{operation}: {e}"))
    }
}

fn parse_key(raw: &str) -> Result<TargetKey, PersistenceError> {
    raw.parse().map_err(|e| {
        PersistenceError::SerializationError(format!("stored target key {raw:?}: {e}"))
    })
}

/// A SQLite-backed state repository implementing both [`DigestStore`] and
/// [`MonitorStore`].
pub struct SqliteStateRepository {
    pool: SqlitePool,
    /// Optional cap on buffered records per target; oldest are truncated on
    /// append.
    capacity: Option<usize>,
}

impl SqliteStateRepository {
    /// Connects to the database at `database_url`, creating the file if it
    /// does not exist.
    #[tracing::instrument(level = "info")]
    pub async fn new(database_url: &str) -> Result<Self, PersistenceError> {
        tracing::debug!(database_url, "Attempting to connect to SQLite database.");
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| PersistenceError::InvalidInput(e.to_string()))?
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            PersistenceError::OperationFailed(format!("Failed to connect to database: {e}"))
        })?;
        tracing::info!(database_url, "Successfully connected to SQLite database.");
        Ok(Self { pool, capacity: None })
    }

    /// Sets the per-target record capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Creates the schema if it does not exist yet.
    #[tracing::instrument(skip(self), level = "info")]
    pub async fn run_migrations(&self) -> Result<(), PersistenceError> {
        tracing::debug!("Running database migrations.");
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| PersistenceError::MigrationError(e.to_string()))?;
        }
        tracing::info!("Database migrations completed successfully.");
        Ok(())
    }

    /// Closes the connection pool gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Reschedules or drops a target's schedule row after its claim was
    /// released, depending on whether unclaimed records remain.
    async fn settle_schedule_row(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        key_str: &str,
        minimum_delay: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        let remaining: i64 =
            sqlx::query("SELECT COUNT(*) AS cnt FROM digest_records WHERE target_key = ?")
                .bind(key_str)
                .fetch_one(&mut **tx)
                .await
                .map_err(operation_failed("count remaining records"))?
                .try_get("cnt")
                .map_err(operation_failed("read remaining record count"))?;

        if remaining > 0 {
            sqlx::query("UPDATE digest_schedule SET ready_at = ? WHERE target_key = ?")
                .bind(micros(now + minimum_delay))
                .bind(key_str)
                .execute(&mut **tx)
                .await
                .map_err(operation_failed("reschedule target"))?;
        } else {
            sqlx::query("DELETE FROM digest_schedule WHERE target_key = ?")
                .bind(key_str)
                .execute(&mut **tx)
                .await
                .map_err(operation_failed("drop empty schedule row"))?;
        }
        Ok(())
    }

    /// Releases the schedule row's claim if `token` still owns it. Returns
    /// false when the token is stale.
    async fn release_claim_row(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        key_str: &str,
        token: &Uuid,
    ) -> Result<bool, PersistenceError> {
        let released = sqlx::query(
            "UPDATE digest_schedule SET claim_token = NULL, claimed_at = NULL
                WHERE target_key = ? AND claim_token = ?",
        )
        .bind(key_str)
        .bind(token.to_string())
        .execute(&mut **tx)
        .await
        .map_err(operation_failed("release claim"))?
        .rows_affected();
        Ok(released > 0)
    }
}

#[async_trait]
impl DigestStore for SqliteStateRepository {
    #[tracing::instrument(skip(self, record), level = "debug")]
    async fn append(
        &self,
        key: &TargetKey,
        record: Record,
        minimum_delay: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<ScheduleEntry>, StoreError> {
        let key_str = key.to_string();
        let payload = serde_json::to_string(&record.payload)
            .map_err(|e| PersistenceError::SerializationError(e.to_string()))?;

        let mut tx = self.pool.begin().await.map_err(operation_failed("begin append"))?;

        sqlx::query(
            "INSERT INTO digest_records (target_key, recorded_at, payload) VALUES (?, ?, ?)",
        )
        .bind(&key_str)
        .bind(micros(record.timestamp))
        .bind(&payload)
        .execute(&mut *tx)
        .await
        .map_err(operation_failed("append record"))?;

        if let Some(capacity) = self.capacity {
            sqlx::query(
                "DELETE FROM digest_records
                    WHERE target_key = ? AND claim_token IS NULL AND id NOT IN (
                        SELECT id FROM digest_records
                            WHERE target_key = ? AND claim_token IS NULL
                            ORDER BY id DESC LIMIT ?)",
            )
            .bind(&key_str)
            .bind(&key_str)
            .bind(capacity as i64)
            .execute(&mut *tx)
            .await
            .map_err(operation_failed("truncate to capacity"))?;
        }

        let ready_at = now + minimum_delay;
        let inserted = sqlx::query(
            "INSERT INTO digest_schedule (target_key, ready_at) VALUES (?, ?)
                ON CONFLICT(target_key) DO NOTHING",
        )
        .bind(&key_str)
        .bind(micros(ready_at))
        .execute(&mut *tx)
        .await
        .map_err(operation_failed("schedule target"))?
        .rows_affected();

        tx.commit().await.map_err(operation_failed("commit append"))?;

        if inserted > 0 {
            Ok(Some(ScheduleEntry { key: key.clone(), ready_at }))
        } else {
            Ok(None)
        }
    }

    #[tracing::instrument(skip(self), level = "debug")]
    async fn claim(
        &self,
        key: &TargetKey,
        _lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<(Vec<Record>, ClaimToken), StoreError> {
        let key_str = key.to_string();
        let token = Uuid::new_v4();

        let mut tx = self.pool.begin().await.map_err(operation_failed("begin claim"))?;

        // Make sure a schedule row exists to carry the claim, then take it
        // only if no one else holds it.
        sqlx::query(
            "INSERT INTO digest_schedule (target_key, ready_at) VALUES (?, NULL)
                ON CONFLICT(target_key) DO NOTHING",
        )
        .bind(&key_str)
        .execute(&mut *tx)
        .await
        .map_err(operation_failed("ensure schedule row"))?;

        let taken = sqlx::query(
            "UPDATE digest_schedule
                SET claim_token = ?, claimed_at = ?, ready_at = NULL
                WHERE target_key = ? AND claim_token IS NULL",
        )
        .bind(token.to_string())
        .bind(micros(now))
        .bind(&key_str)
        .execute(&mut *tx)
        .await
        .map_err(operation_failed("take claim"))?
        .rows_affected();

        if taken == 0 {
            tx.rollback().await.map_err(operation_failed("rollback claim"))?;
            return Err(StoreError::AlreadyClaimed(key.clone()));
        }

        sqlx::query(
            "UPDATE digest_records SET claim_token = ?
                WHERE target_key = ? AND claim_token IS NULL",
        )
        .bind(token.to_string())
        .bind(&key_str)
        .execute(&mut *tx)
        .await
        .map_err(operation_failed("detach records"))?;

        let rows = sqlx::query(
            "SELECT recorded_at, payload FROM digest_records
                WHERE claim_token = ? ORDER BY id ASC",
        )
        .bind(token.to_string())
        .fetch_all(&mut *tx)
        .await
        .map_err(operation_failed("fetch claimed records"))?;

        tx.commit().await.map_err(operation_failed("commit claim"))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let recorded_at: i64 =
                row.try_get("recorded_at").map_err(operation_failed("read recorded_at"))?;
            let payload: String =
                row.try_get("payload").map_err(operation_failed("read payload"))?;
            let payload = serde_json::from_str(&payload)
                .map_err(|e| PersistenceError::SerializationError(e.to_string()))?;
            records.push(Record::new(from_micros(recorded_at)?, payload));
        }

        Ok((records, ClaimToken { key: key.clone(), token, claimed_at: now }))
    }

    #[tracing::instrument(skip(self), level = "debug")]
    async fn commit(
        &self,
        token: &ClaimToken,
        minimum_delay: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let key_str = token.key.to_string();
        let mut tx = self.pool.begin().await.map_err(operation_failed("begin commit"))?;

        if !Self::release_claim_row(&mut tx, &key_str, &token.token).await? {
            tx.rollback().await.map_err(operation_failed("rollback commit"))?;
            return Err(StoreError::InvalidState(token.token));
        }

        sqlx::query("DELETE FROM digest_records WHERE claim_token = ?")
            .bind(token.token.to_string())
            .execute(&mut *tx)
            .await
            .map_err(operation_failed("delete committed records"))?;

        Self::settle_schedule_row(&mut tx, &key_str, minimum_delay, now).await?;
        tx.commit().await.map_err(operation_failed("finish commit"))?;
        Ok(())
    }

    #[tracing::instrument(skip(self), level = "debug")]
    async fn abort(
        &self,
        token: &ClaimToken,
        minimum_delay: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let key_str = token.key.to_string();
        let mut tx = self.pool.begin().await.map_err(operation_failed("begin abort"))?;

        if !Self::release_claim_row(&mut tx, &key_str, &token.token).await? {
            tx.rollback().await.map_err(operation_failed("rollback abort"))?;
            return Err(StoreError::InvalidState(token.token));
        }

        // Detached records keep their original ids, so reattaching them
        // preserves append order ahead of later appends.
        sqlx::query("UPDATE digest_records SET claim_token = NULL WHERE claim_token = ?")
            .bind(token.token.to_string())
            .execute(&mut *tx)
            .await
            .map_err(operation_failed("reattach records"))?;

        Self::settle_schedule_row(&mut tx, &key_str, minimum_delay, now).await?;
        tx.commit().await.map_err(operation_failed("finish abort"))?;
        Ok(())
    }

    async fn sweep_ready(&self, now: DateTime<Utc>) -> Result<Vec<TargetKey>, StoreError> {
        let rows = sqlx::query(
            "SELECT target_key FROM digest_schedule
                WHERE claim_token IS NULL AND ready_at IS NOT NULL AND ready_at <= ?",
        )
        .bind(micros(now))
        .fetch_all(&self.pool)
        .await
        .map_err(operation_failed("sweep ready targets"))?;

        let mut keys = Vec::with_capacity(rows.len());
        for row in rows {
            let raw: String =
                row.try_get("target_key").map_err(operation_failed("read target key"))?;
            keys.push(parse_key(&raw)?);
        }
        Ok(keys)
    }

    #[tracing::instrument(skip(self), level = "debug")]
    async fn reclaim_expired(
        &self,
        before: DateTime<Utc>,
        minimum_delay: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let rows = sqlx::query(
            "SELECT target_key, claim_token, claimed_at FROM digest_schedule
                WHERE claim_token IS NOT NULL AND claimed_at < ?",
        )
        .bind(micros(before))
        .fetch_all(&self.pool)
        .await
        .map_err(operation_failed("scan expired claims"))?;

        for row in rows {
            let raw_key: String =
                row.try_get("target_key").map_err(operation_failed("read target key"))?;
            let raw_token: String =
                row.try_get("claim_token").map_err(operation_failed("read claim token"))?;
            let claimed_at: i64 =
                row.try_get("claimed_at").map_err(operation_failed("read claimed_at"))?;

            let stale = ClaimToken {
                key: parse_key(&raw_key)?,
                token: Uuid::parse_str(&raw_token).map_err(|e| {
                    PersistenceError::SerializationError(format!("claim token {raw_token:?}: {e}"))
                })?,
                claimed_at: from_micros(claimed_at)?,
            };

            tracing::warn!(key = %stale.key, claimed_at = %stale.claimed_at, "reclaiming expired claim");
            match self.abort(&stale, minimum_delay, now).await {
                // Raced with the owner resolving it; nothing left to do.
                Err(StoreError::InvalidState(_)) | Ok(()) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &TargetKey) -> Result<(), StoreError> {
        let key_str = key.to_string();
        let mut tx = self.pool.begin().await.map_err(operation_failed("begin delete"))?;
        sqlx::query("DELETE FROM digest_records WHERE target_key = ?")
            .bind(&key_str)
            .execute(&mut *tx)
            .await
            .map_err(operation_failed("delete records"))?;
        sqlx::query("DELETE FROM digest_schedule WHERE target_key = ?")
            .bind(&key_str)
            .execute(&mut *tx)
            .await
            .map_err(operation_failed("delete schedule row"))?;
        tx.commit().await.map_err(operation_failed("finish delete"))?;
        Ok(())
    }
}

#[async_trait]
impl MonitorStore for SqliteStateRepository {
    async fn record_checkin(&self, checkin: &CheckIn) -> Result<(), MonitorStoreError> {
        sqlx::query(
            "INSERT INTO monitor_checkins (monitor_environment_id, status, date_added)
                VALUES (?, ?, ?)",
        )
        .bind(checkin.monitor_environment_id as i64)
        .bind(checkin.status.as_str())
        .bind(micros(checkin.date_added))
        .execute(&self.pool)
        .await
        .map_err(operation_failed("record check-in"))?;
        Ok(())
    }

    async fn recent_checkins(
        &self,
        monitor_environment_id: u64,
        limit: u32,
    ) -> Result<Vec<CheckIn>, MonitorStoreError> {
        let rows = sqlx::query(
            "SELECT status, date_added FROM monitor_checkins
                WHERE monitor_environment_id = ?
                ORDER BY date_added DESC, id DESC LIMIT ?",
        )
        .bind(monitor_environment_id as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(operation_failed("fetch recent check-ins"))?;

        let mut checkins = Vec::with_capacity(rows.len());
        for row in rows {
            let status: String =
                row.try_get("status").map_err(operation_failed("read status"))?;
            let date_added: i64 =
                row.try_get("date_added").map_err(operation_failed("read date_added"))?;
            checkins.push(CheckIn {
                monitor_environment_id,
                status: CheckInStatus::from_str(&status)
                    .map_err(|e| PersistenceError::SerializationError(e.to_string()))?,
                date_added: from_micros(date_added)?,
            });
        }
        Ok(checkins)
    }

    async fn environment(
        &self,
        monitor_environment_id: u64,
    ) -> Result<Option<MonitorEnvironment>, MonitorStoreError> {
        let row = sqlx::query(
            "SELECT monitor_id, environment, status, last_checkin, next_checkin,
                    next_checkin_latest, last_state_change
                FROM monitor_environments WHERE id = ?",
        )
        .bind(monitor_environment_id as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(operation_failed("fetch environment"))?;

        let Some(row) = row else { return Ok(None) };

        let read_ts = |column: &str| -> Result<Option<DateTime<Utc>>, MonitorStoreError> {
            let value: Option<i64> =
                row.try_get(column).map_err(operation_failed("read environment timestamp"))?;
            Ok(match value {
                Some(v) => Some(from_micros(v)?),
                None => None,
            })
        };

        let monitor_id: i64 =
            row.try_get("monitor_id").map_err(operation_failed("read monitor id"))?;
        let environment: String =
            row.try_get("environment").map_err(operation_failed("read environment name"))?;
        let status: String = row.try_get("status").map_err(operation_failed("read status"))?;

        Ok(Some(MonitorEnvironment {
            id: monitor_environment_id,
            monitor_id: monitor_id as u64,
            environment,
            status: MonitorStatus::from_str(&status)
                .map_err(|e| PersistenceError::SerializationError(e.to_string()))?,
            last_checkin: read_ts("last_checkin")?,
            next_checkin: read_ts("next_checkin")?,
            next_checkin_latest: read_ts("next_checkin_latest")?,
            last_state_change: read_ts("last_state_change")?,
        }))
    }

    async fn upsert_environment(&self, env: &MonitorEnvironment) -> Result<(), MonitorStoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO monitor_environments
                (id, monitor_id, environment, status, last_checkin, next_checkin,
                 next_checkin_latest, last_state_change)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(env.id as i64)
        .bind(env.monitor_id as i64)
        .bind(&env.environment)
        .bind(env.status.as_str())
        .bind(env.last_checkin.map(micros))
        .bind(env.next_checkin.map(micros))
        .bind(env.next_checkin_latest.map(micros))
        .bind(env.last_state_change.map(micros))
        .execute(&self.pool)
        .await
        .map_err(operation_failed("upsert environment"))?;
        Ok(())
    }

    async fn update_environment(
        &self,
        monitor_environment_id: u64,
        guard_ts: DateTime<Utc>,
        update: &EnvironmentUpdate,
    ) -> Result<bool, MonitorStoreError> {
        // Single guarded UPDATE: the timestamp check and the write are one
        // atomic statement, which keeps out-of-order check-ins from clobbering
        // newer state.
        let updated = sqlx::query(
            "UPDATE monitor_environments SET
                    last_checkin = ?,
                    next_checkin = ?,
                    next_checkin_latest = ?,
                    status = COALESCE(?, status),
                    last_state_change = COALESCE(?, last_state_change)
                WHERE id = ? AND (last_checkin IS NULL OR last_checkin <= ?)",
        )
        .bind(micros(update.last_checkin))
        .bind(micros(update.next_checkin))
        .bind(micros(update.next_checkin_latest))
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.last_state_change.map(micros))
        .bind(monitor_environment_id as i64)
        .bind(micros(guard_ts))
        .execute(&self.pool)
        .await
        .map_err(operation_failed("update environment"))?
        .rows_affected();

        if updated == 0 {
            // Distinguish a lost guard from a missing row.
            let exists = sqlx::query("SELECT 1 AS one FROM monitor_environments WHERE id = ?")
                .bind(monitor_environment_id as i64)
                .fetch_optional(&self.pool)
                .await
                .map_err(operation_failed("check environment exists"))?;
            if exists.is_none() {
                return Err(MonitorStoreError::EnvironmentNotFound(monitor_environment_id));
            }
        }
        Ok(updated > 0)
    }
}
