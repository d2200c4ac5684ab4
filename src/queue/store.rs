//! SQLite-backed job store.
//!
//! `JobRepository` holds the raw SQL over a borrowed connection;
//! `JobQueue` is the async handle shared by producers and workers.

use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::job::{Job, JobError, JobStatus, JobType};
use super::QueueError;
use crate::db::{self, SharedConnection};

/// Completed keys inside this window are not re-run.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub delay: Duration,
    /// Overrides the job type's policy.
    pub max_attempts: Option<u32>,
}

impl EnqueueOptions {
    pub fn delayed(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued(i64),
    /// A job with the same key is already queued or running.
    Duplicate(i64),
    /// The key completed within the retention window.
    AlreadyCompleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    Rescheduled { next_run_at: i64 },
    /// Retryable failure on the last allowed attempt.
    AttemptsExhausted,
    Fatal,
}

impl FailOutcome {
    pub fn is_dead(&self) -> bool {
        !matches!(self, Self::Rescheduled { .. })
    }
}

const JOB_COLUMNS: &str = "id, idempotency_key, job_type, payload, status, attempts, \
     max_attempts, next_run_at, last_error, created_at, updated_at";

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    let job_type: String = row.get(2)?;
    let status: String = row.get(4)?;
    Ok(Job {
        id: row.get(0)?,
        idempotency_key: row.get(1)?,
        job_type: JobType::parse(&job_type).ok_or_else(|| invalid_column(2, &job_type))?,
        payload: row.get(3)?,
        status: JobStatus::parse(&status).ok_or_else(|| invalid_column(4, &status))?,
        attempts: row.get(5)?,
        max_attempts: row.get(6)?,
        next_run_at: row.get(7)?,
        last_error: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn invalid_column(index: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Text,
        format!("unknown value '{}'", value).into(),
    )
}

fn immediate(conn: &Connection) -> rusqlite::Result<Transaction<'_>> {
    Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
}

pub struct JobRepository;

impl JobRepository {
    pub fn enqueue(
        conn: &Connection,
        job_type: JobType,
        payload: &str,
        idempotency_key: &str,
        options: &EnqueueOptions,
        retention: Duration,
        now: i64,
    ) -> Result<EnqueueOutcome, QueueError> {
        let tx = immediate(conn)?;

        let existing: Option<(i64, String, Option<i64>)> = tx
            .query_row(
                "SELECT id, status, completed_at FROM jobs WHERE idempotency_key = ?1",
                params![idempotency_key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let max_attempts = options
            .max_attempts
            .unwrap_or_else(|| job_type.policy().max_attempts)
            .max(1);
        let next_run_at = now + options.delay.as_millis() as i64;

        let outcome = match existing {
            None => {
                tx.execute(
                    "INSERT INTO jobs (idempotency_key, job_type, payload, status, attempts, \
                     max_attempts, next_run_at, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, 'queued', 0, ?4, ?5, ?6, ?6)",
                    params![
                        idempotency_key,
                        job_type.as_str(),
                        payload,
                        max_attempts,
                        next_run_at,
                        now
                    ],
                )?;
                EnqueueOutcome::Enqueued(tx.last_insert_rowid())
            }
            Some((id, status, completed_at)) => match JobStatus::parse(&status) {
                Some(JobStatus::Queued) | Some(JobStatus::Running) => EnqueueOutcome::Duplicate(id),
                Some(JobStatus::Completed)
                    if completed_at.unwrap_or(now) > now - retention.as_millis() as i64 =>
                {
                    EnqueueOutcome::AlreadyCompleted
                }
                _ => {
                    tx.execute(
                        "UPDATE jobs SET job_type = ?2, payload = ?3, status = 'queued', \
                         attempts = 0, max_attempts = ?4, next_run_at = ?5, last_error = NULL, \
                         completed_at = NULL, updated_at = ?6 WHERE id = ?1",
                        params![id, job_type.as_str(), payload, max_attempts, next_run_at, now],
                    )?;
                    debug!(job_id = id, key = %idempotency_key, "Re-armed job");
                    EnqueueOutcome::Enqueued(id)
                }
            },
        };

        tx.commit()?;
        Ok(outcome)
    }

    /// Atomically move the oldest due job from `queued` to `running`.
    pub fn claim_next(conn: &Connection, now: i64) -> Result<Option<Job>, QueueError> {
        let tx = immediate(conn)?;

        let candidate: Option<i64> = tx
            .query_row(
                "SELECT id FROM jobs WHERE status = 'queued' AND next_run_at <= ?1 \
                 ORDER BY next_run_at ASC, id ASC LIMIT 1",
                params![now],
                |row| row.get(0),
            )
            .optional()?;

        let Some(id) = candidate else {
            return Ok(None);
        };

        let changed = tx.execute(
            "UPDATE jobs SET status = 'running', updated_at = ?2 WHERE id = ?1 AND status = 'queued'",
            params![id, now],
        )?;
        if changed != 1 {
            return Ok(None);
        }

        let job = tx.query_row(
            &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
            params![id],
            job_from_row,
        )?;
        tx.commit()?;
        Ok(Some(job))
    }

    pub fn complete(conn: &Connection, id: i64, now: i64) -> Result<(), QueueError> {
        conn.execute(
            "UPDATE jobs SET status = 'completed', completed_at = ?2, updated_at = ?2, \
             last_error = NULL WHERE id = ?1",
            params![id, now],
        )?;
        Ok(())
    }

    pub fn fail(
        conn: &Connection,
        job: &Job,
        error: &JobError,
        now: i64,
    ) -> Result<FailOutcome, QueueError> {
        let attempts = job.attempts + 1;

        let outcome = match error {
            JobError::Fatal(_) => FailOutcome::Fatal,
            JobError::Retryable(_) if attempts >= job.max_attempts => FailOutcome::AttemptsExhausted,
            JobError::Retryable(_) => {
                let delay = job.job_type.policy().delay_for(attempts);
                FailOutcome::Rescheduled {
                    next_run_at: now + delay.as_millis() as i64,
                }
            }
        };

        match outcome {
            FailOutcome::Rescheduled { next_run_at } => {
                conn.execute(
                    "UPDATE jobs SET status = 'queued', attempts = ?2, next_run_at = ?3, \
                     last_error = ?4, updated_at = ?5 WHERE id = ?1",
                    params![job.id, attempts, next_run_at, error.to_string(), now],
                )?;
            }
            FailOutcome::AttemptsExhausted | FailOutcome::Fatal => {
                conn.execute(
                    "UPDATE jobs SET status = 'dead', attempts = ?2, last_error = ?3, \
                     updated_at = ?4 WHERE id = ?1",
                    params![job.id, attempts, error.to_string(), now],
                )?;
            }
        }

        Ok(outcome)
    }

    pub fn get(conn: &Connection, id: i64) -> Result<Option<Job>, QueueError> {
        let job = conn
            .query_row(
                &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
                params![id],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    pub fn find_by_key(conn: &Connection, key: &str) -> Result<Option<Job>, QueueError> {
        let job = conn
            .query_row(
                &format!("SELECT {} FROM jobs WHERE idempotency_key = ?1", JOB_COLUMNS),
                params![key],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    pub fn list_dead(conn: &Connection, limit: usize) -> Result<Vec<Job>, QueueError> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM jobs WHERE status = 'dead' ORDER BY updated_at DESC, id DESC LIMIT ?1",
            JOB_COLUMNS
        ))?;
        let jobs = stmt
            .query_map(params![limit as i64], job_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    /// Put a dead job back in the queue with a fresh attempt budget.
    pub fn retry_dead(conn: &Connection, id: i64, now: i64) -> Result<bool, QueueError> {
        let changed = conn.execute(
            "UPDATE jobs SET status = 'queued', attempts = 0, next_run_at = ?2, \
             updated_at = ?2 WHERE id = ?1 AND status = 'dead'",
            params![id, now],
        )?;
        Ok(changed == 1)
    }

    /// Mark a running job as still alive so stale recovery leaves it alone.
    pub fn heartbeat(conn: &Connection, id: i64, now: i64) -> Result<bool, QueueError> {
        let changed = conn.execute(
            "UPDATE jobs SET updated_at = ?2 WHERE id = ?1 AND status = 'running'",
            params![id, now],
        )?;
        Ok(changed == 1)
    }

    /// Hand a claimed job back to the queue without spending an attempt.
    pub fn release_claim(conn: &Connection, id: i64, now: i64) -> Result<bool, QueueError> {
        let changed = conn.execute(
            "UPDATE jobs SET status = 'queued', next_run_at = ?2, updated_at = ?2 \
             WHERE id = ?1 AND status = 'running'",
            params![id, now],
        )?;
        Ok(changed == 1)
    }

    /// Requeue jobs left `running` by a worker that never finished them.
    pub fn requeue_stale(conn: &Connection, running_before: i64, now: i64) -> Result<usize, QueueError> {
        let changed = conn.execute(
            "UPDATE jobs SET status = 'queued', next_run_at = ?2, updated_at = ?2 \
             WHERE status = 'running' AND updated_at < ?1",
            params![running_before, now],
        )?;
        Ok(changed)
    }

    pub fn prune_completed(conn: &Connection, completed_before: i64) -> Result<usize, QueueError> {
        let deleted = conn.execute(
            "DELETE FROM jobs WHERE status = 'completed' AND completed_at < ?1",
            params![completed_before],
        )?;
        Ok(deleted)
    }

    pub fn count_by_status(conn: &Connection) -> Result<Vec<(String, i64)>, QueueError> {
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status ORDER BY status")?;
        let counts = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(counts)
    }
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Async handle over the job store. Cheap to clone.
#[derive(Clone)]
pub struct JobQueue {
    conn: SharedConnection,
    retention: Duration,
}

impl JobQueue {
    pub fn new(conn: SharedConnection) -> Self {
        Self {
            conn,
            retention: DEFAULT_RETENTION,
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub async fn enqueue<P: Serialize>(
        &self,
        job_type: JobType,
        payload: &P,
        idempotency_key: &str,
        options: EnqueueOptions,
    ) -> Result<EnqueueOutcome, QueueError> {
        let payload = serde_json::to_string(payload)?;
        let key = idempotency_key.to_string();
        let retention = self.retention;

        let outcome = db::with_connection(&self.conn, move |conn| {
            JobRepository::enqueue(
                conn,
                job_type,
                &payload,
                &key,
                &options,
                retention,
                now_millis(),
            )
        })
        .await?;

        match outcome {
            EnqueueOutcome::Enqueued(id) => {
                info!(job_id = id, job_type = %job_type, key = %idempotency_key, "Job enqueued")
            }
            EnqueueOutcome::Duplicate(id) => {
                debug!(job_id = id, job_type = %job_type, key = %idempotency_key, "Job already pending")
            }
            EnqueueOutcome::AlreadyCompleted => {
                info!(job_type = %job_type, key = %idempotency_key, "Job already completed, skipping")
            }
        }
        Ok(outcome)
    }

    pub async fn claim_next(&self) -> Result<Option<Job>, QueueError> {
        db::with_connection(&self.conn, |conn| JobRepository::claim_next(conn, now_millis())).await
    }

    pub async fn complete(&self, id: i64) -> Result<(), QueueError> {
        db::with_connection(&self.conn, move |conn| {
            JobRepository::complete(conn, id, now_millis())
        })
        .await
    }

    pub async fn fail(&self, job: &Job, error: &JobError) -> Result<FailOutcome, QueueError> {
        let job = job.clone();
        let error = error.clone();
        db::with_connection(&self.conn, move |conn| {
            JobRepository::fail(conn, &job, &error, now_millis())
        })
        .await
    }

    pub async fn get(&self, id: i64) -> Result<Option<Job>, QueueError> {
        db::with_connection(&self.conn, move |conn| JobRepository::get(conn, id)).await
    }

    pub async fn find_by_key(&self, key: &str) -> Result<Option<Job>, QueueError> {
        let key = key.to_string();
        db::with_connection(&self.conn, move |conn| JobRepository::find_by_key(conn, &key)).await
    }

    pub async fn list_dead(&self, limit: usize) -> Result<Vec<Job>, QueueError> {
        db::with_connection(&self.conn, move |conn| JobRepository::list_dead(conn, limit)).await
    }

    pub async fn retry_dead(&self, id: i64) -> Result<bool, QueueError> {
        let retried = db::with_connection(&self.conn, move |conn| {
            JobRepository::retry_dead(conn, id, now_millis())
        })
        .await?;
        if retried {
            info!(job_id = id, "Dead job requeued");
        }
        Ok(retried)
    }

    pub async fn heartbeat(&self, id: i64) -> Result<bool, QueueError> {
        db::with_connection(&self.conn, move |conn| {
            JobRepository::heartbeat(conn, id, now_millis())
        })
        .await
    }

    pub async fn release_claim(&self, id: i64) -> Result<bool, QueueError> {
        db::with_connection(&self.conn, move |conn| {
            JobRepository::release_claim(conn, id, now_millis())
        })
        .await
    }

    pub async fn requeue_stale(&self, stale_after: Duration) -> Result<usize, QueueError> {
        let count = db::with_connection(&self.conn, move |conn| {
            let now = now_millis();
            JobRepository::requeue_stale(conn, now - stale_after.as_millis() as i64, now)
        })
        .await?;
        if count > 0 {
            warn!(count, "Requeued jobs left running by a previous worker");
        }
        Ok(count)
    }

    /// Delete completed jobs older than the retention window.
    pub async fn prune_completed(&self) -> Result<usize, QueueError> {
        let retention = self.retention;
        let deleted = db::with_connection(&self.conn, move |conn| {
            JobRepository::prune_completed(conn, now_millis() - retention.as_millis() as i64)
        })
        .await?;
        if deleted > 0 {
            debug!(deleted, "Pruned completed jobs");
        }
        Ok(deleted)
    }

    pub async fn count_by_status(&self) -> Result<Vec<(String, i64)>, QueueError> {
        db::with_connection(&self.conn, JobRepository::count_by_status).await
    }
}
