//! Durable job queue on SQLite.
//!
//! Producers enqueue with an idempotency key; workers claim due jobs with an
//! atomic conditional update, so several processes sharing one database file
//! never run the same job twice.

pub mod inflight;
pub mod job;
pub mod policy;
pub mod store;
pub mod worker;

use thiserror::Error;

use crate::db::BlockingError;

pub use inflight::InflightRegistry;
pub use job::{Job, JobError, JobStatus, JobType};
pub use policy::RetryPolicy;
pub use store::{EnqueueOptions, EnqueueOutcome, FailOutcome, JobQueue};
pub use worker::{JobProcessor, Worker, WorkerPool, WorkerPoolOptions};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to encode job payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Blocking(#[from] BlockingError),
}

impl From<QueueError> for JobError {
    fn from(err: QueueError) -> Self {
        JobError::Retryable(err.to_string())
    }
}
