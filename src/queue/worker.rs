//! Queue consumers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::job::{Job, JobError};
use super::store::{FailOutcome, JobQueue};
use super::QueueError;

/// Business logic behind the queue.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, job: &Job) -> Result<(), JobError>;

    /// Called once when a job moves to `dead`.
    async fn on_dead(&self, _job: &Job, _error: &JobError) {}
}

pub struct Worker {
    id: usize,
    queue: JobQueue,
    processor: Arc<dyn JobProcessor>,
    poll_interval: Duration,
    heartbeat_interval: Duration,
}

impl Worker {
    pub fn new(
        id: usize,
        queue: JobQueue,
        processor: Arc<dyn JobProcessor>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            id,
            queue,
            processor,
            poll_interval,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }

    /// How often a running job refreshes its claim. Must stay well under
    /// the stale recovery threshold.
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Claim and run at most one due job. Returns whether a job ran.
    pub async fn run_once(&self) -> Result<bool, QueueError> {
        self.run_once_until(&CancellationToken::new()).await
    }

    /// Like [`Worker::run_once`], but a cancelled `ctx` hands the claimed
    /// job back to the queue instead of dropping it mid-run.
    pub async fn run_once_until(&self, ctx: &CancellationToken) -> Result<bool, QueueError> {
        let Some(job) = self.queue.claim_next().await? else {
            return Ok(false);
        };

        debug!(
            worker = self.id,
            job_id = job.id,
            job_type = %job.job_type,
            attempt = job.attempts + 1,
            "Running job"
        );

        let Some(result) = self.execute(&job, ctx).await else {
            self.queue.release_claim(job.id).await?;
            info!(
                worker = self.id,
                job_id = job.id,
                job_type = %job.job_type,
                "Job interrupted by shutdown, returned to queue"
            );
            return Ok(true);
        };

        match result {
            Ok(()) => {
                self.queue.complete(job.id).await?;
                info!(worker = self.id, job_id = job.id, job_type = %job.job_type, "Job completed");
            }
            Err(e) => match self.queue.fail(&job, &e).await? {
                FailOutcome::Rescheduled { next_run_at } => {
                    warn!(
                        worker = self.id,
                        job_id = job.id,
                        job_type = %job.job_type,
                        error = %e,
                        next_run_at,
                        "Job failed, retry scheduled"
                    );
                }
                outcome => {
                    let reason = match outcome {
                        FailOutcome::AttemptsExhausted => "attempts exhausted",
                        _ => "fatal error",
                    };
                    error!(
                        worker = self.id,
                        job_id = job.id,
                        job_type = %job.job_type,
                        key = %job.idempotency_key,
                        error = %e,
                        reason,
                        "Job moved to dead letters"
                    );
                    self.processor.on_dead(&job, &e).await;
                }
            },
        }

        Ok(true)
    }

    /// Run the processor while heartbeating the claim. `None` when `ctx`
    /// was cancelled first.
    async fn execute(&self, job: &Job, ctx: &CancellationToken) -> Option<Result<(), JobError>> {
        let work = self.processor.process(job);
        tokio::pin!(work);

        let start = tokio::time::Instant::now() + self.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(start, self.heartbeat_interval);

        loop {
            tokio::select! {
                result = &mut work => return Some(result),
                _ = ctx.cancelled() => return None,
                _ = heartbeat.tick() => {
                    if let Err(e) = self.queue.heartbeat(job.id).await {
                        warn!(worker = self.id, job_id = job.id, error = %e, "Failed to refresh job claim");
                    }
                }
            }
        }
    }

    pub async fn run(self, ctx: CancellationToken) {
        debug!(worker = self.id, "Worker started");

        while !ctx.is_cancelled() {
            let idle = match self.run_once_until(&ctx).await {
                Ok(ran) => !ran,
                Err(e) => {
                    error!(worker = self.id, error = %e, "Queue error");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = ctx.cancelled() => break,
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }
        }

        debug!(worker = self.id, "Worker stopped");
    }
}

const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct WorkerPoolOptions {
    pub workers: usize,
    pub poll_interval: Duration,
    pub prune_interval: Duration,
    /// Running jobs not heartbeated for this long are requeued.
    pub stale_after: Duration,
}

impl Default for WorkerPoolOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval: Duration::from_secs(1),
            prune_interval: Duration::from_secs(60 * 60),
            stale_after: Duration::from_secs(15 * 60),
        }
    }
}

impl WorkerPoolOptions {
    fn heartbeat_interval(&self) -> Duration {
        (self.stale_after / 3).max(Duration::from_millis(1))
    }
}

pub struct WorkerPool {
    queue: JobQueue,
    processor: Arc<dyn JobProcessor>,
    options: WorkerPoolOptions,
}

impl WorkerPool {
    pub fn new(queue: JobQueue, processor: Arc<dyn JobProcessor>, options: WorkerPoolOptions) -> Self {
        Self {
            queue,
            processor,
            options,
        }
    }

    /// Spawn the workers and the maintenance task.
    pub fn spawn(self, ctx: CancellationToken) -> Vec<JoinHandle<()>> {
        let count = self.options.workers.max(1);
        info!(workers = count, "Starting queue workers");

        let mut handles: Vec<JoinHandle<()>> = (0..count)
            .map(|id| {
                let worker = Worker::new(
                    id,
                    self.queue.clone(),
                    self.processor.clone(),
                    self.options.poll_interval,
                )
                .with_heartbeat(self.options.heartbeat_interval());
                tokio::spawn(worker.run(ctx.clone()))
            })
            .collect();

        let queue = self.queue.clone();
        let stale_after = self.options.stale_after;
        let prune_interval = self.options.prune_interval;
        let recover_interval = self.options.heartbeat_interval();
        handles.push(tokio::spawn(async move {
            let mut prune = tokio::time::interval(prune_interval);
            let mut recover = tokio::time::interval(recover_interval);
            loop {
                tokio::select! {
                    _ = ctx.cancelled() => break,
                    _ = prune.tick() => {
                        if let Err(e) = queue.prune_completed().await {
                            warn!(error = %e, "Failed to prune completed jobs");
                        }
                    }
                    _ = recover.tick() => {
                        if let Err(e) = queue.requeue_stale(stale_after).await {
                            warn!(error = %e, "Failed to requeue stale jobs");
                        }
                    }
                }
            }
        }));

        handles
    }
}
