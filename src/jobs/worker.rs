//! Generic worker driver: claim, heartbeat, process, sweep.
//!
//! The driver is generic over the queue operations so the loop can be
//! exercised in tests without a database. Job processors signal
//! cooperative cancellation with `Error::Cancelled`, which is neither a
//! completion nor a failure: the row already carries status='cancelled'.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::queue::JobQueue;
use crate::config::Settings;
use crate::error::{Error, Result};

#[async_trait]
pub trait QueueOps: Send + Sync + 'static {
    fn worker_id(&self) -> &str;

    async fn claim_next(&self) -> Result<Option<i64>>;
    async fn update_heartbeat(&self, job_id: i64) -> Result<()>;
    async fn mark_completed(&self, job_id: i64) -> Result<()>;
    async fn mark_failed(&self, job_id: i64, error: &str) -> Result<()>;
    async fn reset_stale_jobs(&self) -> Result<u64>;
}

#[async_trait]
impl QueueOps for JobQueue {
    fn worker_id(&self) -> &str {
        JobQueue::worker_id(self)
    }

    async fn claim_next(&self) -> Result<Option<i64>> {
        JobQueue::claim_next(self).await
    }

    async fn update_heartbeat(&self, job_id: i64) -> Result<()> {
        JobQueue::update_heartbeat(self, job_id).await
    }

    async fn mark_completed(&self, job_id: i64) -> Result<()> {
        JobQueue::mark_completed(self, job_id).await
    }

    async fn mark_failed(&self, job_id: i64, error: &str) -> Result<()> {
        JobQueue::mark_failed(self, job_id, error).await
    }

    async fn reset_stale_jobs(&self) -> Result<u64> {
        JobQueue::reset_stale_jobs(self).await
    }
}

/// A job-type specialisation of the worker. Implementations probe
/// cancellation at their safe points and return `Error::Cancelled` to exit
/// cleanly.
#[async_trait]
pub trait JobProcessor: Send + Sync + 'static {
    fn kind(&self) -> &'static str;

    async fn process(&self, job_id: i64) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub sweep_interval: Duration,
}

impl From<&Settings> for WorkerConfig {
    fn from(s: &Settings) -> Self {
        Self {
            poll_interval: s.worker_poll_interval,
            heartbeat_interval: s.heartbeat_interval,
            sweep_interval: s.sweep_interval,
        }
    }
}

pub struct Worker<Q, P> {
    queue: Arc<Q>,
    processor: Arc<P>,
    config: WorkerConfig,
}

impl<Q: QueueOps, P: JobProcessor> Worker<Q, P> {
    pub fn new(queue: Arc<Q>, processor: Arc<P>, config: WorkerConfig) -> Self {
        Self {
            queue,
            processor,
            config,
        }
    }

    /// Main loop. Runs until the shutdown token fires; an in-flight job
    /// finishes its current safe point before the loop exits.
    pub async fn run(&self, shutdown: CancellationToken) {
        let worker_id = self.queue.worker_id().to_string();
        tracing::info!(%worker_id, kind = self.processor.kind(), "worker started");

        let sweeper = tokio::spawn(sweeper_loop(
            self.queue.clone(),
            self.config.sweep_interval,
            shutdown.clone(),
        ));

        while !shutdown.is_cancelled() {
            match self.queue.claim_next().await {
                Ok(Some(job_id)) => {
                    tracing::info!(%worker_id, job_id, "claimed job");
                    self.run_job(job_id, &worker_id).await;
                }
                Ok(None) => {
                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        () = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
                Err(e) => {
                    tracing::error!(%worker_id, error = %e, "claim failed");
                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        () = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
            }
        }

        sweeper.abort();
        tracing::info!(%worker_id, "worker stopped");
    }

    async fn run_job(&self, job_id: i64, worker_id: &str) {
        let heartbeat = tokio::spawn(heartbeat_loop(
            self.queue.clone(),
            job_id,
            self.config.heartbeat_interval,
        ));

        let result = self.processor.process(job_id).await;
        heartbeat.abort();

        match result {
            Ok(()) => {
                if let Err(e) = self.queue.mark_completed(job_id).await {
                    tracing::error!(%worker_id, job_id, error = %e, "mark_completed failed");
                } else {
                    tracing::info!(%worker_id, job_id, "job completed");
                }
            }
            // Cancellation is not a failure and must not consume a retry.
            Err(Error::Cancelled) => {
                tracing::info!(%worker_id, job_id, "job cancelled at safe point");
            }
            Err(e) => {
                tracing::warn!(%worker_id, job_id, error = %e, "job failed");
                if let Err(e) = self.queue.mark_failed(job_id, &e.to_string()).await {
                    tracing::error!(%worker_id, job_id, error = %e, "mark_failed failed");
                }
            }
        }
    }
}

async fn heartbeat_loop<Q: QueueOps>(queue: Arc<Q>, job_id: i64, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        if let Err(e) = queue.update_heartbeat(job_id).await {
            tracing::warn!(job_id, error = %e, "heartbeat failed");
        }
    }
}

async fn sweeper_loop<Q: QueueOps>(queue: Arc<Q>, interval: Duration, shutdown: CancellationToken) {
    while !shutdown.is_cancelled() {
        tokio::select! {
            () = shutdown.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
        match queue.reset_stale_jobs().await {
            Ok(0) => {}
            Ok(count) => tracing::info!(count, "reset stale jobs"),
            Err(e) => tracing::warn!(error = %e, "sweep failed"),
        }
    }
}
