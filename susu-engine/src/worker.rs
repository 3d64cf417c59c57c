/// Worker loop
///
/// Polls the queue, claims due jobs, and dispatches each to its
/// handler. Claims are batched up to the configured concurrency and the
/// batch runs concurrently; `SKIP LOCKED` claiming makes it safe to run
/// several workers against one database.
///
/// Shutdown is cooperative: on cancellation the loop stops claiming and
/// returns after the in-flight batch completes.
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use susu_shared::config::Config;
use susu_shared::models::{JobKind, ScheduledJob};

use crate::control::GroupControl;
use crate::error::EngineError;
use crate::orchestrator::CycleOrchestrator;
use crate::queue::JobQueue;
use crate::recovery::RecoverySweeper;
use crate::retry::RetryCoordinator;

/// Claims and executes scheduled jobs
pub struct Worker {
    queue: JobQueue,
    orchestrator: CycleOrchestrator,
    retry: RetryCoordinator,
    control: GroupControl,
    sweeper: RecoverySweeper,
    config: Arc<Config>,
}

impl Worker {
    pub fn new(
        queue: JobQueue,
        orchestrator: CycleOrchestrator,
        retry: RetryCoordinator,
        control: GroupControl,
        sweeper: RecoverySweeper,
        config: Arc<Config>,
    ) -> Self {
        Self {
            queue,
            orchestrator,
            retry,
            control,
            sweeper,
            config,
        }
    }

    /// Runs the poll loop until cancelled
    ///
    /// Starts with a recovery sweep so work lost while the process was
    /// down is re-armed before the first claim.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        info!(
            poll_interval_secs = self.config.worker.poll_interval_secs,
            max_concurrent_jobs = self.config.worker.max_concurrent_jobs,
            "Worker starting"
        );

        self.sweeper.sweep().await;

        let mut poll =
            tokio::time::interval(Duration::from_secs(self.config.worker.poll_interval_secs));
        let mut sweep =
            tokio::time::interval(Duration::from_secs(self.config.worker.sweep_interval_secs));
        // The first sweep tick fires immediately; the startup sweep
        // above already covered it.
        sweep.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Worker shutting down");
                    break;
                }
                _ = sweep.tick() => {
                    self.sweeper.sweep().await;
                }
                _ = poll.tick() => {
                    match self.poll_once().await {
                        Ok(0) => {}
                        Ok(n) => debug!(jobs = n, "Processed batch"),
                        Err(err) => error!(error = %err, "Poll failed"),
                    }
                }
            }
        }

        Ok(())
    }

    /// Claims one batch of due jobs and runs it to completion
    pub async fn poll_once(&self) -> Result<usize, EngineError> {
        let jobs = self
            .queue
            .claim_due(self.config.worker.max_concurrent_jobs as i64)
            .await?;

        if jobs.is_empty() {
            return Ok(0);
        }

        let count = jobs.len();
        let handles = jobs.into_iter().map(|job| self.execute(job));
        futures::future::join_all(handles).await;

        Ok(count)
    }

    /// Runs one job and records its outcome
    async fn execute(&self, job: ScheduledJob) {
        debug!(
            job_id = %job.id,
            job_key = %job.job_key,
            kind = job.kind.as_str(),
            attempt = job.attempts,
            "Executing job"
        );

        let result = self.dispatch(&job).await;

        let outcome = match result {
            Ok(()) => self.queue.mark_succeeded(job.id).await,
            Err(err) => {
                self.queue
                    .mark_failed(
                        &job,
                        &err.to_string(),
                        err.is_retryable(),
                        self.config.worker.job_max_attempts,
                    )
                    .await
            }
        };

        if let Err(err) = outcome {
            error!(job_id = %job.id, error = %err, "Failed to record job outcome");
        }
    }

    async fn dispatch(&self, job: &ScheduledJob) -> Result<(), EngineError> {
        match job.kind {
            JobKind::StartCycle => {
                let group_id = job.group_id.ok_or(EngineError::MalformedJob {
                    job_id: job.id,
                    detail: "start_cycle job without group_id".to_string(),
                })?;
                self.orchestrator.start_cycle(group_id).await
            }
            JobKind::RetryPayment => {
                let payment_id = job.payment_id.ok_or(EngineError::MalformedJob {
                    job_id: job.id,
                    detail: "retry_payment job without payment_id".to_string(),
                })?;
                self.retry.retry_payment(payment_id).await
            }
            JobKind::PauseNotice => {
                let group_id = job.group_id.ok_or(EngineError::MalformedJob {
                    job_id: job.id,
                    detail: "pause_notice job without group_id".to_string(),
                })?;
                self.control.send_pause_notice(group_id).await
            }
        }
    }
}
