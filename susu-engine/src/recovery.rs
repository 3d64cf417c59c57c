/// Recovery sweeping
///
/// The queue is durable but the code that feeds it can die between a
/// state write and the matching enqueue. The sweeper closes those gaps:
/// it runs at startup and on an interval, re-arming any wake-up, retry,
/// or pause notice the database says should exist but the queue lost.
/// Everything it enqueues dedups on the same deterministic keys the
/// live paths use, so sweeping over a healthy system is a no-op.
///
/// Each group and payment is handled in isolation: a failure on one row
/// is logged and skipped, and a failed pass never blocks the passes
/// after it. A sweep always runs to the end.
use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::Rng;
use sqlx::PgPool;
use tracing::{info, warn};

use susu_shared::config::Config;
use susu_shared::models::{Group, JobKind, PauseReason, Payment};

use crate::control::GroupControl;
use crate::error::EngineError;
use crate::queue::{JobQueue, NewJob};
use crate::scheduler::{
    pause_notice_key, retry_payment_key, Scheduler, PRIORITY_PAUSE_NOTICE, PRIORITY_RETRY_PAYMENT,
};

/// Spread re-armed retries over this window to avoid a thundering herd
const RETRY_STAGGER_SECS: i64 = 300;

/// What one sweep pass re-armed
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub rearmed_wakeups: u64,
    pub rearmed_retries: u64,
    pub rearmed_notices: u64,
    pub retired_groups: u64,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.rearmed_wakeups == 0
            && self.rearmed_retries == 0
            && self.rearmed_notices == 0
            && self.retired_groups == 0
    }
}

/// Re-arms queue work lost to crashes
#[derive(Clone)]
pub struct RecoverySweeper {
    pool: PgPool,
    queue: JobQueue,
    scheduler: Scheduler,
    control: GroupControl,
    config: Arc<Config>,
}

impl RecoverySweeper {
    pub fn new(
        pool: PgPool,
        queue: JobQueue,
        scheduler: Scheduler,
        control: GroupControl,
        config: Arc<Config>,
    ) -> Self {
        Self {
            pool,
            queue,
            scheduler,
            control,
            config,
        }
    }

    /// Runs all recovery passes
    ///
    /// Never fails: a pass that cannot even list its candidates logs and
    /// contributes zero, and the remaining passes still run.
    pub async fn sweep(&self) -> SweepReport {
        let report = SweepReport {
            rearmed_wakeups: self.sweep_cycle_wakeups().await.unwrap_or_else(|err| {
                warn!(error = %err, "Cycle wake-up sweep pass failed");
                0
            }),
            rearmed_retries: self.sweep_payment_retries().await.unwrap_or_else(|err| {
                warn!(error = %err, "Payment retry sweep pass failed");
                0
            }),
            rearmed_notices: self.sweep_pause_notices().await.unwrap_or_else(|err| {
                warn!(error = %err, "Pause notice sweep pass failed");
                0
            }),
            retired_groups: self.sweep_completed_groups().await.unwrap_or_else(|err| {
                warn!(error = %err, "Completed group sweep pass failed");
                0
            }),
        };

        if report.is_empty() {
            info!("Recovery sweep found nothing to re-arm");
        } else {
            warn!(
                wakeups = report.rearmed_wakeups,
                retries = report.rearmed_retries,
                notices = report.rearmed_notices,
                retired = report.retired_groups,
                "Recovery sweep re-armed lost work"
            );
        }

        report
    }

    /// Re-arms wake-ups for active groups with a next cycle date
    ///
    /// `schedule_wake` keys on the stored date, so groups whose wake-up
    /// is already queued are untouched.
    async fn sweep_cycle_wakeups(&self) -> Result<u64, EngineError> {
        let groups = Group::list_active_incomplete(&self.pool).await?;
        let mut rearmed = 0u64;

        for group in &groups {
            match self.rearm_wakeup(group).await {
                Ok(true) => rearmed += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(group_id = %group.id, error = %err, "Skipping group in wake-up sweep");
                }
            }
        }

        Ok(rearmed)
    }

    async fn rearm_wakeup(&self, group: &Group) -> Result<bool, EngineError> {
        let prefix = crate::scheduler::start_cycle_prefix(group.id);
        if self.queue.has_pending_with_prefix(&prefix).await? {
            return Ok(false);
        }

        self.scheduler.schedule_wake(group).await
    }

    /// Re-arms retries for failed payments still under the budget
    ///
    /// Re-armed retries are staggered with random jitter so a large
    /// backlog doesn't hit the gateway in one burst.
    async fn sweep_payment_retries(&self) -> Result<u64, EngineError> {
        let failed =
            Payment::list_failed_retryable(&self.pool, self.config.retry.max_retries).await?;
        let mut rearmed = 0u64;

        for payment in &failed {
            match self.rearm_retry(payment).await {
                Ok(true) => rearmed += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(
                        payment_id = %payment.id,
                        group_id = %payment.group_id,
                        error = %err,
                        "Skipping payment in retry sweep"
                    );
                }
            }
        }

        Ok(rearmed)
    }

    async fn rearm_retry(&self, payment: &Payment) -> Result<bool, EngineError> {
        let group = Group::find_by_id(&self.pool, payment.group_id).await?;
        if !group.map(|g| g.is_active()).unwrap_or(false) {
            return Ok(false);
        }

        let jitter = rand::thread_rng().gen_range(0..RETRY_STAGGER_SECS);
        let run_at = Utc::now() + Duration::seconds(jitter);

        let enqueued = self
            .queue
            .enqueue(NewJob {
                job_key: retry_payment_key(payment.id, payment.retry_count),
                kind: JobKind::RetryPayment,
                group_id: Some(payment.group_id),
                payment_id: Some(payment.id),
                run_at,
                priority: PRIORITY_RETRY_PAYMENT,
            })
            .await?;

        Ok(enqueued.is_some())
    }

    /// Re-arms pause notices that were lost before reaching the queue
    ///
    /// A notice job that ever existed (pending or finished) means the
    /// notice path ran; only paused groups with no trace of one get a
    /// fresh job.
    async fn sweep_pause_notices(&self) -> Result<u64, EngineError> {
        let paused = Group::list_paused(&self.pool).await?;
        let mut rearmed = 0u64;

        for group in &paused {
            match self.rearm_notice(group).await {
                Ok(true) => rearmed += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(group_id = %group.id, error = %err, "Skipping group in notice sweep");
                }
            }
        }

        Ok(rearmed)
    }

    async fn rearm_notice(&self, group: &Group) -> Result<bool, EngineError> {
        let key = pause_notice_key(group.id);
        if self.queue.exists_with_key(&key).await? {
            return Ok(false);
        }

        let enqueued = self
            .queue
            .enqueue(NewJob {
                job_key: key,
                kind: JobKind::PauseNotice,
                group_id: Some(group.id),
                payment_id: None,
                run_at: Utc::now(),
                priority: PRIORITY_PAUSE_NOTICE,
            })
            .await?;

        Ok(enqueued.is_some())
    }

    /// Retires groups whose rotation finished but whose pause was lost
    ///
    /// Finalize marks `cycles_completed` inside its transaction and
    /// pauses the group afterwards; a crash in between leaves the group
    /// active with nothing left to run. This pass finishes the job.
    async fn sweep_completed_groups(&self) -> Result<u64, EngineError> {
        let stranded = Group::list_active_completed(&self.pool).await?;
        let mut retired = 0u64;

        for group in &stranded {
            match self.control.pause_group(group.id, PauseReason::Other).await {
                Ok(Some(_)) => retired += 1,
                Ok(None) => {}
                Err(err) => {
                    warn!(group_id = %group.id, error = %err, "Skipping group in retire sweep");
                }
            }
        }

        Ok(retired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_report_emptiness() {
        assert!(SweepReport::default().is_empty());
        assert!(!SweepReport {
            rearmed_retries: 1,
            ..Default::default()
        }
        .is_empty());
        assert!(!SweepReport {
            retired_groups: 1,
            ..Default::default()
        }
        .is_empty());
    }
}
