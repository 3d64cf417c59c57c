/// Group control operations
///
/// The administrative surface of the engine: schedule a group's cycles,
/// pause it, resume it, and force a retry pass over its failed
/// payments. Pausing cancels the group's pending queue work; resuming
/// puts the next wake-up back. All operations are idempotent, so an
/// admin can safely click twice.
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use susu_shared::config::Config;
use susu_shared::models::{
    FutureCycles, Group, GroupMember, GroupStatus, JobKind, PauseReason, Payment,
};

use crate::error::EngineError;
use crate::notify::{send_best_effort, Notice, NoticeTemplate, Notifier};
use crate::queue::{JobQueue, NewJob};
use crate::scheduler::{
    compute_schedule, pause_notice_key, retry_payment_key, validate_schedule, Scheduler,
    PRIORITY_PAUSE_NOTICE, PRIORITY_RETRY_PAYMENT,
};

/// Pause, resume, scheduling, and retry-all for one deployment
#[derive(Clone)]
pub struct GroupControl {
    pool: PgPool,
    queue: JobQueue,
    scheduler: Scheduler,
    notifier: Arc<dyn Notifier>,
    config: Arc<Config>,
}

impl GroupControl {
    pub fn new(
        pool: PgPool,
        queue: JobQueue,
        scheduler: Scheduler,
        notifier: Arc<dyn Notifier>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            pool,
            queue,
            scheduler,
            notifier,
            config,
        }
    }

    /// Installs a cycle schedule on a group and activates it
    ///
    /// Dates must all be in the future; they are sorted and deduplicated.
    /// The earliest becomes the next cycle date and gets a wake-up job;
    /// the rest are stored for consumption as cycles finalize.
    ///
    /// # Errors
    ///
    /// Fails when the group doesn't exist, has fewer than two active
    /// members, or the schedule is empty or contains past dates.
    pub async fn schedule_group_cycles(
        &self,
        group_id: Uuid,
        dates: Vec<DateTime<Utc>>,
    ) -> Result<Group, EngineError> {
        let group = Group::find_by_id(&self.pool, group_id)
            .await?
            .ok_or(EngineError::GroupNotFound(group_id))?;

        let active_count = GroupMember::count_active(&self.pool, group_id).await?;
        if active_count < 2 {
            return Err(EngineError::InvalidGroupState(format!(
                "group {group_id} needs at least two active members to cycle, has {active_count}"
            )));
        }

        let dates = validate_schedule(dates, Utc::now())?;

        if dates.len() as i64 != active_count {
            warn!(
                group_id = %group_id,
                dates = dates.len(),
                active_members = active_count,
                "Schedule length does not match member count"
            );
        }

        let mut remaining = dates;
        let next = remaining.remove(0);
        let future = FutureCycles::new(remaining);

        let group = Group::install_schedule(&self.pool, group.id, next, &future)
            .await?
            .ok_or(EngineError::GroupNotFound(group_id))?;

        self.scheduler.schedule_wake(&group).await?;

        info!(
            group_id = %group_id,
            next_cycle = %next,
            remaining = future.len(),
            "Installed cycle schedule"
        );

        Ok(group)
    }

    /// Installs a schedule computed from a start date
    ///
    /// Convenience over [`GroupControl::schedule_group_cycles`]: one
    /// date per active member, stepping by the group's frequency.
    pub async fn schedule_group_from(
        &self,
        group_id: Uuid,
        start: DateTime<Utc>,
    ) -> Result<Group, EngineError> {
        let group = Group::find_by_id(&self.pool, group_id)
            .await?
            .ok_or(EngineError::GroupNotFound(group_id))?;

        let active_count = GroupMember::count_active(&self.pool, group_id).await?;
        let dates = compute_schedule(start, group.cycle_frequency, active_count.max(0) as usize);

        self.schedule_group_cycles(group_id, dates).await
    }

    /// Pauses a group and cancels its pending queue work
    ///
    /// Returns `None` when the group was already paused; the original
    /// pause reason is left intact. Notification dispatch goes through a
    /// durable job so a crash between pause and notify still notifies.
    pub async fn pause_group(
        &self,
        group_id: Uuid,
        reason: PauseReason,
    ) -> Result<Option<Group>, EngineError> {
        let Some(group) = Group::mark_paused(&self.pool, group_id, reason).await? else {
            debug!(group_id = %group_id, "Group already paused, skipping");
            return Ok(None);
        };

        let cancelled = self.queue.clear_pending_for_group(group_id).await?;

        self.queue
            .enqueue(NewJob {
                job_key: pause_notice_key(group_id),
                kind: JobKind::PauseNotice,
                group_id: Some(group_id),
                payment_id: None,
                run_at: Utc::now(),
                priority: PRIORITY_PAUSE_NOTICE,
            })
            .await?;

        info!(
            group_id = %group_id,
            reason = reason.as_str(),
            cancelled_jobs = cancelled,
            "Paused group"
        );

        Ok(Some(group))
    }

    /// Delivers the pause notification for a group
    ///
    /// Handler for `pause_notice` jobs. A group that resumed before the
    /// job ran is skipped.
    pub async fn send_pause_notice(&self, group_id: Uuid) -> Result<(), EngineError> {
        let group = Group::find_by_id(&self.pool, group_id)
            .await?
            .ok_or(EngineError::GroupNotFound(group_id))?;

        let Some(reason) = group.pause_reason else {
            debug!(group_id = %group_id, "Group no longer paused, dropping notice");
            return Ok(());
        };

        let recipients = GroupMember::active_emails(&self.pool, group_id).await?;
        send_best_effort(
            self.notifier.as_ref(),
            &self.config.notify,
            Notice {
                recipients,
                template: NoticeTemplate::GroupPaused {
                    group_id,
                    reason: reason.as_str().to_string(),
                },
            },
        )
        .await;

        Ok(())
    }

    /// Resumes a paused group and reschedules its next wake-up
    ///
    /// Only recoverable pauses can be resumed; a group that finished its
    /// full rotation has nothing left to run. A next cycle date already
    /// in the past fires immediately.
    ///
    /// # Errors
    ///
    /// Fails when the group doesn't exist, isn't paused, or its pause
    /// reason is not recoverable.
    pub async fn resume_group(&self, group_id: Uuid) -> Result<Group, EngineError> {
        let group = Group::find_by_id(&self.pool, group_id)
            .await?
            .ok_or(EngineError::GroupNotFound(group_id))?;

        if group.status != GroupStatus::Paused {
            return Err(EngineError::InvalidGroupState(format!(
                "group {group_id} is not paused"
            )));
        }

        match group.pause_reason {
            Some(reason) if reason.is_recoverable() => {}
            Some(reason) => {
                return Err(EngineError::InvalidGroupState(format!(
                    "group {group_id} pause reason {} is not recoverable",
                    reason.as_str()
                )));
            }
            None => {
                return Err(EngineError::InvalidGroupState(format!(
                    "group {group_id} is paused without a reason"
                )));
            }
        }

        let group = Group::mark_resumed(&self.pool, group_id)
            .await?
            .ok_or(EngineError::GroupNotFound(group_id))?;

        let rescheduled = self.scheduler.schedule_wake(&group).await?;
        let retried = self.enqueue_failed_retries(group_id).await?;

        let recipients = GroupMember::active_emails(&self.pool, group_id).await?;
        send_best_effort(
            self.notifier.as_ref(),
            &self.config.notify,
            Notice {
                recipients,
                template: NoticeTemplate::GroupResumed { group_id },
            },
        )
        .await;

        info!(
            group_id = %group_id,
            rescheduled,
            retried_payments = retried,
            "Resumed group"
        );

        Ok(group)
    }

    /// Enqueues an immediate retry for every failed payment in a group
    ///
    /// Admin override: runs regardless of each payment's retry count. A
    /// paused group is resumed first, so the retries can actually fire.
    /// Returns the number of retry jobs enqueued; payments with a retry
    /// already pending are skipped by key dedup.
    pub async fn retry_all_payments(&self, group_id: Uuid) -> Result<u64, EngineError> {
        let group = Group::find_by_id(&self.pool, group_id)
            .await?
            .ok_or(EngineError::GroupNotFound(group_id))?;

        if group.status == GroupStatus::Paused {
            self.resume_group(group_id).await?;
            let failed = Payment::list_failed_for_group(&self.pool, group_id).await?;
            return Ok(failed.len() as u64);
        }

        let enqueued = self.enqueue_failed_retries(group_id).await?;
        self.scheduler.schedule_wake(&group).await?;
        Ok(enqueued)
    }

    async fn enqueue_failed_retries(&self, group_id: Uuid) -> Result<u64, EngineError> {
        let failed = Payment::list_failed_for_group(&self.pool, group_id).await?;
        let mut enqueued = 0u64;

        for payment in &failed {
            let job = self
                .queue
                .enqueue(NewJob {
                    job_key: retry_payment_key(payment.id, payment.retry_count),
                    kind: JobKind::RetryPayment,
                    group_id: Some(group_id),
                    payment_id: Some(payment.id),
                    run_at: Utc::now(),
                    priority: PRIORITY_RETRY_PAYMENT,
                })
                .await?;

            if job.is_some() {
                enqueued += 1;
            }
        }

        info!(
            group_id = %group_id,
            failed_payments = failed.len(),
            enqueued,
            "Enqueued retry-all pass"
        );

        Ok(enqueued)
    }
}
