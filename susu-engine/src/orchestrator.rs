/// Cycle orchestration
///
/// The money path. [`CycleOrchestrator::start_cycle`] runs when a
/// group's wake-up job fires: it resolves the cycle's payee, books the
/// payout row, and issues one charge per contributing member. Gateway
/// callbacks flow into [`CycleOrchestrator::handle_gateway_event`],
/// which settles payments and finalizes the cycle once everyone but the
/// payee has paid.
///
/// # Idempotency
///
/// Every step is safe to replay:
/// - duplicate wake-ups skip members whose payment row already exists
/// - duplicate settlement callbacks match zero rows on the guarded update
/// - duplicate finalize attempts lose the cycle-record insert race and stop
///
/// # Per-member isolation
///
/// One member's declined charge never blocks the others. Only transport
/// failures bubble out of `start_cycle`, making the job retry; the
/// replay then skips the members whose charges already went through.
use std::sync::Arc;

use chrono::{Duration, Utc};
use sqlx::PgPool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use susu_shared::config::Config;
use susu_shared::models::{
    next_rotation, CycleRecord, FutureCycles, Group, GroupMember, JobKind, NewCycleRecord,
    PauseReason, Payment, PaymentStatus, Payout,
};
use susu_shared::models::payment::CreatePayment;

use crate::control::GroupControl;
use crate::error::EngineError;
use crate::fees::calculate_fee;
use crate::gateway::{ChargeMetadata, ChargeRequest, GatewayEvent, PaymentGateway};
use crate::notify::{send_best_effort, Notice, NoticeTemplate, Notifier};
use crate::queue::{JobQueue, NewJob};
use crate::scheduler::{retry_payment_key, Scheduler, PRIORITY_RETRY_PAYMENT};

/// The absolute member-cycle index for a group's current rotation slot
///
/// Payments, payouts, and cycle records all key on this number, so it
/// must keep growing across rotations rather than wrapping with the
/// cursor.
pub fn absolute_cycle_number(group: &Group, active_count: i32) -> i32 {
    group.total_group_cycles_completed * active_count + group.current_member_cycle
}

/// Drives collection, settlement, and finalization of group cycles
#[derive(Clone)]
pub struct CycleOrchestrator {
    pool: PgPool,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    queue: JobQueue,
    scheduler: Scheduler,
    control: GroupControl,
    config: Arc<Config>,
}

impl CycleOrchestrator {
    pub fn new(
        pool: PgPool,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        queue: JobQueue,
        scheduler: Scheduler,
        control: GroupControl,
        config: Arc<Config>,
    ) -> Self {
        Self {
            pool,
            gateway,
            notifier,
            queue,
            scheduler,
            control,
            config,
        }
    }

    /// Runs a group's cycle: books the payout and charges every
    /// contributing member
    ///
    /// Handler for `start_cycle` jobs. A wake-up for a group that is no
    /// longer active is dropped silently; pausing cancels pending jobs,
    /// but a job claimed in the same instant can still arrive here.
    pub async fn start_cycle(&self, group_id: Uuid) -> Result<(), EngineError> {
        let group = Group::find_by_id(&self.pool, group_id)
            .await?
            .ok_or(EngineError::GroupNotFound(group_id))?;

        if !group.is_active() {
            info!(
                group_id = %group_id,
                status = group.status.as_str(),
                "Dropping cycle wake-up for inactive group"
            );
            return Ok(());
        }

        let members = GroupMember::list_active(&self.pool, group_id).await?;
        if members.len() < 2 {
            return Err(EngineError::InvalidGroupState(format!(
                "group {group_id} has {} active members, cannot cycle",
                members.len()
            )));
        }

        let active_count = members.len() as i32;
        let cycle_number = absolute_cycle_number(&group, active_count);

        let payee = members
            .iter()
            .find(|m| m.payout_order == group.current_member_cycle)
            .ok_or(EngineError::MissingPayee {
                group_id,
                cycle_number,
            })?
            .clone();

        if payee.has_been_paid {
            debug!(
                group_id = %group_id,
                cycle_number,
                "Payee already paid this rotation, checking finalize instead"
            );
            return self.maybe_finalize(group_id, cycle_number).await;
        }

        let payee_destination = payee.payout_destination.clone().ok_or_else(|| {
            EngineError::InvalidGroupState(format!(
                "payee member {} has no payout destination",
                payee.id
            ))
        })?;

        let payout_amount = group.contribution_amount * rust_decimal::Decimal::from(active_count - 1);
        Payout::get_or_create(&self.pool, group_id, payee.id, cycle_number, payout_amount).await?;

        info!(
            group_id = %group_id,
            cycle_number,
            payee_member = %payee.id,
            contributors = active_count - 1,
            "Starting cycle collection"
        );

        // One member's failure never blocks the rest. Transport errors
        // are collected and re-raised after the pass so the job retries;
        // the replay skips members whose charges already exist.
        let mut deferred: Option<EngineError> = None;

        for member in members.iter().filter(|m| m.id != payee.id) {
            let result = self
                .collect_contribution(&group, member, &payee_destination, cycle_number)
                .await;

            if let Err(err) = result {
                if err.is_retryable() {
                    warn!(
                        group_id = %group_id,
                        member_id = %member.id,
                        error = %err,
                        "Transient failure collecting contribution, will replay"
                    );
                    deferred.get_or_insert(err);
                } else {
                    warn!(
                        group_id = %group_id,
                        member_id = %member.id,
                        error = %err,
                        "Skipping member after non-retryable collection error"
                    );
                }
            }
        }

        if let Some(err) = deferred {
            return Err(err);
        }

        let recipients = GroupMember::active_emails(&self.pool, group_id).await?;
        send_best_effort(
            self.notifier.as_ref(),
            &self.config.notify,
            Notice {
                recipients,
                template: NoticeTemplate::CycleStarted {
                    group_id,
                    cycle_number,
                    amount: group.contribution_amount,
                },
            },
        )
        .await;

        Ok(())
    }

    /// Issues the charge for one member's contribution
    ///
    /// Skips members whose collection already started. A member without
    /// a funding source is recorded as a failed attempt and handed to
    /// the retry path without touching the gateway.
    async fn collect_contribution(
        &self,
        group: &Group,
        member: &GroupMember,
        payee_destination: &str,
        cycle_number: i32,
    ) -> Result<(), EngineError> {
        if Payment::find_for_cycle(&self.pool, group.id, member.user_id, cycle_number)
            .await?
            .is_some()
        {
            debug!(
                group_id = %group.id,
                member_id = %member.id,
                cycle_number,
                "Collection already started, skipping"
            );
            return Ok(());
        }

        let fee = calculate_fee(&self.config.fees, group.contribution_amount, 0);

        let Some(funding_source) = member.funding_source.clone() else {
            let payment = Payment::create(
                &self.pool,
                CreatePayment {
                    group_id: group.id,
                    user_id: member.user_id,
                    cycle_number,
                    amount: group.contribution_amount,
                    fee_amount: fee,
                    status: PaymentStatus::Failed,
                    retry_count: 1,
                    charge_ref: None,
                    failure_reason: Some("missing funding source".to_string()),
                },
            )
            .await?;

            self.handle_collection_failure(&payment, &member.email)
                .await?;
            return Ok(());
        };

        let request = ChargeRequest {
            payer_ref: funding_source,
            payee_destination: payee_destination.to_string(),
            amount: group.contribution_amount,
            fee_amount: fee,
            idempotency_key: format!(
                "{}:{}:{}:attempt-0",
                group.id, cycle_number, member.user_id
            ),
            metadata: ChargeMetadata {
                group_id: group.id,
                user_id: member.user_id,
                cycle_number,
            },
        };

        match self.gateway.create_charge(request).await {
            Ok(receipt) => {
                Payment::create(
                    &self.pool,
                    CreatePayment {
                        group_id: group.id,
                        user_id: member.user_id,
                        cycle_number,
                        amount: group.contribution_amount,
                        fee_amount: fee,
                        status: PaymentStatus::Pending,
                        retry_count: 0,
                        charge_ref: Some(receipt.charge_ref),
                        failure_reason: None,
                    },
                )
                .await?;
                Ok(())
            }
            Err(err) if err.is_payment_failure() => {
                let payment = Payment::create(
                    &self.pool,
                    CreatePayment {
                        group_id: group.id,
                        user_id: member.user_id,
                        cycle_number,
                        amount: group.contribution_amount,
                        fee_amount: fee,
                        status: PaymentStatus::Failed,
                        retry_count: 1,
                        charge_ref: None,
                        failure_reason: Some(err.to_string()),
                    },
                )
                .await?;

                self.handle_collection_failure(&payment, &member.email)
                    .await?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Routes a failed collection to the retry path or pauses the group
    ///
    /// Shared by synchronous declines and asynchronous failure
    /// callbacks: under the budget the next attempt is booked, at the
    /// budget the group pauses.
    async fn handle_collection_failure(
        &self,
        payment: &Payment,
        member_email: &str,
    ) -> Result<(), EngineError> {
        if payment.retry_count < self.config.retry.max_retries {
            return self.schedule_retry(payment, member_email).await;
        }

        warn!(
            payment_id = %payment.id,
            group_id = %payment.group_id,
            retry_count = payment.retry_count,
            "Payment exhausted its retries, pausing group"
        );

        send_best_effort(
            self.notifier.as_ref(),
            &self.config.notify,
            Notice {
                recipients: vec![member_email.to_string()],
                template: NoticeTemplate::PaymentFailedFinal {
                    group_id: payment.group_id,
                    cycle_number: payment.cycle_number,
                },
            },
        )
        .await;

        self.control
            .pause_group(payment.group_id, PauseReason::PaymentFailures)
            .await?;

        Ok(())
    }

    /// Books the delayed retry job for a failed payment and tells the member
    pub(crate) async fn schedule_retry(
        &self,
        payment: &Payment,
        member_email: &str,
    ) -> Result<(), EngineError> {
        let run_at = Utc::now() + Duration::hours(self.config.retry.retry_delay_hours);

        self.queue
            .enqueue(NewJob {
                job_key: retry_payment_key(payment.id, payment.retry_count),
                kind: JobKind::RetryPayment,
                group_id: Some(payment.group_id),
                payment_id: Some(payment.id),
                run_at,
                priority: PRIORITY_RETRY_PAYMENT,
            })
            .await?;

        info!(
            payment_id = %payment.id,
            retry_count = payment.retry_count,
            retry_at = %run_at,
            "Scheduled payment retry"
        );

        send_best_effort(
            self.notifier.as_ref(),
            &self.config.notify,
            Notice {
                recipients: vec![member_email.to_string()],
                template: NoticeTemplate::PaymentRetryScheduled {
                    group_id: payment.group_id,
                    cycle_number: payment.cycle_number,
                    retry_count: payment.retry_count,
                },
            },
        )
        .await;

        Ok(())
    }

    /// Single dispatch point for asynchronous gateway callbacks
    ///
    /// Unknown references are logged and dropped rather than erroring:
    /// the gateway may deliver events for charges created by another
    /// deployment sharing the account.
    pub async fn handle_gateway_event(&self, event: GatewayEvent) -> Result<(), EngineError> {
        match event {
            GatewayEvent::ChargeSucceeded { charge_ref } => {
                self.on_charge_succeeded(&charge_ref).await
            }
            GatewayEvent::ChargeFailed { charge_ref, reason } => {
                self.on_charge_failed(&charge_ref, &reason).await
            }
            GatewayEvent::TransferCreated {
                transfer_ref,
                group_id,
                cycle_number,
            } => {
                self.on_transfer_created(&transfer_ref, group_id, cycle_number)
                    .await
            }
            GatewayEvent::TransferReversed { transfer_ref } => {
                self.on_transfer_reversed(&transfer_ref).await
            }
        }
    }

    async fn on_charge_succeeded(&self, charge_ref: &str) -> Result<(), EngineError> {
        let Some(payment) = Payment::find_by_charge_ref(&self.pool, charge_ref).await? else {
            warn!(charge_ref, "Settlement for unknown charge, dropping");
            return Ok(());
        };

        let Some(settled) = Payment::mark_successful(&self.pool, payment.id).await? else {
            debug!(payment_id = %payment.id, "Duplicate settlement, skipping");
            return Ok(());
        };

        // A late success supersedes any retry still on the books
        self.queue.clear_pending_for_payment(settled.id).await?;

        info!(
            payment_id = %settled.id,
            group_id = %settled.group_id,
            cycle_number = settled.cycle_number,
            "Payment settled"
        );

        self.maybe_finalize(settled.group_id, settled.cycle_number)
            .await
    }

    async fn on_charge_failed(&self, charge_ref: &str, reason: &str) -> Result<(), EngineError> {
        let Some(payment) = Payment::find_by_charge_ref(&self.pool, charge_ref).await? else {
            warn!(charge_ref, "Failure callback for unknown charge, dropping");
            return Ok(());
        };

        let Some(failed) = Payment::record_failure(&self.pool, payment.id, reason).await? else {
            debug!(payment_id = %payment.id, "Duplicate failure callback, skipping");
            return Ok(());
        };

        let member =
            GroupMember::find_by_user(&self.pool, failed.group_id, failed.user_id).await?;
        let email = member.map(|m| m.email).unwrap_or_default();

        self.handle_collection_failure(&failed, &email).await
    }

    async fn on_transfer_created(
        &self,
        transfer_ref: &str,
        group_id: Uuid,
        cycle_number: i32,
    ) -> Result<(), EngineError> {
        let Some(payout) =
            Payout::mark_completed(&self.pool, group_id, cycle_number, transfer_ref).await?
        else {
            debug!(
                transfer_ref,
                group_id = %group_id,
                cycle_number,
                "Transfer confirmation matched no pending payout"
            );
            return Ok(());
        };

        info!(
            payout_id = %payout.id,
            group_id = %group_id,
            cycle_number,
            amount = %payout.amount,
            "Payout confirmed"
        );

        let payee = GroupMember::find_by_id(&self.pool, payout.member_id).await?;
        let recipients = payee.map(|m| vec![m.email]).unwrap_or_default();

        send_best_effort(
            self.notifier.as_ref(),
            &self.config.notify,
            Notice {
                recipients,
                template: NoticeTemplate::PayoutSent {
                    group_id,
                    cycle_number,
                    amount: payout.amount,
                },
            },
        )
        .await;

        Ok(())
    }

    async fn on_transfer_reversed(&self, transfer_ref: &str) -> Result<(), EngineError> {
        let Some(payout) = Payout::mark_reversed(&self.pool, transfer_ref).await? else {
            warn!(transfer_ref, "Reversal for unknown transfer, dropping");
            return Ok(());
        };

        warn!(
            payout_id = %payout.id,
            group_id = %payout.group_id,
            cycle_number = payout.cycle_number,
            "Payout reversed, pausing group"
        );

        self.control
            .pause_group(payout.group_id, PauseReason::RefundAll)
            .await?;

        Ok(())
    }

    /// Finalizes the cycle once every contributor has paid
    async fn maybe_finalize(&self, group_id: Uuid, cycle_number: i32) -> Result<(), EngineError> {
        let Some(group) = Group::find_by_id(&self.pool, group_id).await? else {
            return Err(EngineError::GroupNotFound(group_id));
        };

        if !group.is_active() {
            debug!(group_id = %group_id, "Group not active, deferring finalize");
            return Ok(());
        }

        let active_count = GroupMember::count_active(&self.pool, group_id).await? as i32;
        if cycle_number != absolute_cycle_number(&group, active_count) {
            debug!(
                group_id = %group_id,
                cycle_number,
                "Settlement for a past cycle, nothing to finalize"
            );
            return Ok(());
        }

        let successful =
            Payment::count_successful_for_cycle(&self.pool, group_id, cycle_number).await?;
        if successful < (active_count - 1) as i64 {
            debug!(
                group_id = %group_id,
                cycle_number,
                successful,
                needed = active_count - 1,
                "Cycle not yet fully collected"
            );
            return Ok(());
        }

        self.finalize_cycle(&group, active_count, cycle_number).await
    }

    /// Writes the cycle record and advances the rotation, atomically
    ///
    /// The cycle-record insert is the idempotency latch: losing that
    /// race means another settlement path already finalized this cycle,
    /// and the whole transaction rolls back.
    async fn finalize_cycle(
        &self,
        group: &Group,
        active_count: i32,
        cycle_number: i32,
    ) -> Result<(), EngineError> {
        let payee = GroupMember::find_by_payout_order(
            &self.pool,
            group.id,
            group.current_member_cycle,
        )
        .await?
        .ok_or(EngineError::MissingPayee {
            group_id: group.id,
            cycle_number,
        })?;

        let mut tx = self.pool.begin().await?;

        let summary = Payment::cycle_summary(&mut *tx, group.id, cycle_number).await?;

        let inserted = CycleRecord::insert(
            &mut *tx,
            NewCycleRecord {
                group_id: group.id,
                cycle_number,
                payee_member_id: payee.id,
                successful_count: summary.successful as i32,
                failed_count: summary.failed as i32,
                pending_count: summary.pending as i32,
                total_amount: summary.total_amount,
            },
        )
        .await?;

        if !inserted {
            tx.rollback().await?;
            debug!(
                group_id = %group.id,
                cycle_number,
                "Cycle already finalized, skipping"
            );
            return Ok(());
        }

        GroupMember::mark_paid(&mut *tx, payee.id).await?;

        let (next_slot, wrapped) = next_rotation(group.current_member_cycle, active_count);

        let mut remaining = FutureCycles::new(group.future_cycles.0 .0.clone());
        let next_date = remaining.pop_front();
        // Completion lands in the advance transaction; the pause below
        // happens after commit and may be lost to a crash.
        let completed = wrapped && next_date.is_none();

        let advanced = Group::advance_cycle(
            &mut *tx,
            group.id,
            group.current_member_cycle,
            next_slot,
            wrapped,
            completed,
            next_date,
            &remaining,
        )
        .await?;

        if !advanced {
            tx.rollback().await?;
            debug!(
                group_id = %group.id,
                cycle_number,
                "Rotation cursor moved concurrently, skipping finalize"
            );
            return Ok(());
        }

        if wrapped {
            GroupMember::reset_paid_flags(&mut *tx, group.id).await?;
        }

        tx.commit().await?;

        info!(
            group_id = %group.id,
            cycle_number,
            next_slot,
            wrapped,
            next_date = ?next_date,
            "Finalized cycle"
        );

        if completed {
            self.control
                .pause_group(group.id, PauseReason::Other)
                .await?;
            info!(group_id = %group.id, "Rotation complete, group retired");
            return Ok(());
        }

        let refreshed = Group::find_by_id(&self.pool, group.id)
            .await?
            .ok_or(EngineError::GroupNotFound(group.id))?;
        self.scheduler.schedule_wake(&refreshed).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group_at(total_rotations: i32, cursor: i32) -> Group {
        use rust_decimal_macros::dec;
        use sqlx::types::Json;
        use susu_shared::models::{CycleFrequency, GroupStatus};

        Group {
            id: Uuid::new_v4(),
            name: "test".to_string(),
            contribution_amount: dec!(100.00),
            cycle_frequency: CycleFrequency::Monthly,
            payout_order_method: "random".to_string(),
            status: GroupStatus::Active,
            pause_reason: None,
            cycle_started: true,
            next_cycle_date: None,
            future_cycles: Json(FutureCycles::default()),
            current_member_cycle: cursor,
            total_group_cycles_completed: total_rotations,
            cycles_completed: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_absolute_cycle_number_first_rotation() {
        assert_eq!(absolute_cycle_number(&group_at(0, 1), 4), 1);
        assert_eq!(absolute_cycle_number(&group_at(0, 4), 4), 4);
    }

    #[test]
    fn test_absolute_cycle_number_grows_across_rotations() {
        // Second rotation of a 4-member group starts at cycle 5
        assert_eq!(absolute_cycle_number(&group_at(1, 1), 4), 5);
        assert_eq!(absolute_cycle_number(&group_at(2, 3), 4), 11);
    }
}
