/// Payment retry coordination
///
/// Handler for `retry_payment` jobs. A retry reuses the original payment
/// row: a fresh charge replaces the old reference and the row goes back
/// to pending, so the one-in-flight invariant holds across attempts.
///
/// Stale jobs are common and harmless: the payment may have settled
/// through a late callback, or the group may have paused since the retry
/// was booked. Both cases drop the job without error.
use std::sync::Arc;

use chrono::{Duration, Utc};
use sqlx::PgPool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use susu_shared::config::Config;
use susu_shared::models::{
    Group, GroupMember, JobKind, PauseReason, Payment, PaymentStatus, Payout,
};

use crate::control::GroupControl;
use crate::error::EngineError;
use crate::fees::calculate_fee;
use crate::gateway::{ChargeMetadata, ChargeRequest, PaymentGateway};
use crate::notify::{send_best_effort, Notice, NoticeTemplate, Notifier};
use crate::queue::{JobQueue, NewJob};
use crate::scheduler::{retry_payment_key, PRIORITY_RETRY_PAYMENT};

/// Re-attempts failed collections within the retry budget
#[derive(Clone)]
pub struct RetryCoordinator {
    pool: PgPool,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    queue: JobQueue,
    control: GroupControl,
    config: Arc<Config>,
}

impl RetryCoordinator {
    pub fn new(
        pool: PgPool,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        queue: JobQueue,
        control: GroupControl,
        config: Arc<Config>,
    ) -> Self {
        Self {
            pool,
            gateway,
            notifier,
            queue,
            control,
            config,
        }
    }

    /// Re-attempts one failed payment
    ///
    /// Issues a fresh charge with the retry fee applied and puts the
    /// payment back in flight. A payer-attributable failure burns one
    /// retry; exhausting the budget pauses the group.
    pub async fn retry_payment(&self, payment_id: Uuid) -> Result<(), EngineError> {
        let payment = Payment::find_by_id(&self.pool, payment_id)
            .await?
            .ok_or(EngineError::PaymentNotFound(payment_id))?;

        if payment.status != PaymentStatus::Failed {
            debug!(
                payment_id = %payment_id,
                status = payment.status.as_str(),
                "Payment no longer failed, dropping retry"
            );
            return Ok(());
        }

        let group = Group::find_by_id(&self.pool, payment.group_id)
            .await?
            .ok_or(EngineError::GroupNotFound(payment.group_id))?;

        if !group.is_active() {
            info!(
                payment_id = %payment_id,
                group_id = %group.id,
                "Group not active, dropping retry; resume re-enqueues it"
            );
            return Ok(());
        }

        let member = GroupMember::find_by_user(&self.pool, payment.group_id, payment.user_id)
            .await?
            .ok_or(EngineError::MemberNotFound(payment.user_id))?;

        let payee_destination = self
            .payee_destination(&group, payment.cycle_number)
            .await?;

        let fee = calculate_fee(&self.config.fees, payment.amount, payment.retry_count);

        let Some(funding_source) = member.funding_source.clone() else {
            return self
                .handle_retry_failure(&payment, &member.email, "missing funding source")
                .await;
        };

        let request = ChargeRequest {
            payer_ref: funding_source,
            payee_destination,
            amount: payment.amount,
            fee_amount: fee,
            idempotency_key: format!(
                "{}:{}:{}:attempt-{}",
                payment.group_id, payment.cycle_number, payment.user_id, payment.retry_count
            ),
            metadata: ChargeMetadata {
                group_id: payment.group_id,
                user_id: payment.user_id,
                cycle_number: payment.cycle_number,
            },
        };

        match self.gateway.create_charge(request).await {
            Ok(receipt) => {
                let updated =
                    Payment::mark_retrying(&self.pool, payment.id, &receipt.charge_ref, fee)
                        .await?;

                match updated {
                    Some(p) => info!(
                        payment_id = %p.id,
                        retry_count = p.retry_count,
                        charge_ref = %receipt.charge_ref,
                        "Retry charge issued"
                    ),
                    None => debug!(
                        payment_id = %payment.id,
                        "Payment state changed during retry, charge will settle idempotently"
                    ),
                }
                Ok(())
            }
            Err(err) if err.is_payment_failure() => {
                self.handle_retry_failure(&payment, &member.email, &err.to_string())
                    .await
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Resolves where this cycle's pooled funds are routed
    async fn payee_destination(
        &self,
        group: &Group,
        cycle_number: i32,
    ) -> Result<String, EngineError> {
        let payout = Payout::find_for_cycle(&self.pool, group.id, cycle_number)
            .await?
            .ok_or(EngineError::MissingPayee {
                group_id: group.id,
                cycle_number,
            })?;

        let payee = GroupMember::find_by_id(&self.pool, payout.member_id)
            .await?
            .ok_or(EngineError::MemberNotFound(payout.member_id))?;

        payee.payout_destination.ok_or_else(|| {
            EngineError::InvalidGroupState(format!(
                "payee member {} has no payout destination",
                payout.member_id
            ))
        })
    }

    /// Burns one retry and either books the next attempt or gives up
    async fn handle_retry_failure(
        &self,
        payment: &Payment,
        member_email: &str,
        reason: &str,
    ) -> Result<(), EngineError> {
        let Some(failed) = Payment::record_failure(&self.pool, payment.id, reason).await? else {
            debug!(payment_id = %payment.id, "Payment settled mid-retry, dropping failure");
            return Ok(());
        };

        if failed.retry_count < self.config.retry.max_retries {
            let run_at = Utc::now() + Duration::hours(self.config.retry.retry_delay_hours);

            self.queue
                .enqueue(NewJob {
                    job_key: retry_payment_key(failed.id, failed.retry_count),
                    kind: JobKind::RetryPayment,
                    group_id: Some(failed.group_id),
                    payment_id: Some(failed.id),
                    run_at,
                    priority: PRIORITY_RETRY_PAYMENT,
                })
                .await?;

            info!(
                payment_id = %failed.id,
                retry_count = failed.retry_count,
                retry_at = %run_at,
                "Retry failed, next attempt booked"
            );

            send_best_effort(
                self.notifier.as_ref(),
                &self.config.notify,
                Notice {
                    recipients: vec![member_email.to_string()],
                    template: NoticeTemplate::PaymentRetryScheduled {
                        group_id: failed.group_id,
                        cycle_number: failed.cycle_number,
                        retry_count: failed.retry_count,
                    },
                },
            )
            .await;

            return Ok(());
        }

        warn!(
            payment_id = %failed.id,
            group_id = %failed.group_id,
            retry_count = failed.retry_count,
            "Retry budget exhausted, pausing group"
        );

        send_best_effort(
            self.notifier.as_ref(),
            &self.config.notify,
            Notice {
                recipients: vec![member_email.to_string()],
                template: NoticeTemplate::PaymentFailedFinal {
                    group_id: failed.group_id,
                    cycle_number: failed.cycle_number,
                },
            },
        )
        .await;

        self.control
            .pause_group(failed.group_id, PauseReason::PaymentFailures)
            .await?;

        Ok(())
    }
}
