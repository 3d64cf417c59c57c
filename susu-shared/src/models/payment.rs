/// Payment model and database operations
///
/// A payment row is one collection attempt chain: one member's
/// contribution for one group cycle. Retries reuse the row (new charge
/// ref, incremented `retry_count`) rather than creating siblings, which
/// keeps the at-most-one-in-flight invariant simple.
///
/// # State Machine
///
/// ```text
/// pending → successful          (async gateway callback)
/// pending → failed              (async gateway callback)
/// failed  → pending             (retry issued a new charge)
/// ```
///
/// The partial unique index `payments_one_pending_per_cycle` backs the
/// invariant that at most one payment per (group, user, cycle) is
/// non-terminal at any time.
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// Payment state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Charge issued, awaiting the gateway's verdict
    Pending,

    /// Funds collected
    Successful,

    /// Charge declined or errored; may be retried
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Successful => "successful",
            PaymentStatus::Failed => "failed",
        }
    }

    /// Whether this state ends the payment's lifecycle
    ///
    /// Failed is not terminal: the retry coordinator can push it back to
    /// pending until the retry cap is reached.
    pub fn is_settled(&self) -> bool {
        matches!(self, PaymentStatus::Successful)
    }
}

/// Payment model representing one member's contribution for one cycle
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Payment {
    /// Unique payment ID
    pub id: Uuid,

    /// Group being contributed to
    pub group_id: Uuid,

    /// Contributing user
    pub user_id: Uuid,

    /// Which member-cycle this contribution belongs to
    pub cycle_number: i32,

    /// Contribution amount (fees excluded)
    pub amount: Decimal,

    /// Processing fee charged on top
    pub fee_amount: Decimal,

    /// Current state
    pub status: PaymentStatus,

    /// Failed collection attempts so far
    pub retry_count: i32,

    /// Gateway charge reference (null until a charge was created)
    pub charge_ref: Option<String>,

    /// Why the last attempt failed
    pub failure_reason: Option<String>,

    /// When the payment was created
    pub created_at: DateTime<Utc>,

    /// When the payment was last updated
    pub updated_at: DateTime<Utc>,
}

/// Input for recording a new payment attempt
#[derive(Debug, Clone)]
pub struct CreatePayment {
    pub group_id: Uuid,
    pub user_id: Uuid,
    pub cycle_number: i32,
    pub amount: Decimal,
    pub fee_amount: Decimal,
    pub status: PaymentStatus,
    pub retry_count: i32,
    pub charge_ref: Option<String>,
    pub failure_reason: Option<String>,
}

const PAYMENT_COLUMNS: &str = "id, group_id, user_id, cycle_number, amount, fee_amount, status, \
     retry_count, charge_ref, failure_reason, created_at, updated_at";

impl Payment {
    /// Records a payment attempt
    pub async fn create(pool: &PgPool, data: CreatePayment) -> Result<Self, sqlx::Error> {
        let query = format!(
            "INSERT INTO payments
                 (group_id, user_id, cycle_number, amount, fee_amount, status,
                  retry_count, charge_ref, failure_reason)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING {PAYMENT_COLUMNS}"
        );

        sqlx::query_as::<_, Payment>(&query)
            .bind(data.group_id)
            .bind(data.user_id)
            .bind(data.cycle_number)
            .bind(data.amount)
            .bind(data.fee_amount)
            .bind(data.status)
            .bind(data.retry_count)
            .bind(data.charge_ref)
            .bind(data.failure_reason)
            .fetch_one(pool)
            .await
    }

    /// Finds a payment by ID
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let query = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1");

        sqlx::query_as::<_, Payment>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Find-or-none idempotency lookup for one member's cycle contribution
    ///
    /// The orchestrator calls this before issuing a charge; any existing
    /// row (pending, successful, or failed-awaiting-retry) means the
    /// collection for this member already started and must not be
    /// duplicated.
    pub async fn find_for_cycle(
        pool: &PgPool,
        group_id: Uuid,
        user_id: Uuid,
        cycle_number: i32,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments
             WHERE group_id = $1 AND user_id = $2 AND cycle_number = $3
             ORDER BY created_at DESC
             LIMIT 1"
        );

        sqlx::query_as::<_, Payment>(&query)
            .bind(group_id)
            .bind(user_id)
            .bind(cycle_number)
            .fetch_optional(pool)
            .await
    }

    /// Matches a gateway callback to a payment by charge reference
    pub async fn find_by_charge_ref(
        pool: &PgPool,
        charge_ref: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE charge_ref = $1");

        sqlx::query_as::<_, Payment>(&query)
            .bind(charge_ref)
            .fetch_optional(pool)
            .await
    }

    /// Settles a pending payment as successful
    ///
    /// Guarded on the pending state: replaying a `charge.succeeded`
    /// callback matches zero rows and returns None.
    pub async fn mark_successful(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "UPDATE payments
             SET status = 'successful',
                 failure_reason = NULL,
                 updated_at = NOW()
             WHERE id = $1 AND status = 'pending'
             RETURNING {PAYMENT_COLUMNS}"
        );

        sqlx::query_as::<_, Payment>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Records a failed collection attempt and bumps the retry count
    pub async fn record_failure(
        pool: &PgPool,
        id: Uuid,
        reason: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "UPDATE payments
             SET status = 'failed',
                 retry_count = retry_count + 1,
                 failure_reason = $2,
                 updated_at = NOW()
             WHERE id = $1 AND status IN ('pending', 'failed')
             RETURNING {PAYMENT_COLUMNS}"
        );

        sqlx::query_as::<_, Payment>(&query)
            .bind(id)
            .bind(reason)
            .fetch_optional(pool)
            .await
    }

    /// Puts a failed payment back in flight after a retry charge
    pub async fn mark_retrying(
        pool: &PgPool,
        id: Uuid,
        charge_ref: &str,
        fee_amount: Decimal,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "UPDATE payments
             SET status = 'pending',
                 charge_ref = $2,
                 fee_amount = $3,
                 updated_at = NOW()
             WHERE id = $1 AND status = 'failed'
             RETURNING {PAYMENT_COLUMNS}"
        );

        sqlx::query_as::<_, Payment>(&query)
            .bind(id)
            .bind(charge_ref)
            .bind(fee_amount)
            .fetch_optional(pool)
            .await
    }

    /// Counts successful payments for a group cycle
    ///
    /// The settlement threshold: once this reaches active members − 1,
    /// everyone except the payee has paid.
    pub async fn count_successful_for_cycle<'e, E>(
        executor: E,
        group_id: Uuid,
        cycle_number: i32,
    ) -> Result<i64, sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM payments
             WHERE group_id = $1 AND cycle_number = $2 AND status = 'successful'",
        )
        .bind(group_id)
        .bind(cycle_number)
        .fetch_one(executor)
        .await?;

        Ok(count)
    }

    /// Per-status counts and successful total for a group cycle
    ///
    /// Feeds the immutable cycle record at finalize.
    pub async fn cycle_summary<'e, E>(
        executor: E,
        group_id: Uuid,
        cycle_number: i32,
    ) -> Result<CycleSummary, sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let row: (i64, i64, i64, Option<Decimal>) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'successful'),
                COUNT(*) FILTER (WHERE status = 'failed'),
                COUNT(*) FILTER (WHERE status = 'pending'),
                SUM(amount) FILTER (WHERE status = 'successful')
            FROM payments
            WHERE group_id = $1 AND cycle_number = $2
            "#,
        )
        .bind(group_id)
        .bind(cycle_number)
        .fetch_one(executor)
        .await?;

        Ok(CycleSummary {
            successful: row.0,
            failed: row.1,
            pending: row.2,
            total_amount: row.3.unwrap_or_default(),
        })
    }

    /// Lists a group's failed payments, for the admin retry-all sweep
    pub async fn list_failed_for_group(
        pool: &PgPool,
        group_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments
             WHERE group_id = $1 AND status = 'failed'
             ORDER BY updated_at ASC"
        );

        sqlx::query_as::<_, Payment>(&query)
            .bind(group_id)
            .fetch_all(pool)
            .await
    }

    /// Lists failed payments still under the retry cap, for recovery
    pub async fn list_failed_retryable(
        pool: &PgPool,
        max_retries: i32,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments
             WHERE status = 'failed' AND retry_count < $1
             ORDER BY updated_at ASC"
        );

        sqlx::query_as::<_, Payment>(&query)
            .bind(max_retries)
            .fetch_all(pool)
            .await
    }
}

/// Aggregate payment counts for one group cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleSummary {
    pub successful: i64,
    pub failed: i64,
    pub pending: i64,
    pub total_amount: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_status_as_str() {
        assert_eq!(PaymentStatus::Pending.as_str(), "pending");
        assert_eq!(PaymentStatus::Successful.as_str(), "successful");
        assert_eq!(PaymentStatus::Failed.as_str(), "failed");
    }

    #[test]
    fn test_payment_status_settled() {
        assert!(!PaymentStatus::Pending.is_settled());
        assert!(PaymentStatus::Successful.is_settled());
        assert!(!PaymentStatus::Failed.is_settled());
    }

    // Query methods are covered by the database integration tests
}
