/// Cycle history records
///
/// A cycle record is the immutable summary written when a member-cycle
/// finalizes. Rows are append-only and never mutated; the unique
/// (group, cycle) constraint doubles as the finalize idempotency latch:
/// a duplicate finalize inserts nothing and learns it from the result.
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// Immutable summary of a finalized member-cycle
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CycleRecord {
    pub id: Uuid,
    pub group_id: Uuid,
    pub cycle_number: i32,

    /// Membership that received this cycle's payout
    pub payee_member_id: Uuid,

    pub successful_count: i32,
    pub failed_count: i32,
    pub pending_count: i32,

    /// Sum of successful contribution amounts (fees excluded)
    pub total_amount: Decimal,

    pub completed_at: DateTime<Utc>,
}

/// Input for writing a cycle record
#[derive(Debug, Clone)]
pub struct NewCycleRecord {
    pub group_id: Uuid,
    pub cycle_number: i32,
    pub payee_member_id: Uuid,
    pub successful_count: i32,
    pub failed_count: i32,
    pub pending_count: i32,
    pub total_amount: Decimal,
}

impl CycleRecord {
    /// Inserts a cycle record, returning whether a row was created
    ///
    /// `false` means this cycle was already finalized; callers must stop
    /// and not advance the group a second time.
    pub async fn insert<'e, E>(executor: E, data: NewCycleRecord) -> Result<bool, sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let result = sqlx::query(
            r#"
            INSERT INTO cycle_records
                (group_id, cycle_number, payee_member_id,
                 successful_count, failed_count, pending_count, total_amount)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (group_id, cycle_number) DO NOTHING
            "#,
        )
        .bind(data.group_id)
        .bind(data.cycle_number)
        .bind(data.payee_member_id)
        .bind(data.successful_count)
        .bind(data.failed_count)
        .bind(data.pending_count)
        .bind(data.total_amount)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Lists a group's cycle history, oldest first
    pub async fn list_for_group(pool: &PgPool, group_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, CycleRecord>(
            r#"
            SELECT id, group_id, cycle_number, payee_member_id,
                   successful_count, failed_count, pending_count,
                   total_amount, completed_at
            FROM cycle_records
            WHERE group_id = $1
            ORDER BY cycle_number ASC
            "#,
        )
        .bind(group_id)
        .fetch_all(pool)
        .await
    }
}
