/// Payout model and database operations
///
/// One payout row per (group, cycle): the pooled amount due to that
/// cycle's payee, `contribution × (active members − 1)`. The gateway
/// routes member charges directly to the payee's destination, so the row
/// is the book-keeping side, confirmed by a `transfer.created` callback
/// and undone by `transfer.reversed`.
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// Payout state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payout_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    /// Awaiting transfer confirmation
    Pending,

    /// Transfer confirmed by the gateway
    Completed,

    /// Transfer reversed externally
    Reversed,
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::Pending => "pending",
            PayoutStatus::Completed => "completed",
            PayoutStatus::Reversed => "reversed",
        }
    }
}

/// Payout model representing funds due to one cycle's payee
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Payout {
    pub id: Uuid,
    pub group_id: Uuid,

    /// Membership receiving this payout
    pub member_id: Uuid,

    pub cycle_number: i32,

    /// Pooled amount (fees excluded)
    pub amount: Decimal,

    pub status: PayoutStatus,

    /// Gateway transfer reference (null until confirmed)
    pub transfer_ref: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const PAYOUT_COLUMNS: &str =
    "id, group_id, member_id, cycle_number, amount, status, transfer_ref, created_at, updated_at";

impl Payout {
    /// Creates the payout row for a cycle if it doesn't exist yet
    ///
    /// The unique (group, cycle) constraint absorbs duplicate wake-ups;
    /// the existing row is returned unchanged.
    pub async fn get_or_create(
        pool: &PgPool,
        group_id: Uuid,
        member_id: Uuid,
        cycle_number: i32,
        amount: Decimal,
    ) -> Result<Self, sqlx::Error> {
        let query = format!(
            "INSERT INTO payouts (group_id, member_id, cycle_number, amount)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (group_id, cycle_number) DO NOTHING
             RETURNING {PAYOUT_COLUMNS}"
        );

        let inserted = sqlx::query_as::<_, Payout>(&query)
            .bind(group_id)
            .bind(member_id)
            .bind(cycle_number)
            .bind(amount)
            .fetch_optional(pool)
            .await?;

        match inserted {
            Some(payout) => Ok(payout),
            None => {
                let query = format!(
                    "SELECT {PAYOUT_COLUMNS} FROM payouts
                     WHERE group_id = $1 AND cycle_number = $2"
                );

                sqlx::query_as::<_, Payout>(&query)
                    .bind(group_id)
                    .bind(cycle_number)
                    .fetch_one(pool)
                    .await
            }
        }
    }

    /// Finds the payout for a group cycle
    pub async fn find_for_cycle(
        pool: &PgPool,
        group_id: Uuid,
        cycle_number: i32,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {PAYOUT_COLUMNS} FROM payouts
             WHERE group_id = $1 AND cycle_number = $2"
        );

        sqlx::query_as::<_, Payout>(&query)
            .bind(group_id)
            .bind(cycle_number)
            .fetch_optional(pool)
            .await
    }

    /// Confirms a payout with the gateway's transfer reference
    pub async fn mark_completed(
        pool: &PgPool,
        group_id: Uuid,
        cycle_number: i32,
        transfer_ref: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "UPDATE payouts
             SET status = 'completed',
                 transfer_ref = $3,
                 updated_at = NOW()
             WHERE group_id = $1 AND cycle_number = $2 AND status = 'pending'
             RETURNING {PAYOUT_COLUMNS}"
        );

        sqlx::query_as::<_, Payout>(&query)
            .bind(group_id)
            .bind(cycle_number)
            .bind(transfer_ref)
            .fetch_optional(pool)
            .await
    }

    /// Marks a payout reversed, matched by stored transfer reference
    pub async fn mark_reversed(
        pool: &PgPool,
        transfer_ref: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "UPDATE payouts
             SET status = 'reversed',
                 updated_at = NOW()
             WHERE transfer_ref = $1 AND status = 'completed'
             RETURNING {PAYOUT_COLUMNS}"
        );

        sqlx::query_as::<_, Payout>(&query)
            .bind(transfer_ref)
            .fetch_optional(pool)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payout_status_as_str() {
        assert_eq!(PayoutStatus::Pending.as_str(), "pending");
        assert_eq!(PayoutStatus::Completed.as_str(), "completed");
        assert_eq!(PayoutStatus::Reversed.as_str(), "reversed");
    }
}
