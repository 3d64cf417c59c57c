/// Membership model and database operations
///
/// A membership links a user to a group and carries the member's slot in
/// the payout rotation. `payout_order` is dense 1..N among active members
/// and unique per group; exactly one member per group has `is_admin`.
///
/// `has_been_paid` is the per-rotation payee flag: set true for the
/// current payee once settlement completes, cleared for every active
/// member when the rotation wraps back to slot 1. The orchestrator uses
/// it as its duplicate-wake guard.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// Membership state within a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "member_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    /// Invited but not yet onboarded
    Pending,

    /// Participating in cycles
    Active,

    /// Left or removed; keeps history but is skipped by the engine
    Inactive,
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Pending => "pending",
            MemberStatus::Active => "active",
            MemberStatus::Inactive => "inactive",
        }
    }
}

/// Membership model representing a user's slot in a group
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GroupMember {
    /// Unique membership ID
    pub id: Uuid,

    /// Group this membership belongs to
    pub group_id: Uuid,

    /// User behind the membership
    pub user_id: Uuid,

    /// Email used for notification dispatch
    pub email: String,

    /// Slot in the payout rotation (1..N, unique per group)
    pub payout_order: i32,

    /// Whether this member administers the group
    pub is_admin: bool,

    /// Membership state
    pub status: MemberStatus,

    /// Whether this member has received their payout this rotation
    pub has_been_paid: bool,

    /// Gateway reference for charging this member (null until onboarded)
    pub funding_source: Option<String>,

    /// Gateway reference for paying this member out
    pub payout_destination: Option<String>,

    /// When the membership was created
    pub created_at: DateTime<Utc>,

    /// When the membership was last updated
    pub updated_at: DateTime<Utc>,
}

const MEMBER_COLUMNS: &str = "id, group_id, user_id, email, payout_order, is_admin, status, \
     has_been_paid, funding_source, payout_destination, created_at, updated_at";

impl GroupMember {
    /// Lists active members of a group ordered by payout order
    pub async fn list_active(pool: &PgPool, group_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {MEMBER_COLUMNS} FROM group_members
             WHERE group_id = $1 AND status = 'active'
             ORDER BY payout_order ASC"
        );

        sqlx::query_as::<_, GroupMember>(&query)
            .bind(group_id)
            .fetch_all(pool)
            .await
    }

    /// Counts active members of a group
    pub async fn count_active(pool: &PgPool, group_id: Uuid) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM group_members WHERE group_id = $1 AND status = 'active'",
        )
        .bind(group_id)
        .fetch_one(pool)
        .await?;

        Ok(count)
    }

    /// Finds the active member holding a payout-order slot
    ///
    /// This is the payee lookup: the cycle's payee is the active member
    /// whose `payout_order` equals the group's `current_member_cycle`.
    pub async fn find_by_payout_order(
        pool: &PgPool,
        group_id: Uuid,
        payout_order: i32,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {MEMBER_COLUMNS} FROM group_members
             WHERE group_id = $1 AND payout_order = $2 AND status = 'active'"
        );

        sqlx::query_as::<_, GroupMember>(&query)
            .bind(group_id)
            .bind(payout_order)
            .fetch_optional(pool)
            .await
    }

    /// Finds a user's membership in a group
    pub async fn find_by_user(
        pool: &PgPool,
        group_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {MEMBER_COLUMNS} FROM group_members
             WHERE group_id = $1 AND user_id = $2"
        );

        sqlx::query_as::<_, GroupMember>(&query)
            .bind(group_id)
            .bind(user_id)
            .fetch_optional(pool)
            .await
    }

    /// Finds a membership by ID
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let query = format!("SELECT {MEMBER_COLUMNS} FROM group_members WHERE id = $1");

        sqlx::query_as::<_, GroupMember>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Marks a member as paid for the current rotation
    ///
    /// Guarded on the unpaid state; returns whether the flag flipped, so
    /// a duplicate settlement pass can detect it already ran.
    pub async fn mark_paid<'e, E>(executor: E, id: Uuid) -> Result<bool, sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let result = sqlx::query(
            r#"
            UPDATE group_members
            SET has_been_paid = TRUE,
                updated_at = NOW()
            WHERE id = $1 AND has_been_paid = FALSE
            "#,
        )
        .bind(id)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Resets the paid flag for all active members of a group
    ///
    /// Called when the rotation wraps back to slot 1. Runs inside the
    /// finalize transaction.
    pub async fn reset_paid_flags<'e, E>(executor: E, group_id: Uuid) -> Result<u64, sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let result = sqlx::query(
            r#"
            UPDATE group_members
            SET has_been_paid = FALSE,
                updated_at = NOW()
            WHERE group_id = $1 AND status = 'active'
            "#,
        )
        .bind(group_id)
        .execute(executor)
        .await?;

        Ok(result.rows_affected())
    }

    /// Emails of all active members, for group-wide notifications
    pub async fn active_emails(pool: &PgPool, group_id: Uuid) -> Result<Vec<String>, sqlx::Error> {
        let emails: Vec<(String,)> = sqlx::query_as(
            "SELECT email FROM group_members
             WHERE group_id = $1 AND status = 'active'
             ORDER BY payout_order ASC",
        )
        .bind(group_id)
        .fetch_all(pool)
        .await?;

        Ok(emails.into_iter().map(|(e,)| e).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_status_as_str() {
        assert_eq!(MemberStatus::Pending.as_str(), "pending");
        assert_eq!(MemberStatus::Active.as_str(), "active");
        assert_eq!(MemberStatus::Inactive.as_str(), "inactive");
    }

    // Query methods are covered by the database integration tests
}
