/// Group model and database operations
///
/// A group is a rotating savings circle: members contribute a fixed amount
/// each cycle and one member (the payee for that cycle) receives the pooled
/// total. The group row carries the cycle schedule and the rotation cursor.
///
/// # Lifecycle
///
/// ```text
/// pending → active → paused (payment_failures | refund_all)
///                  → paused (other, cycles_completed = true)
/// paused (recoverable reason) → active
/// ```
///
/// # Schedule
///
/// `future_cycles` holds every remaining cycle date, precomputed when the
/// admin schedules the group (one date per active member). Dates are
/// consumed front-to-back: finalizing a cycle pops the next date into
/// `next_cycle_date`.
///
/// # Rotation invariant
///
/// `current_member_cycle` always references an active member's
/// `payout_order`; exactly one member is the payee at a time.
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

/// Group lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "group_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum GroupStatus {
    /// Group created, schedule not yet started
    Pending,

    /// Group is cycling
    Active,

    /// Group is halted (see `PauseReason`)
    Paused,
}

impl GroupStatus {
    /// Converts state to string for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupStatus::Pending => "pending",
            GroupStatus::Active => "active",
            GroupStatus::Paused => "paused",
        }
    }
}

/// Why a group was paused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "group_pause_reason", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    /// A member's payment failed the maximum number of times
    PaymentFailures,

    /// All payments were reversed externally
    RefundAll,

    /// Natural completion of the full rotation
    Other,
}

impl PauseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PauseReason::PaymentFailures => "payment_failures",
            PauseReason::RefundAll => "refund_all",
            PauseReason::Other => "other",
        }
    }

    /// Whether an admin can resume the group out of this pause
    ///
    /// A group paused after its full rotation finished (`Other` with
    /// `cycles_completed`) has nothing left to run.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PauseReason::PaymentFailures | PauseReason::RefundAll)
    }
}

/// How often a group cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "cycle_frequency", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CycleFrequency {
    Weekly,
    BiWeekly,
    Monthly,
}

impl CycleFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleFrequency::Weekly => "weekly",
            CycleFrequency::BiWeekly => "biweekly",
            CycleFrequency::Monthly => "monthly",
        }
    }

    /// Returns the cycle date following `from`
    ///
    /// Monthly steps are calendar months, not 30-day blocks, so a group
    /// that fires on the 5th keeps firing on the 5th.
    pub fn next_date(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            CycleFrequency::Weekly => from + chrono::Duration::days(7),
            CycleFrequency::BiWeekly => from + chrono::Duration::days(14),
            CycleFrequency::Monthly => from
                .checked_add_months(chrono::Months::new(1))
                .unwrap_or(from + chrono::Duration::days(30)),
        }
    }
}

/// Ordered sequence of remaining cycle dates, consumed front-to-back
///
/// Persisted as a JSONB array of ISO-8601 timestamps. Modeled as a
/// newtype so pop-front semantics live in one place instead of being
/// re-derived at every read site.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FutureCycles(pub Vec<DateTime<Utc>>);

impl FutureCycles {
    pub fn new(dates: Vec<DateTime<Utc>>) -> Self {
        FutureCycles(dates)
    }

    /// Removes and returns the earliest remaining date
    pub fn pop_front(&mut self) -> Option<DateTime<Utc>> {
        if self.0.is_empty() {
            None
        } else {
            Some(self.0.remove(0))
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Group model representing one savings circle
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Group {
    /// Unique group ID
    pub id: Uuid,

    /// Human-readable group name
    pub name: String,

    /// Fixed contribution per member per cycle
    pub contribution_amount: Decimal,

    /// How often the group cycles
    pub cycle_frequency: CycleFrequency,

    /// How the payout order was assigned (informational)
    pub payout_order_method: String,

    /// Current lifecycle state
    pub status: GroupStatus,

    /// Why the group is paused (null while not paused)
    pub pause_reason: Option<PauseReason>,

    /// Whether the schedule has been started
    pub cycle_started: bool,

    /// When the next cycle fires (null once the schedule is exhausted)
    pub next_cycle_date: Option<DateTime<Utc>>,

    /// Remaining precomputed cycle dates
    pub future_cycles: Json<FutureCycles>,

    /// Payout-order slot currently receiving (1..N)
    pub current_member_cycle: i32,

    /// Completed full rotations
    pub total_group_cycles_completed: i32,

    /// True once every member has been paid and no dates remain
    pub cycles_completed: bool,

    /// When the group was created
    pub created_at: DateTime<Utc>,

    /// When the group was last updated
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a new group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGroup {
    pub name: String,
    pub contribution_amount: Decimal,
    pub cycle_frequency: CycleFrequency,
}

const GROUP_COLUMNS: &str = "id, name, contribution_amount, cycle_frequency, payout_order_method, \
     status, pause_reason, cycle_started, next_cycle_date, future_cycles, \
     current_member_cycle, total_group_cycles_completed, cycles_completed, \
     created_at, updated_at";

impl Group {
    /// Creates a new group in pending state
    pub async fn create(pool: &PgPool, data: CreateGroup) -> Result<Self, sqlx::Error> {
        let query = format!(
            "INSERT INTO groups (name, contribution_amount, cycle_frequency)
             VALUES ($1, $2, $3)
             RETURNING {GROUP_COLUMNS}"
        );

        sqlx::query_as::<_, Group>(&query)
            .bind(data.name)
            .bind(data.contribution_amount)
            .bind(data.cycle_frequency)
            .fetch_one(pool)
            .await
    }

    /// Finds a group by ID
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let query = format!("SELECT {GROUP_COLUMNS} FROM groups WHERE id = $1");

        sqlx::query_as::<_, Group>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Installs a freshly computed cycle schedule and activates the group
    ///
    /// Called by the admin scheduling operation; resets the rotation
    /// cursor and the completion flags.
    pub async fn install_schedule(
        pool: &PgPool,
        id: Uuid,
        next_cycle_date: DateTime<Utc>,
        future_cycles: &FutureCycles,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "UPDATE groups
             SET status = 'active',
                 pause_reason = NULL,
                 cycle_started = TRUE,
                 next_cycle_date = $2,
                 future_cycles = $3,
                 cycles_completed = FALSE,
                 updated_at = NOW()
             WHERE id = $1
             RETURNING {GROUP_COLUMNS}"
        );

        sqlx::query_as::<_, Group>(&query)
            .bind(id)
            .bind(next_cycle_date)
            .bind(Json(future_cycles))
            .fetch_optional(pool)
            .await
    }

    /// Transitions the group to paused with the given reason
    ///
    /// Only an active or pending group can pause; pausing an already
    /// paused group returns None and leaves the original reason intact.
    pub async fn mark_paused(
        pool: &PgPool,
        id: Uuid,
        reason: PauseReason,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "UPDATE groups
             SET status = 'paused',
                 pause_reason = $2,
                 updated_at = NOW()
             WHERE id = $1 AND status <> 'paused'
             RETURNING {GROUP_COLUMNS}"
        );

        sqlx::query_as::<_, Group>(&query)
            .bind(id)
            .bind(reason)
            .fetch_optional(pool)
            .await
    }

    /// Transitions a paused group back to active
    ///
    /// Clears the pause reason and sets `cycle_started` so the scheduler
    /// treats the group as mid-schedule. Guarded on the paused state.
    pub async fn mark_resumed(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "UPDATE groups
             SET status = 'active',
                 pause_reason = NULL,
                 cycle_started = TRUE,
                 updated_at = NOW()
             WHERE id = $1 AND status = 'paused'
             RETURNING {GROUP_COLUMNS}"
        );

        sqlx::query_as::<_, Group>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Advances the rotation cursor after a finalized cycle
    ///
    /// Guarded on the expected cursor value so a duplicate finalize can
    /// never double-advance: the second update matches zero rows.
    /// `completed` marks the rotation fully done (wrapped with no dates
    /// left); setting it here keeps the completion flag in the same
    /// transaction as the advance, so a crash cannot leave a finished
    /// group looking unfinished. Runs inside the finalize transaction.
    pub async fn advance_cycle<'e, E>(
        executor: E,
        id: Uuid,
        expected_cycle: i32,
        next_member_cycle: i32,
        wrapped: bool,
        completed: bool,
        next_cycle_date: Option<DateTime<Utc>>,
        remaining: &FutureCycles,
    ) -> Result<bool, sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let result = sqlx::query(
            r#"
            UPDATE groups
            SET current_member_cycle = $3,
                total_group_cycles_completed = total_group_cycles_completed + $4,
                cycles_completed = $5,
                next_cycle_date = $6,
                future_cycles = $7,
                updated_at = NOW()
            WHERE id = $1 AND current_member_cycle = $2
            "#,
        )
        .bind(id)
        .bind(expected_cycle)
        .bind(next_member_cycle)
        .bind(if wrapped { 1i32 } else { 0i32 })
        .bind(completed)
        .bind(next_cycle_date)
        .bind(Json(remaining))
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Lists active groups that still have cycles to run
    ///
    /// Used by the recovery sweeper at startup.
    pub async fn list_active_incomplete(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {GROUP_COLUMNS} FROM groups
             WHERE status = 'active'
               AND cycles_completed = FALSE
               AND next_cycle_date IS NOT NULL
             ORDER BY next_cycle_date ASC"
        );

        sqlx::query_as::<_, Group>(&query).fetch_all(pool).await
    }

    /// Lists groups whose rotation finished but that were never retired
    ///
    /// Finalize pauses a completed group after its transaction commits;
    /// a crash in between strands the group here. The recovery sweeper
    /// picks these up and completes the pause.
    pub async fn list_active_completed(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {GROUP_COLUMNS} FROM groups
             WHERE status = 'active'
               AND cycles_completed = TRUE
             ORDER BY updated_at ASC"
        );

        sqlx::query_as::<_, Group>(&query).fetch_all(pool).await
    }

    /// Lists paused groups
    pub async fn list_paused(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {GROUP_COLUMNS} FROM groups
             WHERE status = 'paused'
             ORDER BY updated_at ASC"
        );

        sqlx::query_as::<_, Group>(&query).fetch_all(pool).await
    }

    /// Whether this group can accept a cycle wake-up
    pub fn is_active(&self) -> bool {
        self.status == GroupStatus::Active
    }
}

/// Computes the rotation slot after `current` for a group with
/// `active_count` members
///
/// Returns `(next_slot, wrapped)`; `wrapped` is true when the rotation
/// returned to slot 1, i.e. every member has received a payout.
pub fn next_rotation(current: i32, active_count: i32) -> (i32, bool) {
    if current < active_count {
        (current + 1, false)
    } else {
        (1, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_group_status_as_str() {
        assert_eq!(GroupStatus::Pending.as_str(), "pending");
        assert_eq!(GroupStatus::Active.as_str(), "active");
        assert_eq!(GroupStatus::Paused.as_str(), "paused");
    }

    #[test]
    fn test_pause_reason_recoverable() {
        assert!(PauseReason::PaymentFailures.is_recoverable());
        assert!(PauseReason::RefundAll.is_recoverable());
        assert!(!PauseReason::Other.is_recoverable());
    }

    #[test]
    fn test_frequency_next_date_weekly() {
        let from = Utc.with_ymd_and_hms(2024, 1, 5, 9, 0, 0).unwrap();
        let next = CycleFrequency::Weekly.next_date(from);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 12, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_frequency_next_date_biweekly() {
        let from = Utc.with_ymd_and_hms(2024, 1, 5, 9, 0, 0).unwrap();
        let next = CycleFrequency::BiWeekly.next_date(from);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 19, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_frequency_next_date_monthly_keeps_day() {
        let from = Utc.with_ymd_and_hms(2024, 1, 5, 9, 0, 0).unwrap();
        let next = CycleFrequency::Monthly.next_date(from);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 2, 5, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_frequency_next_date_monthly_clamps_end_of_month() {
        let from = Utc.with_ymd_and_hms(2024, 1, 31, 9, 0, 0).unwrap();
        let next = CycleFrequency::Monthly.next_date(from);
        // February 2024 has 29 days
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 2, 29, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_future_cycles_pop_front_order() {
        let d1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let d2 = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let mut cycles = FutureCycles::new(vec![d1, d2]);

        assert_eq!(cycles.len(), 2);
        assert_eq!(cycles.pop_front(), Some(d1));
        assert_eq!(cycles.pop_front(), Some(d2));
        assert_eq!(cycles.pop_front(), None);
        assert!(cycles.is_empty());
    }

    #[test]
    fn test_future_cycles_json_round_trip() {
        let d1 = Utc.with_ymd_and_hms(2024, 3, 15, 12, 30, 0).unwrap();
        let cycles = FutureCycles::new(vec![d1]);

        let json = serde_json::to_string(&cycles).unwrap();
        // Serialized as a plain array of ISO-8601 timestamps
        assert!(json.starts_with('['));
        assert!(json.contains("2024-03-15T12:30:00"));

        let parsed: FutureCycles = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, cycles);
    }

    #[test]
    fn test_next_rotation_advances() {
        assert_eq!(next_rotation(1, 3), (2, false));
        assert_eq!(next_rotation(2, 3), (3, false));
    }

    #[test]
    fn test_next_rotation_wraps() {
        assert_eq!(next_rotation(3, 3), (1, true));
        // Cursor beyond the member count still wraps
        assert_eq!(next_rotation(5, 3), (1, true));
    }

    #[test]
    fn test_next_rotation_single_member() {
        assert_eq!(next_rotation(1, 1), (1, true));
    }
}
