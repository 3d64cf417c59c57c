/// Cycle scheduling
///
/// Owns the deterministic job keys and the single entry point for
/// putting a group's next wake-up on the queue. Scheduling the same
/// upcoming cycle twice collapses into one pending job, so every other
/// component (finalize, resume, recovery sweep) can call
/// [`Scheduler::schedule_wake`] freely.
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use susu_shared::models::{CycleFrequency, Group, JobKind};

use crate::error::EngineError;
use crate::queue::{JobQueue, NewJob};

/// Claim-order priorities; settlement-critical work first
pub const PRIORITY_START_CYCLE: i32 = 10;
pub const PRIORITY_RETRY_PAYMENT: i32 = 5;
pub const PRIORITY_PAUSE_NOTICE: i32 = 0;

/// Key for a group's cycle wake-up at a specific instant
///
/// The timestamp makes keys distinct across cycles while duplicate
/// scheduling of the same cycle lands on the same key.
pub fn start_cycle_key(group_id: Uuid, run_at: DateTime<Utc>) -> String {
    format!("start-cycle:{group_id}:{}", run_at.timestamp())
}

/// Prefix matching any wake-up for a group, for existence checks
pub fn start_cycle_prefix(group_id: Uuid) -> String {
    format!("start-cycle:{group_id}:")
}

/// Key for one payment's next retry attempt
pub fn retry_payment_key(payment_id: Uuid, attempt: i32) -> String {
    format!("retry-payment:{payment_id}:attempt-{attempt}")
}

/// Key for a group's pause notification dispatch
pub fn pause_notice_key(group_id: Uuid) -> String {
    format!("pause-notice:{group_id}")
}

/// Generates a full cycle schedule: `count` dates starting at `start`
pub fn compute_schedule(
    start: DateTime<Utc>,
    frequency: CycleFrequency,
    count: usize,
) -> Vec<DateTime<Utc>> {
    let mut dates = Vec::with_capacity(count);
    let mut current = start;
    for _ in 0..count {
        dates.push(current);
        current = frequency.next_date(current);
    }
    dates
}

/// Validates an admin-supplied schedule
///
/// Dates are sorted and deduplicated; any date at or before `now` is
/// rejected because a cycle cannot fire in the past.
pub fn validate_schedule(
    mut dates: Vec<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<Vec<DateTime<Utc>>, EngineError> {
    if dates.is_empty() {
        return Err(EngineError::InvalidGroupState(
            "schedule must contain at least one cycle date".to_string(),
        ));
    }

    dates.sort();
    dates.dedup();

    if let Some(past) = dates.iter().find(|d| **d <= now) {
        return Err(EngineError::InvalidGroupState(format!(
            "cycle date {past} is not in the future"
        )));
    }

    Ok(dates)
}

/// Queue-facing scheduling facade
#[derive(Clone)]
pub struct Scheduler {
    queue: JobQueue,
}

impl Scheduler {
    pub fn new(queue: JobQueue) -> Self {
        Self { queue }
    }

    /// Enqueues the wake-up for a group's next cycle date
    ///
    /// Returns `true` when a wake-up is on the queue afterwards (newly
    /// enqueued or already pending). A group whose schedule is exhausted
    /// but whose rotation is not complete gets a loud warning and no
    /// job; an admin must re-seed the schedule.
    pub async fn schedule_wake(&self, group: &Group) -> Result<bool, EngineError> {
        if !group.is_active() || group.cycles_completed {
            debug!(
                group_id = %group.id,
                status = group.status.as_str(),
                "Group not eligible for wake-up scheduling"
            );
            return Ok(false);
        }

        let Some(run_at) = group.next_cycle_date else {
            if !group.cycles_completed {
                warn!(
                    group_id = %group.id,
                    current_member_cycle = group.current_member_cycle,
                    "Group schedule exhausted before rotation completed; \
                     awaiting admin re-scheduling"
                );
            }
            return Ok(false);
        };

        let enqueued = self
            .queue
            .enqueue(NewJob {
                job_key: start_cycle_key(group.id, run_at),
                kind: JobKind::StartCycle,
                group_id: Some(group.id),
                payment_id: None,
                run_at,
                priority: PRIORITY_START_CYCLE,
            })
            .await?;

        if enqueued.is_some() {
            info!(group_id = %group.id, run_at = %run_at, "Scheduled cycle wake-up");
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_compute_schedule_monthly() {
        let start = Utc.with_ymd_and_hms(2024, 1, 5, 9, 0, 0).unwrap();
        let dates = compute_schedule(start, CycleFrequency::Monthly, 3);

        assert_eq!(dates.len(), 3);
        assert_eq!(dates[0], start);
        assert_eq!(dates[1], Utc.with_ymd_and_hms(2024, 2, 5, 9, 0, 0).unwrap());
        assert_eq!(dates[2], Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_validate_schedule_sorts_and_dedups() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let d1 = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let d2 = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

        let validated = validate_schedule(vec![d2, d1, d1], now).unwrap();
        assert_eq!(validated, vec![d1, d2]);
    }

    #[test]
    fn test_validate_schedule_rejects_past_dates() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let past = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let future = Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap();

        let result = validate_schedule(vec![past, future], now);
        assert!(matches!(result, Err(EngineError::InvalidGroupState(_))));
    }

    #[test]
    fn test_validate_schedule_rejects_empty() {
        let now = Utc::now();
        assert!(validate_schedule(vec![], now).is_err());
    }

    #[test]
    fn test_job_keys_are_deterministic() {
        let group_id = Uuid::new_v4();
        let run_at = Utc.with_ymd_and_hms(2024, 4, 1, 9, 0, 0).unwrap();

        assert_eq!(
            start_cycle_key(group_id, run_at),
            start_cycle_key(group_id, run_at)
        );
        assert!(start_cycle_key(group_id, run_at).starts_with(&start_cycle_prefix(group_id)));

        let payment_id = Uuid::new_v4();
        assert_ne!(
            retry_payment_key(payment_id, 1),
            retry_payment_key(payment_id, 2)
        );
    }
}
