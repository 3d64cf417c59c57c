/// Scheduled job model
///
/// Rows in `scheduled_jobs` form the durable delayed work queue that
/// drives the engine. Each job carries a deterministic `job_key` so that
/// enqueueing the same logical work twice collapses into one pending row
/// (partial unique index on pending state).
///
/// # State Machine
///
/// ```text
/// pending → running → succeeded
///                   → failed (attempts < limit: back to pending with backoff)
///                   → failed (attempts exhausted: terminal)
/// ```
///
/// Queue operations (claim, mark, clear) live in the engine crate's
/// `queue` module; this module is the row shape and its enums.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a job does when claimed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Wake the cycle orchestrator for a group
    StartCycle,

    /// Re-attempt one failed collection
    RetryPayment,

    /// (Re-)dispatch a group's pause notification
    PauseNotice,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::StartCycle => "start_cycle",
            JobKind::RetryPayment => "retry_payment",
            JobKind::PauseNotice => "pause_notice",
        }
    }
}

/// Job execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_state", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting for its run_at time
    Pending,

    /// Claimed by a worker
    Running,

    /// Handler completed
    Succeeded,

    /// Handler errored (may be rescheduled until attempts run out)
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

/// One durable delayed work item
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScheduledJob {
    /// Unique job ID
    pub id: Uuid,

    /// Deterministic key identifying the logical unit of work
    pub job_key: String,

    /// What to do when claimed
    pub kind: JobKind,

    /// Group this job concerns (all current kinds set it)
    pub group_id: Option<Uuid>,

    /// Payment this job concerns (retry jobs only)
    pub payment_id: Option<Uuid>,

    /// Earliest time the job may run
    pub run_at: DateTime<Utc>,

    /// Claim ordering tiebreaker; higher runs first
    pub priority: i32,

    /// Execution state
    pub state: JobState,

    /// Times a worker has run this job
    pub attempts: i32,

    /// Last handler error, if any
    pub last_error: Option<String>,

    /// When the job was created
    pub created_at: DateTime<Utc>,

    /// When the job was last updated
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_kind_as_str() {
        assert_eq!(JobKind::StartCycle.as_str(), "start_cycle");
        assert_eq!(JobKind::RetryPayment.as_str(), "retry_payment");
        assert_eq!(JobKind::PauseNotice.as_str(), "pause_notice");
    }

    #[test]
    fn test_job_state_as_str() {
        assert_eq!(JobState::Pending.as_str(), "pending");
        assert_eq!(JobState::Running.as_str(), "running");
        assert_eq!(JobState::Succeeded.as_str(), "succeeded");
        assert_eq!(JobState::Failed.as_str(), "failed");
    }

    #[test]
    fn test_job_state_is_terminal() {
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Failed.is_terminal());
    }

    #[test]
    fn test_job_kind_serde_round_trip() {
        let json = serde_json::to_string(&JobKind::StartCycle).unwrap();
        assert_eq!(json, "\"start_cycle\"");

        let parsed: JobKind = serde_json::from_str("\"retry_payment\"").unwrap();
        assert_eq!(parsed, JobKind::RetryPayment);
    }
}
