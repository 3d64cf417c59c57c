/// Durable job queue operations
///
/// All delayed work (cycle wake-ups, payment retries, pause notices)
/// lives in the `scheduled_jobs` table. Enqueueing is idempotent via the
/// deterministic `job_key` and the partial unique index on pending rows;
/// claiming uses `FOR UPDATE SKIP LOCKED` so concurrent workers never
/// hand the same job to two handlers.
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use tracing::{debug, warn};
use uuid::Uuid;

use susu_shared::models::{JobKind, ScheduledJob};

/// Base delay for job-level retry backoff
const RETRY_BACKOFF_BASE_SECS: i64 = 30;

/// Ceiling for job-level retry backoff
const RETRY_BACKOFF_MAX_SECS: i64 = 3_600;

/// Input for enqueueing a job
#[derive(Debug, Clone)]
pub struct NewJob {
    /// Deterministic key; duplicate pending keys collapse to one row
    pub job_key: String,
    pub kind: JobKind,
    pub group_id: Option<Uuid>,
    pub payment_id: Option<Uuid>,
    /// Earliest time the job may run
    pub run_at: DateTime<Utc>,
    pub priority: i32,
}

const JOB_COLUMNS: &str = "id, job_key, kind, group_id, payment_id, run_at, priority, \
     state, attempts, last_error, created_at, updated_at";

/// Queue facade over the `scheduled_jobs` table
#[derive(Clone)]
pub struct JobQueue {
    pool: PgPool,
}

impl JobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enqueues a job, deduplicating on its key
    ///
    /// Returns `None` when a pending job with the same key already
    /// exists; the caller's work is already scheduled.
    pub async fn enqueue(&self, job: NewJob) -> Result<Option<ScheduledJob>, sqlx::Error> {
        let query = format!(
            "INSERT INTO scheduled_jobs (job_key, kind, group_id, payment_id, run_at, priority)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (job_key) WHERE state = 'pending' DO NOTHING
             RETURNING {JOB_COLUMNS}"
        );

        let inserted = sqlx::query_as::<_, ScheduledJob>(&query)
            .bind(&job.job_key)
            .bind(job.kind)
            .bind(job.group_id)
            .bind(job.payment_id)
            .bind(job.run_at)
            .bind(job.priority)
            .fetch_optional(&self.pool)
            .await?;

        match &inserted {
            Some(row) => debug!(
                job_id = %row.id,
                job_key = %row.job_key,
                kind = %row.kind.as_str(),
                run_at = %row.run_at,
                "Enqueued job"
            ),
            None => debug!(job_key = %job.job_key, "Job already pending, skipped enqueue"),
        }

        Ok(inserted)
    }

    /// Claims up to `limit` due jobs for execution
    ///
    /// Claimed rows move to `running` with their attempt counter bumped.
    /// `SKIP LOCKED` lets concurrent workers drain the queue without
    /// blocking on each other's claims.
    pub async fn claim_due(&self, limit: i64) -> Result<Vec<ScheduledJob>, sqlx::Error> {
        let query = format!(
            "UPDATE scheduled_jobs
             SET state = 'running',
                 attempts = attempts + 1,
                 updated_at = NOW()
             WHERE id IN (
                 SELECT id FROM scheduled_jobs
                 WHERE state = 'pending' AND run_at <= NOW()
                 ORDER BY priority DESC, run_at ASC
                 LIMIT $1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {JOB_COLUMNS}"
        );

        sqlx::query_as::<_, ScheduledJob>(&query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
    }

    /// Marks a running job as succeeded
    pub async fn mark_succeeded(&self, job_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE scheduled_jobs
             SET state = 'succeeded', last_error = NULL, updated_at = NOW()
             WHERE id = $1 AND state = 'running'",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Records a job failure
    ///
    /// Retryable failures below the attempt limit go back to `pending`
    /// with exponential backoff. Everything else is terminal.
    pub async fn mark_failed(
        &self,
        job: &ScheduledJob,
        error: &str,
        retryable: bool,
        max_attempts: i32,
    ) -> Result<(), sqlx::Error> {
        if retryable && job.attempts < max_attempts {
            let delay = backoff_delay(job.attempts);
            let run_at = Utc::now() + delay;

            debug!(
                job_id = %job.id,
                attempt = job.attempts,
                retry_at = %run_at,
                error = %error,
                "Job failed, rescheduling"
            );

            sqlx::query(
                "UPDATE scheduled_jobs
                 SET state = 'pending', run_at = $2, last_error = $3, updated_at = NOW()
                 WHERE id = $1 AND state = 'running'",
            )
            .bind(job.id)
            .bind(run_at)
            .bind(error)
            .execute(&self.pool)
            .await?;
        } else {
            warn!(
                job_id = %job.id,
                job_key = %job.job_key,
                attempts = job.attempts,
                error = %error,
                "Job failed terminally"
            );

            sqlx::query(
                "UPDATE scheduled_jobs
                 SET state = 'failed', last_error = $2, updated_at = NOW()
                 WHERE id = $1 AND state = 'running'",
            )
            .bind(job.id)
            .bind(error)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    /// Cancels every pending job for a group
    ///
    /// Used when a group pauses: its scheduled wake-ups and retries must
    /// not fire while paused.
    pub async fn clear_pending_for_group(&self, group_id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE scheduled_jobs
             SET state = 'failed',
                 last_error = 'cancelled: group paused',
                 updated_at = NOW()
             WHERE group_id = $1 AND state = 'pending'",
        )
        .bind(group_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Cancels pending retry jobs for one payment
    pub async fn clear_pending_for_payment(&self, payment_id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE scheduled_jobs
             SET state = 'failed',
                 last_error = 'cancelled: superseded',
                 updated_at = NOW()
             WHERE payment_id = $1 AND state = 'pending'",
        )
        .bind(payment_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Whether a pending job exists for a key prefix
    ///
    /// The recovery sweeper uses this to avoid double-scheduling work a
    /// live job already covers.
    pub async fn has_pending_with_prefix(&self, prefix: &str) -> Result<bool, sqlx::Error> {
        let row: (bool,) = sqlx::query_as(
            "SELECT EXISTS (
                 SELECT 1 FROM scheduled_jobs
                 WHERE job_key LIKE $1 || '%' AND state = 'pending'
             )",
        )
        .bind(prefix)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    /// Whether any job, in any state, ever carried this key
    ///
    /// Distinguishes "work was lost before enqueue" from "work ran and
    /// finished", which pending-only checks cannot.
    pub async fn exists_with_key(&self, job_key: &str) -> Result<bool, sqlx::Error> {
        let row: (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM scheduled_jobs WHERE job_key = $1)",
        )
        .bind(job_key)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    /// Counts pending jobs, for logging and health reporting
    pub async fn pending_count(&self) -> Result<i64, sqlx::Error> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM scheduled_jobs WHERE state = 'pending'")
                .fetch_one(&self.pool)
                .await?;

        Ok(row.0)
    }
}

/// Exponential backoff for job-level retries, capped
fn backoff_delay(attempt: i32) -> Duration {
    let exponent = attempt.max(1).min(16) as u32 - 1;
    let secs = RETRY_BACKOFF_BASE_SECS
        .saturating_mul(2_i64.saturating_pow(exponent))
        .min(RETRY_BACKOFF_MAX_SECS);
    Duration::seconds(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        assert_eq!(backoff_delay(1), Duration::seconds(30));
        assert_eq!(backoff_delay(2), Duration::seconds(60));
        assert_eq!(backoff_delay(3), Duration::seconds(120));
        assert_eq!(backoff_delay(10), Duration::seconds(RETRY_BACKOFF_MAX_SECS));
        // Out-of-range attempts still clamp
        assert_eq!(backoff_delay(0), Duration::seconds(30));
        assert_eq!(backoff_delay(100), Duration::seconds(RETRY_BACKOFF_MAX_SECS));
    }
}
