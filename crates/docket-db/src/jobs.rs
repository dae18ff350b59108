//! Job store implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use docket_core::{Error, Job, JobStatus, JobStore, JobType, NewJob, QueueStats, Result};

/// PostgreSQL implementation of JobStore.
///
/// Claim atomicity relies on `FOR UPDATE SKIP LOCKED`: concurrent claimers
/// lock disjoint row sets, so each eligible row is handed to at most one
/// caller without blocking the others.
#[derive(Clone)]
pub struct PgJobStore {
    pool: Pool<Postgres>,
}

/// Columns returned for every Job read.
const JOB_COLUMNS: &str = "id, document_id, user_id, job_type::text, status::text, priority, \
     queue_name, worker_id, attempts, max_attempts, next_retry_at, retry_delay_seconds, \
     payload, progress_current, progress_total, progress_percentage, progress_message, \
     queued_at, started_at, completed_at, failed_at, result_data, error_message, \
     error_stack, error_code, depends_on, triggers";

impl PgJobStore {
    /// Create a new PgJobStore with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Convert JobType to string for database.
    fn job_type_to_str(job_type: JobType) -> &'static str {
        match job_type {
            JobType::ParsePdf => "parse_pdf",
            JobType::ParseMarkdown => "parse_markdown",
            JobType::ParseText => "parse_text",
            JobType::ChunkDocument => "chunk_document",
            JobType::EmbedChunks => "embed_chunks",
            JobType::CleanupTemp => "cleanup_temp",
        }
    }

    /// Convert string from database to JobType.
    fn str_to_job_type(s: &str) -> JobType {
        match s {
            "parse_pdf" => JobType::ParsePdf,
            "parse_markdown" => JobType::ParseMarkdown,
            "parse_text" => JobType::ParseText,
            "chunk_document" => JobType::ChunkDocument,
            "embed_chunks" => JobType::EmbedChunks,
            "cleanup_temp" => JobType::CleanupTemp,
            _ => JobType::CleanupTemp, // fallback
        }
    }

    /// Convert JobStatus to string for database.
    fn job_status_to_str(status: JobStatus) -> &'static str {
        match status {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Retry => "retry",
        }
    }

    /// Convert string from database to JobStatus.
    fn str_to_job_status(s: &str) -> JobStatus {
        match s {
            "queued" => JobStatus::Queued,
            "processing" => JobStatus::Processing,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            "cancelled" => JobStatus::Cancelled,
            "retry" => JobStatus::Retry,
            _ => JobStatus::Queued, // fallback
        }
    }

    /// Progress percentage from a current/total pair, two decimals, clamped.
    ///
    /// A zero or negative `total` yields 0.0 rather than a division error.
    pub fn compute_percentage(current: i32, total: i32) -> f64 {
        if total <= 0 {
            return 0.0;
        }
        let pct = (current as f64 / total as f64) * 100.0;
        (pct.clamp(0.0, 100.0) * 100.0).round() / 100.0
    }

    /// Parse a job row into a Job struct.
    fn parse_job_row(row: sqlx::postgres::PgRow) -> Job {
        Job {
            id: row.get("id"),
            document_id: row.get("document_id"),
            user_id: row.get("user_id"),
            job_type: Self::str_to_job_type(row.get("job_type")),
            status: Self::str_to_job_status(row.get("status")),
            priority: row.get("priority"),
            queue_name: row.get("queue_name"),
            worker_id: row.get("worker_id"),
            attempts: row.get("attempts"),
            max_attempts: row.get("max_attempts"),
            next_retry_at: row.get("next_retry_at"),
            retry_delay_seconds: row.get("retry_delay_seconds"),
            payload: row.get("payload"),
            progress_current: row.get("progress_current"),
            progress_total: row.get("progress_total"),
            progress_percentage: row.get("progress_percentage"),
            progress_message: row.get("progress_message"),
            queued_at: row.get("queued_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
            failed_at: row.get("failed_at"),
            result_data: row.get("result_data"),
            error_message: row.get("error_message"),
            error_stack: row.get("error_stack"),
            error_code: row.get("error_code"),
            depends_on: row.get("depends_on"),
            triggers: row.get("triggers"),
        }
    }

    fn chrono_duration(d: Duration) -> chrono::Duration {
        chrono::Duration::seconds(d.as_secs() as i64)
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn enqueue(&self, job: NewJob) -> Result<Uuid> {
        let job_id = Uuid::now_v7();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO job_queue (id, document_id, user_id, job_type, status, priority, \
             queue_name, max_attempts, retry_delay_seconds, payload, depends_on, triggers, queued_at)
             VALUES ($1, $2, $3, $4::job_type, 'queued'::job_status, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(job_id)
        .bind(job.document_id)
        .bind(job.user_id)
        .bind(Self::job_type_to_str(job.job_type))
        .bind(job.priority)
        .bind(&job.queue_name)
        .bind(job.max_attempts)
        .bind(job.retry_delay_seconds)
        .bind(&job.payload)
        .bind(&job.depends_on)
        .bind(&job.triggers)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "job_store",
            op = "enqueue",
            job_id = %job_id,
            job_type = ?job.job_type,
            queue = %job.queue_name,
            "Job enqueued"
        );
        Ok(job_id)
    }

    async fn claim_batch(
        &self,
        queue: &str,
        capacity: usize,
        worker_id: &str,
    ) -> Result<Vec<Job>> {
        if capacity == 0 {
            return Ok(Vec::new());
        }
        let now = Utc::now();

        // FOR UPDATE SKIP LOCKED in the subquery: concurrent claimers pick
        // disjoint rows and never wait on each other's locks.
        let query = format!(
            "UPDATE job_queue
             SET status = 'processing'::job_status, worker_id = $1, started_at = $2,
                 attempts = attempts + 1, next_retry_at = NULL,
                 progress_current = 0, progress_total = 0, progress_percentage = 0,
                 progress_message = NULL
             WHERE id IN (
                 SELECT id FROM job_queue
                 WHERE queue_name = $3
                   AND attempts < max_attempts
                   AND (status = 'queued'::job_status
                        OR (status = 'retry'::job_status AND next_retry_at <= $2))
                 ORDER BY priority ASC, queued_at ASC
                 LIMIT $4
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {JOB_COLUMNS}"
        );

        let rows = sqlx::query(&query)
            .bind(worker_id)
            .bind(now)
            .bind(queue)
            .bind(capacity as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let mut jobs: Vec<Job> = rows.into_iter().map(Self::parse_job_row).collect();
        // RETURNING does not preserve subquery order.
        jobs.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.queued_at.cmp(&b.queued_at))
        });
        Ok(jobs)
    }

    async fn mark_completed(&self, job_id: Uuid, result: Option<JsonValue>) -> Result<()> {
        let now = Utc::now();

        let row = sqlx::query(
            "UPDATE job_queue
             SET status = 'completed'::job_status, completed_at = $1, result_data = $2,
                 progress_current = progress_total, progress_percentage = 100,
                 error_message = NULL, error_stack = NULL, error_code = NULL
             WHERE id = $3 AND status = 'processing'::job_status
             RETURNING started_at",
        )
        .bind(now)
        .bind(&result)
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        match row {
            Some(row) => {
                let started_at: Option<DateTime<Utc>> = row.get("started_at");
                let duration_ms = started_at.map(|s| (now - s).num_milliseconds());
                debug!(
                    subsystem = "db",
                    component = "job_store",
                    op = "mark_completed",
                    job_id = %job_id,
                    duration_ms = duration_ms.unwrap_or_default(),
                    "Job row completed"
                );
            }
            None => {
                // Ownership was lost (stale sweep or cancellation raced us).
                warn!(
                    subsystem = "db",
                    component = "job_store",
                    op = "mark_completed",
                    job_id = %job_id,
                    "Completion for a job no longer in processing state"
                );
            }
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        job_id: Uuid,
        error: &str,
        error_code: Option<&str>,
        error_stack: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now();

        let updated = sqlx::query(
            "UPDATE job_queue
             SET status = 'failed'::job_status, failed_at = $1,
                 error_message = $2, error_code = $3, error_stack = $4
             WHERE id = $5 AND status = 'processing'::job_status",
        )
        .bind(now)
        .bind(error)
        .bind(error_code)
        .bind(error_stack)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if updated.rows_affected() == 0 {
            warn!(
                subsystem = "db",
                component = "job_store",
                op = "mark_failed",
                job_id = %job_id,
                "Failure report for a job no longer in processing state"
            );
        }
        Ok(())
    }

    async fn mark_retry(
        &self,
        job_id: Uuid,
        error: &str,
        next_retry_at: DateTime<Utc>,
    ) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE job_queue
             SET status = 'retry'::job_status, next_retry_at = $1, error_message = $2,
                 worker_id = NULL, started_at = NULL,
                 progress_current = 0, progress_total = 0, progress_percentage = 0,
                 progress_message = NULL
             WHERE id = $3 AND status = 'processing'::job_status",
        )
        .bind(next_retry_at)
        .bind(error)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if updated.rows_affected() == 0 {
            warn!(
                subsystem = "db",
                component = "job_store",
                op = "mark_retry",
                job_id = %job_id,
                "Retry request for a job no longer in processing state"
            );
        }
        Ok(())
    }

    async fn update_progress(
        &self,
        job_id: Uuid,
        current: i32,
        total: i32,
        message: Option<&str>,
    ) -> Result<()> {
        let percentage = Self::compute_percentage(current, total);

        sqlx::query(
            "UPDATE job_queue
             SET progress_current = $1, progress_total = $2,
                 progress_percentage = $3, progress_message = $4
             WHERE id = $5 AND status = 'processing'::job_status",
        )
        .bind(current)
        .bind(total)
        .bind(percentage)
        .bind(message)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn cancel(&self, job_id: Uuid) -> Result<bool> {
        let now = Utc::now();

        let updated = sqlx::query(
            "UPDATE job_queue
             SET status = 'cancelled'::job_status, completed_at = $1
             WHERE id = $2 AND status IN ('queued'::job_status, 'retry'::job_status)",
        )
        .bind(now)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(updated.rows_affected() > 0)
    }

    async fn reset_stale(&self, older_than: Duration) -> Result<u64> {
        let now = Utc::now();
        let cutoff = now - Self::chrono_duration(older_than);

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        // Attempts exhausted: nothing left to retry, fail terminally.
        let failed = sqlx::query(
            "UPDATE job_queue
             SET status = 'failed'::job_status, failed_at = $1, worker_id = NULL,
                 error_message = 'Stale processing job: worker did not report completion and no attempts remain',
                 error_code = 'stale_exhausted'
             WHERE status = 'processing'::job_status
               AND started_at < $2
               AND attempts >= max_attempts",
        )
        .bind(now)
        .bind(cutoff)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let requeued = sqlx::query(
            "UPDATE job_queue
             SET status = 'queued'::job_status, worker_id = NULL, started_at = NULL,
                 progress_current = 0, progress_total = 0, progress_percentage = 0,
                 progress_message = NULL,
                 error_message = 'Reset after worker crash or stall (stale processing)',
                 error_code = 'stale_reset'
             WHERE status = 'processing'::job_status
               AND started_at < $1
               AND attempts < max_attempts",
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;

        let total = failed.rows_affected() + requeued.rows_affected();
        if total > 0 {
            warn!(
                subsystem = "db",
                component = "job_store",
                op = "reset_stale",
                requeued = requeued.rows_affected(),
                failed = failed.rows_affected(),
                "Recovered stale processing jobs"
            );
        }
        Ok(total)
    }

    async fn purge_old(
        &self,
        completed_retention: Duration,
        failed_retention: Duration,
    ) -> Result<u64> {
        let now = Utc::now();
        let completed_cutoff = now - Self::chrono_duration(completed_retention);
        let failed_cutoff = now - Self::chrono_duration(failed_retention);

        let completed = sqlx::query(
            "DELETE FROM job_queue
             WHERE status = 'completed'::job_status AND completed_at < $1",
        )
        .bind(completed_cutoff)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        let failed = sqlx::query(
            "DELETE FROM job_queue
             WHERE status = 'failed'::job_status AND failed_at < $1",
        )
        .bind(failed_cutoff)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        let total = completed.rows_affected() + failed.rows_affected();
        debug!(
            subsystem = "db",
            component = "job_store",
            op = "purge_old",
            completed = completed.rows_affected(),
            failed = failed.rows_affected(),
            "Purged old terminal jobs"
        );
        Ok(total)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        let query = format!("SELECT {JOB_COLUMNS} FROM job_queue WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(row.map(Self::parse_job_row))
    }

    async fn pending_count(&self, queue: &str) -> Result<i64> {
        let now = Utc::now();
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM job_queue
             WHERE queue_name = $1
               AND (status = 'queued'::job_status
                    OR (status = 'retry'::job_status AND next_retry_at <= $2))",
        )
        .bind(queue)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(count)
    }

    async fn queue_stats(&self) -> Result<Vec<QueueStats>> {
        let rows = sqlx::query(
            "SELECT queue_name,
                COUNT(*) FILTER (WHERE status IN ('queued', 'retry')) as pending,
                COUNT(*) FILTER (WHERE status = 'processing') as active,
                COUNT(*) FILTER (WHERE status = 'completed') as completed,
                COUNT(*) FILTER (WHERE status = 'failed') as failed
             FROM job_queue
             GROUP BY queue_name
             ORDER BY queue_name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| QueueStats {
                queue_name: row.get("queue_name"),
                pending: row.get("pending"),
                active: row.get("active"),
                completed: row.get("completed"),
                failed: row.get("failed"),
            })
            .collect())
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<Job>> {
        let query =
            format!("SELECT {JOB_COLUMNS} FROM job_queue ORDER BY queued_at DESC LIMIT $1");
        let rows = sqlx::query(&query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_job_row).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_type_to_str_all_variants() {
        assert_eq!(PgJobStore::job_type_to_str(JobType::ParsePdf), "parse_pdf");
        assert_eq!(
            PgJobStore::job_type_to_str(JobType::ParseMarkdown),
            "parse_markdown"
        );
        assert_eq!(
            PgJobStore::job_type_to_str(JobType::ParseText),
            "parse_text"
        );
        assert_eq!(
            PgJobStore::job_type_to_str(JobType::ChunkDocument),
            "chunk_document"
        );
        assert_eq!(
            PgJobStore::job_type_to_str(JobType::EmbedChunks),
            "embed_chunks"
        );
        assert_eq!(
            PgJobStore::job_type_to_str(JobType::CleanupTemp),
            "cleanup_temp"
        );
    }

    #[test]
    fn test_job_type_round_trip() {
        for job_type in JobType::all() {
            let str_repr = PgJobStore::job_type_to_str(job_type);
            let recovered = PgJobStore::str_to_job_type(str_repr);
            assert_eq!(job_type, recovered);
        }
    }

    #[test]
    fn test_str_to_job_type_unknown_fallback() {
        assert_eq!(
            PgJobStore::str_to_job_type("unknown_type"),
            JobType::CleanupTemp
        );
        assert_eq!(PgJobStore::str_to_job_type(""), JobType::CleanupTemp);
    }

    #[test]
    fn test_job_status_round_trip() {
        let statuses = [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
            JobStatus::Retry,
        ];

        for status in statuses {
            let str_repr = PgJobStore::job_status_to_str(status);
            let recovered = PgJobStore::str_to_job_status(str_repr);
            assert_eq!(status, recovered);
        }
    }

    #[test]
    fn test_str_to_job_status_unknown_fallback() {
        assert_eq!(
            PgJobStore::str_to_job_status("bogus"),
            JobStatus::Queued
        );
    }

    #[test]
    fn test_job_status_strings_are_unique() {
        let statuses = [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
            JobStatus::Retry,
        ];

        let strings: Vec<&str> = statuses
            .iter()
            .map(|s| PgJobStore::job_status_to_str(*s))
            .collect();
        let mut unique_strings = strings.clone();
        unique_strings.sort();
        unique_strings.dedup();

        assert_eq!(
            strings.len(),
            unique_strings.len(),
            "JobStatus strings must be unique"
        );
    }

    #[test]
    fn test_compute_percentage_exact() {
        assert_eq!(PgJobStore::compute_percentage(30, 120), 25.00);
        assert_eq!(PgJobStore::compute_percentage(0, 120), 0.0);
        assert_eq!(PgJobStore::compute_percentage(120, 120), 100.0);
    }

    #[test]
    fn test_compute_percentage_rounds_to_two_decimals() {
        assert_eq!(PgJobStore::compute_percentage(1, 3), 33.33);
        assert_eq!(PgJobStore::compute_percentage(2, 3), 66.67);
        assert_eq!(PgJobStore::compute_percentage(1, 7), 14.29);
    }

    #[test]
    fn test_compute_percentage_degenerate_inputs() {
        // No division by zero, no negative or >100 output.
        assert_eq!(PgJobStore::compute_percentage(5, 0), 0.0);
        assert_eq!(PgJobStore::compute_percentage(5, -1), 0.0);
        assert_eq!(PgJobStore::compute_percentage(-5, 10), 0.0);
        assert_eq!(PgJobStore::compute_percentage(200, 100), 100.0);
    }
}
