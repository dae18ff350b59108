//! Trait definitions shared across docket crates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::time::Duration;
use uuid::Uuid;

use crate::{Job, NewJob, QueueStats, Result};

// =============================================================================
// JOB STORE
// =============================================================================

/// Persisted job table plus the atomic operations used to mutate it.
///
/// This is the only coordination point between workers: implementations must
/// guarantee that `claim_batch` hands each eligible row to at most one caller
/// even under concurrent polling.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a QUEUED job and return its id. No side effects on other rows.
    async fn enqueue(&self, job: NewJob) -> Result<Uuid>;

    /// Atomically claim up to `capacity` eligible jobs from `queue`.
    ///
    /// Eligible rows are QUEUED, or RETRY with `next_retry_at` in the past,
    /// with attempts remaining; served by `priority ASC, queued_at ASC`.
    /// Claimed rows come back as PROCESSING with `worker_id` set,
    /// `started_at` stamped, and `attempts` incremented. Returns fewer than
    /// `capacity` rows (possibly none) when fewer are eligible; never blocks
    /// on rows another caller holds.
    async fn claim_batch(&self, queue: &str, capacity: usize, worker_id: &str)
        -> Result<Vec<Job>>;

    /// Mark a PROCESSING job as completed with optional result payload.
    ///
    /// Callers must own the job (`status == PROCESSING`, `worker_id == self`).
    async fn mark_completed(&self, job_id: Uuid, result: Option<JsonValue>) -> Result<()>;

    /// Mark a PROCESSING job as terminally failed.
    async fn mark_failed(
        &self,
        job_id: Uuid,
        error: &str,
        error_code: Option<&str>,
        error_stack: Option<&str>,
    ) -> Result<()>;

    /// Put a PROCESSING job back into RETRY, eligible again at `next_retry_at`.
    async fn mark_retry(
        &self,
        job_id: Uuid,
        error: &str,
        next_retry_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Update the progress fields of a job. Percentage is derived from
    /// `current/total` and clamped to 0..=100.
    async fn update_progress(
        &self,
        job_id: Uuid,
        current: i32,
        total: i32,
        message: Option<&str>,
    ) -> Result<()>;

    /// Cancel a QUEUED or RETRY job. Returns `false` when the job was not in
    /// a cancellable state (already claimed or terminal).
    async fn cancel(&self, job_id: Uuid) -> Result<bool>;

    /// Reset PROCESSING jobs whose `started_at` is older than `older_than`.
    ///
    /// Jobs with attempts remaining go back to QUEUED with `worker_id` and
    /// `started_at` cleared; jobs with no attempts left are marked FAILED.
    /// Returns the number of rows touched.
    async fn reset_stale(&self, older_than: Duration) -> Result<u64>;

    /// Delete COMPLETED rows older than `completed_retention` and FAILED rows
    /// older than `failed_retention`. Returns the number of rows deleted.
    async fn purge_old(
        &self,
        completed_retention: Duration,
        failed_retention: Duration,
    ) -> Result<u64>;

    /// Fetch a job by id.
    async fn get(&self, job_id: Uuid) -> Result<Option<Job>>;

    /// Count of claimable rows in a queue (QUEUED + due RETRY).
    async fn pending_count(&self, queue: &str) -> Result<i64>;

    /// Per-queue statistics across all queues.
    async fn queue_stats(&self) -> Result<Vec<QueueStats>>;

    /// List the most recently enqueued jobs.
    async fn list_recent(&self, limit: i64) -> Result<Vec<Job>>;
}
