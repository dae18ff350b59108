//! Core data model for the docket job queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::defaults;

// =============================================================================
// JOB TYPES
// =============================================================================

/// Status of a job in the queue.
///
/// `Completed`, `Failed`, and `Cancelled` are terminal: a job never
/// transitions out of them. `Retry` jobs become claimable again once their
/// `next_retry_at` passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Retry,
}

impl JobStatus {
    /// Whether this status is terminal (no further transitions allowed).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Type of job to process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Extract text and layout from a PDF document
    ParsePdf,
    /// Parse a Markdown document into sections
    ParseMarkdown,
    /// Parse a plain-text document
    ParseText,
    /// Split parsed content into chunks
    ChunkDocument,
    /// Generate embeddings for document chunks
    EmbedChunks,
    /// Remove temporary artifacts left by earlier stages
    CleanupTemp,
}

impl JobType {
    /// Default priority for this job type (lower = served first).
    pub fn default_priority(&self) -> i32 {
        match self {
            // Parsing gates everything downstream
            JobType::ParsePdf => 2,
            JobType::ParseMarkdown => 2,
            JobType::ParseText => 2,
            JobType::ChunkDocument => 4,
            JobType::EmbedChunks => 5,
            // Housekeeping yields to pipeline work
            JobType::CleanupTemp => 9,
        }
    }

    /// Queue this job type is routed to by default.
    pub fn default_queue(&self) -> &'static str {
        match self {
            JobType::CleanupTemp => defaults::QUEUE_MAINTENANCE,
            _ => defaults::QUEUE_INGEST,
        }
    }

    /// All known job types, in dispatch-table order.
    pub fn all() -> [JobType; 6] {
        [
            JobType::ParsePdf,
            JobType::ParseMarkdown,
            JobType::ParseText,
            JobType::ChunkDocument,
            JobType::EmbedChunks,
            JobType::CleanupTemp,
        ]
    }
}

/// A job in the processing queue.
///
/// The queue never interprets `document_id`/`user_id` (correlation refs) or
/// `payload`; they pass through to the handler unchanged. `depends_on` and
/// `triggers` are persisted metadata only — claim and scheduling never
/// consult them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub document_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub job_type: JobType,
    pub status: JobStatus,
    pub priority: i32,
    pub queue_name: String,
    pub worker_id: Option<String>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub retry_delay_seconds: i32,
    pub payload: Option<JsonValue>,
    pub progress_current: i32,
    pub progress_total: i32,
    pub progress_percentage: f64,
    pub progress_message: Option<String>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub result_data: Option<JsonValue>,
    pub error_message: Option<String>,
    pub error_stack: Option<String>,
    pub error_code: Option<String>,
    pub depends_on: Vec<Uuid>,
    pub triggers: Option<JsonValue>,
}

impl Job {
    /// Whether this job has retry attempts remaining.
    ///
    /// `attempts` counts started attempts, so a job that just failed its
    /// `max_attempts`-th execution has none left.
    pub fn has_attempts_remaining(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

/// Parameters for enqueueing a new job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub document_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub job_type: JobType,
    pub priority: i32,
    pub queue_name: String,
    pub max_attempts: i32,
    pub retry_delay_seconds: i32,
    pub payload: Option<JsonValue>,
    pub depends_on: Vec<Uuid>,
    pub triggers: Option<JsonValue>,
}

impl NewJob {
    /// Create a job request with type-derived defaults for priority and queue.
    pub fn new(job_type: JobType) -> Self {
        Self {
            document_id: None,
            user_id: None,
            job_type,
            priority: job_type.default_priority(),
            queue_name: job_type.default_queue().to_string(),
            max_attempts: defaults::JOB_MAX_ATTEMPTS,
            retry_delay_seconds: defaults::JOB_RETRY_DELAY_SECS,
            payload: None,
            depends_on: Vec::new(),
            triggers: None,
        }
    }

    /// Set the correlation document id.
    pub fn with_document(mut self, document_id: Uuid) -> Self {
        self.document_id = Some(document_id);
        self
    }

    /// Set the correlation user id.
    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Override the priority (lower = served first).
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Route to a specific queue.
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue_name = queue.into();
        self
    }

    /// Override the retry budget.
    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Attach the opaque handler payload.
    pub fn with_payload(mut self, payload: JsonValue) -> Self {
        self.payload = Some(payload);
        self
    }
}

// =============================================================================
// STATS & HEALTH
// =============================================================================

/// Per-queue statistics summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    pub queue_name: String,
    /// QUEUED plus due-or-future RETRY rows.
    pub pending: i64,
    /// PROCESSING rows.
    pub active: i64,
    pub completed: i64,
    pub failed: i64,
}

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Stopped,
    Running,
    Stopping,
    /// Startup failed; terminal until the worker is reconstructed.
    Error,
}

/// Point-in-time counters for one worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHealth {
    pub name: String,
    pub queue: String,
    pub state: WorkerState,
    pub active_jobs: usize,
    pub claimed_total: u64,
    pub completed_total: u64,
    pub failed_total: u64,
    pub retried_total: u64,
    pub poll_errors: u64,
    /// failed / (completed + failed); 0.0 when nothing finished yet.
    pub error_rate: f64,
}

/// Aggregate classification of the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every worker running with error rate below threshold.
    Healthy,
    /// Some workers running/healthy, others not.
    Degraded,
    /// No worker is running healthily.
    Unhealthy,
}

/// Aggregated system health snapshot for external observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub workers: Vec<WorkerHealth>,
    pub queues: Vec<QueueStats>,
    /// In-flight jobs divided by total configured capacity, 0.0..=1.0.
    pub system_load: f64,
    pub timestamp: DateTime<Utc>,
}
