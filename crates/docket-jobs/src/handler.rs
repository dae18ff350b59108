//! Job handlers and the context they execute in.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use docket_core::{Job, JobType};

/// Cooperative cancellation flag shared between a worker and one job task.
///
/// The worker sets it when it is asked to stop or when the job's deadline
/// fires; handlers are expected to poll [`is_cancelled`](Self::is_cancelled)
/// at safe points. Nothing is preempted: a handler that never checks keeps
/// running detached after the job row has already been retried or failed.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    /// Create a new, unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress callback type for job handlers: `(current, total, message)`.
pub type ProgressCallback = Box<dyn Fn(i32, i32, Option<&str>) + Send + Sync>;

/// Context provided to job handlers.
pub struct JobContext {
    /// The job being processed.
    pub job: Job,
    cancel: CancellationFlag,
    progress_callback: Option<ProgressCallback>,
}

impl JobContext {
    /// Create a new job context.
    pub fn new(job: Job, cancel: CancellationFlag) -> Self {
        Self {
            job,
            cancel,
            progress_callback: None,
        }
    }

    /// Set the progress callback.
    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(i32, i32, Option<&str>) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    /// Report progress to the callback.
    ///
    /// The worker relays this to the job row; the handler owns the cadence.
    pub fn report_progress(&self, current: i32, total: i32, message: Option<&str>) {
        if let Some(ref callback) = self.progress_callback {
            callback(current, total, message);
        }
    }

    /// Whether the worker has requested cancellation. Handlers should check
    /// this at safe points and return early when set.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Get the correlation document ID for this job, if any.
    pub fn document_id(&self) -> Option<Uuid> {
        self.job.document_id
    }

    /// Get the opaque job payload.
    pub fn payload(&self) -> Option<&JsonValue> {
        self.job.payload.as_ref()
    }
}

/// Result of job execution.
#[derive(Debug)]
pub enum JobResult {
    /// Job completed successfully with optional result data.
    Success(Option<JsonValue>),
    /// Job failed with an error message. The worker decides retry vs
    /// terminal failure from the job's remaining attempts.
    Failed(String),
    /// Job hit a transient condition and asks to be retried. Routed through
    /// the same attempts bookkeeping as `Failed`.
    Retry(String),
}

/// Trait for job handlers.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The job type this handler processes.
    fn job_type(&self) -> JobType;

    /// Execute the job.
    async fn execute(&self, ctx: JobContext) -> JobResult;
}

/// No-op handler for testing.
pub struct NoOpHandler {
    job_type: JobType,
}

impl NoOpHandler {
    /// Create a new no-op handler for the given job type.
    pub fn new(job_type: JobType) -> Self {
        Self { job_type }
    }
}

#[async_trait]
impl JobHandler for NoOpHandler {
    fn job_type(&self) -> JobType {
        self.job_type
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        ctx.report_progress(1, 2, Some("Processing..."));
        ctx.report_progress(2, 2, Some("Done"));
        JobResult::Success(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use docket_core::JobStatus;

    fn sample_job(job_type: JobType) -> Job {
        Job {
            id: Uuid::new_v4(),
            document_id: None,
            user_id: None,
            job_type,
            status: JobStatus::Processing,
            priority: 5,
            queue_name: "ingest".to_string(),
            worker_id: Some("worker-a".to_string()),
            attempts: 1,
            max_attempts: 3,
            next_retry_at: None,
            retry_delay_seconds: 1,
            payload: None,
            progress_current: 0,
            progress_total: 0,
            progress_percentage: 0.0,
            progress_message: None,
            queued_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: None,
            failed_at: None,
            result_data: None,
            error_message: None,
            error_stack: None,
            error_code: None,
            depends_on: Vec::new(),
            triggers: None,
        }
    }

    #[test]
    fn test_cancellation_flag_starts_clear() {
        let flag = CancellationFlag::new();
        assert!(!flag.is_cancelled());
        flag.cancel();
        assert!(flag.is_cancelled());
    }

    #[test]
    fn test_cancellation_flag_shared_between_clones() {
        let flag = CancellationFlag::new();
        let clone = flag.clone();
        clone.cancel();
        assert!(flag.is_cancelled());
    }

    #[test]
    fn test_job_context_document_id() {
        let mut job = sample_job(JobType::ParsePdf);
        let doc = Uuid::new_v4();
        job.document_id = Some(doc);

        let ctx = JobContext::new(job, CancellationFlag::new());
        assert_eq!(ctx.document_id(), Some(doc));
    }

    #[test]
    fn test_job_context_payload() {
        let mut job = sample_job(JobType::ChunkDocument);
        job.payload = Some(serde_json::json!({"path": "/tmp/doc.pdf", "pages": 10}));

        let ctx = JobContext::new(job, CancellationFlag::new());
        assert_eq!(ctx.payload().unwrap()["pages"], 10);
    }

    #[test]
    fn test_report_progress_without_callback_does_not_panic() {
        let ctx = JobContext::new(sample_job(JobType::ParseText), CancellationFlag::new());
        ctx.report_progress(1, 10, Some("step"));
        ctx.report_progress(10, 10, None);
    }

    #[test]
    fn test_report_progress_reaches_callback() {
        use std::sync::Mutex;

        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = log.clone();
        let ctx = JobContext::new(sample_job(JobType::EmbedChunks), CancellationFlag::new())
            .with_progress_callback(move |current, total, message| {
                log_clone
                    .lock()
                    .unwrap()
                    .push((current, total, message.map(String::from)));
            });

        ctx.report_progress(30, 120, Some("embedding"));
        ctx.report_progress(120, 120, None);

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0], (30, 120, Some("embedding".to_string())));
        assert_eq!(log[1], (120, 120, None));
    }

    #[test]
    fn test_context_observes_worker_cancellation() {
        let flag = CancellationFlag::new();
        let ctx = JobContext::new(sample_job(JobType::ParseText), flag.clone());
        assert!(!ctx.is_cancelled());
        flag.cancel();
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_noop_handler() {
        let handler = NoOpHandler::new(JobType::EmbedChunks);
        assert_eq!(handler.job_type(), JobType::EmbedChunks);

        let ctx = JobContext::new(sample_job(JobType::EmbedChunks), CancellationFlag::new());
        let result = handler.execute(ctx).await;
        assert!(matches!(result, JobResult::Success(None)));
    }
}
