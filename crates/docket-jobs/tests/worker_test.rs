//! Behavior tests for the worker runtime against an in-memory store.
//!
//! This suite validates:
//! - Worker-001: claimed jobs run through their handler and complete
//! - Worker-002: claim order follows priority (lower first)
//! - Worker-003: concurrency bounds how many jobs are claimed at once
//! - Worker-004: handler errors transition to RETRY while attempts remain
//! - Worker-005: exhausted attempts transition to FAILED, not RETRY
//! - Worker-006: a handler that never returns is timed out and retried
//! - Worker-007: missing handlers fail the job instead of wedging the worker
//! - Worker-008: stop() drains and cancels cooperatively
//! - Worker-009: store poll errors degrade throughput, not the worker
//!
//! The in-memory store reproduces the claim contract (eligibility, ordering,
//! attempts increment) so these tests stay hermetic; the SQL claim itself is
//! covered by the docket-db integration suite.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;
use tokio::time::sleep;
use uuid::Uuid;

use docket_core::{
    Error, Job, JobStatus, JobStore, JobType, NewJob, QueueStats, Result, WorkerState,
};
use docket_jobs::{
    JobContext, JobHandler, JobResult, Worker, WorkerConfig, WorkerEvent,
};

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

#[derive(Default)]
struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
    fail_claims: AtomicBool,
}

impl MemoryJobStore {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn get_sync(&self, id: Uuid) -> Option<Job> {
        self.jobs.lock().unwrap().get(&id).cloned()
    }

    fn count_with_status(&self, status: JobStatus) -> usize {
        self.jobs
            .lock()
            .unwrap()
            .values()
            .filter(|j| j.status == status)
            .count()
    }

    /// Make every subsequent claim fail, simulating a store outage.
    fn set_fail_claims(&self, fail: bool) {
        self.fail_claims.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn enqueue(&self, req: NewJob) -> Result<Uuid> {
        let id = Uuid::now_v7();
        let job = Job {
            id,
            document_id: req.document_id,
            user_id: req.user_id,
            job_type: req.job_type,
            status: JobStatus::Queued,
            priority: req.priority,
            queue_name: req.queue_name,
            worker_id: None,
            attempts: 0,
            max_attempts: req.max_attempts,
            next_retry_at: None,
            retry_delay_seconds: req.retry_delay_seconds,
            payload: req.payload,
            progress_current: 0,
            progress_total: 0,
            progress_percentage: 0.0,
            progress_message: None,
            queued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            failed_at: None,
            result_data: None,
            error_message: None,
            error_stack: None,
            error_code: None,
            depends_on: req.depends_on,
            triggers: req.triggers,
        };
        self.jobs.lock().unwrap().insert(id, job);
        Ok(id)
    }

    async fn claim_batch(
        &self,
        queue: &str,
        capacity: usize,
        worker_id: &str,
    ) -> Result<Vec<Job>> {
        if self.fail_claims.load(Ordering::SeqCst) {
            return Err(Error::Internal("store unavailable".into()));
        }

        let now = Utc::now();
        let mut jobs = self.jobs.lock().unwrap();

        let mut eligible: Vec<Uuid> = jobs
            .values()
            .filter(|j| {
                j.queue_name == queue
                    && j.attempts < j.max_attempts
                    && (j.status == JobStatus::Queued
                        || (j.status == JobStatus::Retry
                            && j.next_retry_at.map(|t| t <= now).unwrap_or(false)))
            })
            .map(|j| j.id)
            .collect();
        eligible.sort_by_key(|id| {
            let j = &jobs[id];
            (j.priority, j.queued_at)
        });
        eligible.truncate(capacity);

        let mut claimed = Vec::new();
        for id in eligible {
            let job = jobs.get_mut(&id).unwrap();
            job.status = JobStatus::Processing;
            job.worker_id = Some(worker_id.to_string());
            job.started_at = Some(now);
            job.attempts += 1;
            job.next_retry_at = None;
            claimed.push(job.clone());
        }
        Ok(claimed)
    }

    async fn mark_completed(&self, job_id: Uuid, result: Option<JsonValue>) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(&job_id) {
            if job.status == JobStatus::Processing {
                job.status = JobStatus::Completed;
                job.completed_at = Some(Utc::now());
                job.result_data = result;
                job.progress_percentage = 100.0;
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
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(&job_id) {
            if job.status == JobStatus::Processing {
                job.status = JobStatus::Failed;
                job.failed_at = Some(Utc::now());
                job.error_message = Some(error.to_string());
                job.error_code = error_code.map(String::from);
                job.error_stack = error_stack.map(String::from);
            }
        }
        Ok(())
    }

    async fn mark_retry(
        &self,
        job_id: Uuid,
        error: &str,
        next_retry_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(&job_id) {
            if job.status == JobStatus::Processing {
                job.status = JobStatus::Retry;
                job.next_retry_at = Some(next_retry_at);
                job.error_message = Some(error.to_string());
                job.worker_id = None;
                job.started_at = None;
            }
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
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(&job_id) {
            job.progress_current = current;
            job.progress_total = total;
            job.progress_percentage = if total > 0 {
                ((current as f64 / total as f64) * 10000.0).round() / 100.0
            } else {
                0.0
            };
            job.progress_message = message.map(String::from);
        }
        Ok(())
    }

    async fn cancel(&self, job_id: Uuid) -> Result<bool> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(&job_id) {
            if matches!(job.status, JobStatus::Queued | JobStatus::Retry) {
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(Utc::now());
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn reset_stale(&self, older_than: Duration) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::seconds(older_than.as_secs() as i64);
        let mut jobs = self.jobs.lock().unwrap();
        let mut touched = 0;
        for job in jobs.values_mut() {
            if job.status == JobStatus::Processing
                && job.started_at.map(|t| t < cutoff).unwrap_or(false)
            {
                if job.attempts < job.max_attempts {
                    job.status = JobStatus::Queued;
                    job.worker_id = None;
                    job.started_at = None;
                } else {
                    job.status = JobStatus::Failed;
                    job.failed_at = Some(Utc::now());
                }
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn purge_old(
        &self,
        _completed_retention: Duration,
        _failed_retention: Duration,
    ) -> Result<u64> {
        Ok(0)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        Ok(self.get_sync(job_id))
    }

    async fn pending_count(&self, queue: &str) -> Result<i64> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|j| j.queue_name == queue && j.status == JobStatus::Queued)
            .count() as i64)
    }

    async fn queue_stats(&self) -> Result<Vec<QueueStats>> {
        Ok(Vec::new())
    }

    async fn list_recent(&self, _limit: i64) -> Result<Vec<Job>> {
        Ok(Vec::new())
    }
}

// ============================================================================
// TEST HANDLERS
// ============================================================================

/// Handler that records execution order and optionally fails or sleeps.
struct ScriptedHandler {
    job_type: JobType,
    executions: Arc<Mutex<Vec<Uuid>>>,
    fail: bool,
    sleep: Option<Duration>,
}

impl ScriptedHandler {
    fn succeeding(job_type: JobType) -> (Self, Arc<Mutex<Vec<Uuid>>>) {
        Self::build(job_type, false, None)
    }

    fn failing(job_type: JobType) -> (Self, Arc<Mutex<Vec<Uuid>>>) {
        Self::build(job_type, true, None)
    }

    fn slow(job_type: JobType, sleep: Duration) -> (Self, Arc<Mutex<Vec<Uuid>>>) {
        Self::build(job_type, false, Some(sleep))
    }

    fn build(
        job_type: JobType,
        fail: bool,
        sleep: Option<Duration>,
    ) -> (Self, Arc<Mutex<Vec<Uuid>>>) {
        let executions = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                job_type,
                executions: executions.clone(),
                fail,
                sleep,
            },
            executions,
        )
    }
}

#[async_trait]
impl JobHandler for ScriptedHandler {
    fn job_type(&self) -> JobType {
        self.job_type
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        self.executions.lock().unwrap().push(ctx.job.id);
        if let Some(d) = self.sleep {
            sleep(d).await;
        }
        if self.fail {
            JobResult::Failed("scripted failure".to_string())
        } else {
            JobResult::Success(Some(serde_json::json!({"ok": true})))
        }
    }
}

/// Handler that loops until the worker cancels it.
struct CancellationAwareHandler {
    job_type: JobType,
    observed_cancel: Arc<Mutex<bool>>,
}

#[async_trait]
impl JobHandler for CancellationAwareHandler {
    fn job_type(&self) -> JobType {
        self.job_type
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        for _ in 0..200 {
            if ctx.is_cancelled() {
                *self.observed_cancel.lock().unwrap() = true;
                return JobResult::Failed("cancelled".to_string());
            }
            sleep(Duration::from_millis(25)).await;
        }
        JobResult::Success(None)
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn fast_config(name: &str, queue: &str) -> WorkerConfig {
    WorkerConfig::new(name, queue)
        .with_poll_interval(50)
        .with_timeout(1)
}

fn make_worker(
    config: WorkerConfig,
    store: Arc<MemoryJobStore>,
    handlers: Vec<Box<dyn JobHandler>>,
) -> (Arc<Worker>, broadcast::Receiver<WorkerEvent>) {
    let (event_tx, event_rx) = broadcast::channel(64);
    let mut map: HashMap<JobType, Arc<dyn JobHandler>> = HashMap::new();
    for handler in handlers {
        map.insert(handler.job_type(), Arc::from(handler));
    }
    let worker = Arc::new(Worker::new(config, store, map, event_tx));
    (worker, event_rx)
}

async fn wait_for_status(
    store: &MemoryJobStore,
    job_id: Uuid,
    expected: JobStatus,
    timeout: Duration,
) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if let Some(job) = store.get_sync(job_id) {
            if job.status == expected {
                return true;
            }
        }
        sleep(Duration::from_millis(20)).await;
    }
    false
}

// ============================================================================
// TESTS
// ============================================================================

#[tokio::test]
async fn test_worker_processes_job_to_completion() {
    let store = MemoryJobStore::new();
    let (handler, executions) = ScriptedHandler::succeeding(JobType::ParseText);
    let (worker, _rx) = make_worker(
        fast_config("w1", "ingest"),
        store.clone(),
        vec![Box::new(handler)],
    );

    let job_id = store
        .enqueue(NewJob::new(JobType::ParseText))
        .await
        .unwrap();

    worker.start().await.unwrap();
    assert!(wait_for_status(&store, job_id, JobStatus::Completed, Duration::from_secs(3)).await);
    worker.stop(Duration::from_secs(1)).await;

    let job = store.get_sync(job_id).unwrap();
    assert_eq!(job.attempts, 1);
    assert!(job.result_data.is_some());
    assert!(job.completed_at.is_some());
    assert_eq!(executions.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_worker_serves_lower_priority_first() {
    let store = MemoryJobStore::new();
    let (handler, executions) = ScriptedHandler::succeeding(JobType::ParseText);
    let config = fast_config("w1", "ingest").with_concurrency(1);
    let (worker, _rx) = make_worker(config, store.clone(), vec![Box::new(handler)]);

    let mut ids = Vec::new();
    for priority in [5, 1, 3] {
        ids.push(
            store
                .enqueue(NewJob::new(JobType::ParseText).with_priority(priority))
                .await
                .unwrap(),
        );
    }

    worker.start().await.unwrap();
    for id in &ids {
        assert!(wait_for_status(&store, *id, JobStatus::Completed, Duration::from_secs(3)).await);
    }
    worker.stop(Duration::from_secs(1)).await;

    let order = executions.lock().unwrap().clone();
    assert_eq!(order[0], ids[1], "priority 1 runs first");
    assert_eq!(order[1], ids[2], "priority 3 runs second");
    assert_eq!(order[2], ids[0], "priority 5 runs last");
}

#[tokio::test]
async fn test_concurrency_bounds_claims() {
    let store = MemoryJobStore::new();
    let (handler, _) = ScriptedHandler::slow(JobType::ParseText, Duration::from_secs(5));
    let config = fast_config("w1", "ingest")
        .with_concurrency(2)
        .with_timeout(10);
    let (worker, _rx) = make_worker(config, store.clone(), vec![Box::new(handler)]);

    for _ in 0..5 {
        store.enqueue(NewJob::new(JobType::ParseText)).await.unwrap();
    }

    worker.start().await.unwrap();
    sleep(Duration::from_millis(400)).await;

    assert_eq!(store.count_with_status(JobStatus::Processing), 2);
    assert_eq!(store.count_with_status(JobStatus::Queued), 3);

    let health = worker.health().await;
    assert_eq!(health.active_jobs, 2);
    assert_eq!(health.claimed_total, 2);

    worker.stop(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_handler_failure_schedules_retry_with_backoff() {
    let store = MemoryJobStore::new();
    let (handler, _) = ScriptedHandler::failing(JobType::ParseText);
    let (worker, _rx) = make_worker(
        fast_config("w1", "ingest"),
        store.clone(),
        vec![Box::new(handler)],
    );

    let job_id = store
        .enqueue(NewJob::new(JobType::ParseText).with_max_attempts(3))
        .await
        .unwrap();

    let before = Utc::now();
    worker.start().await.unwrap();
    assert!(wait_for_status(&store, job_id, JobStatus::Retry, Duration::from_secs(3)).await);
    worker.stop(Duration::from_secs(1)).await;

    let job = store.get_sync(job_id).unwrap();
    assert_eq!(job.attempts, 1);
    assert!(job.worker_id.is_none());
    assert_eq!(job.error_message.as_deref(), Some("scripted failure"));

    // backoff(1) with defaults: 3000 + 2000 + jitter(0..1000) ms out.
    let at = job.next_retry_at.expect("retry must be scheduled");
    assert!(at > before + chrono::Duration::milliseconds(4800));
    assert!(at < before + chrono::Duration::milliseconds(9000));
}

#[tokio::test]
async fn test_exhausted_attempts_fail_terminally() {
    let store = MemoryJobStore::new();
    let (handler, executions) = ScriptedHandler::failing(JobType::ParseText);
    let (worker, _rx) = make_worker(
        fast_config("w1", "ingest"),
        store.clone(),
        vec![Box::new(handler)],
    );

    let job_id = store
        .enqueue(NewJob::new(JobType::ParseText).with_max_attempts(1))
        .await
        .unwrap();

    worker.start().await.unwrap();
    assert!(wait_for_status(&store, job_id, JobStatus::Failed, Duration::from_secs(3)).await);
    worker.stop(Duration::from_secs(1)).await;

    let job = store.get_sync(job_id).unwrap();
    assert_eq!(job.attempts, job.max_attempts);
    assert!(job.failed_at.is_some());
    assert_eq!(job.error_code.as_deref(), Some("handler_error"));
    assert_eq!(executions.lock().unwrap().len(), 1);

    // Attempts exhausted: the worker never claims it again.
    sleep(Duration::from_millis(200)).await;
    assert_eq!(store.get_sync(job_id).unwrap().status, JobStatus::Failed);
}

#[tokio::test]
async fn test_timeout_marks_job_for_retry() {
    let store = MemoryJobStore::new();
    // Sleeps far past the 1s deadline.
    let (handler, _) = ScriptedHandler::slow(JobType::ParseText, Duration::from_secs(30));
    let (worker, _rx) = make_worker(
        fast_config("w1", "ingest"),
        store.clone(),
        vec![Box::new(handler)],
    );

    let job_id = store
        .enqueue(NewJob::new(JobType::ParseText).with_max_attempts(3))
        .await
        .unwrap();

    worker.start().await.unwrap();
    // Deadline is 1s; the row must leave PROCESSING within timeout + ε.
    assert!(wait_for_status(&store, job_id, JobStatus::Retry, Duration::from_secs(3)).await);
    worker.stop(Duration::from_millis(100)).await;

    let job = store.get_sync(job_id).unwrap();
    assert!(job
        .error_message
        .as_deref()
        .unwrap()
        .contains("exceeded timeout"));
}

#[tokio::test]
async fn test_missing_handler_fails_job() {
    let store = MemoryJobStore::new();
    // Only a ParseText handler; we enqueue an EmbedChunks job.
    let (handler, _) = ScriptedHandler::succeeding(JobType::ParseText);
    let (worker, _rx) = make_worker(
        fast_config("w1", "ingest"),
        store.clone(),
        vec![Box::new(handler)],
    );

    let job_id = store
        .enqueue(NewJob::new(JobType::EmbedChunks).with_queue("ingest").with_max_attempts(1))
        .await
        .unwrap();

    worker.start().await.unwrap();
    assert!(wait_for_status(&store, job_id, JobStatus::Failed, Duration::from_secs(3)).await);
    worker.stop(Duration::from_secs(1)).await;

    let job = store.get_sync(job_id).unwrap();
    assert!(job.error_message.unwrap().contains("No handler"));
}

#[tokio::test]
async fn test_stop_cancels_inflight_cooperatively() {
    let store = MemoryJobStore::new();
    let observed = Arc::new(Mutex::new(false));
    let handler = CancellationAwareHandler {
        job_type: JobType::ParseText,
        observed_cancel: observed.clone(),
    };
    let config = fast_config("w1", "ingest").with_timeout(30);
    let (worker, _rx) = make_worker(config, store.clone(), vec![Box::new(handler)]);

    let job_id = store
        .enqueue(NewJob::new(JobType::ParseText))
        .await
        .unwrap();

    worker.start().await.unwrap();
    assert!(wait_for_status(&store, job_id, JobStatus::Processing, Duration::from_secs(3)).await);

    // Grace shorter than the handler's runtime: stop must set the flag.
    worker.stop(Duration::from_millis(100)).await;
    assert_eq!(worker.state().await, WorkerState::Stopped);

    // Handler notices the flag at its next safe point.
    sleep(Duration::from_millis(200)).await;
    assert!(*observed.lock().unwrap(), "handler must observe cancellation");
}

#[tokio::test]
async fn test_poll_errors_do_not_kill_worker() {
    let store = MemoryJobStore::new();
    store.set_fail_claims(true);

    let (handler, _) = ScriptedHandler::succeeding(JobType::ParseText);
    let (worker, _rx) = make_worker(
        fast_config("w1", "ingest"),
        store.clone(),
        vec![Box::new(handler)],
    );

    worker.start().await.unwrap();
    sleep(Duration::from_millis(300)).await;

    // Several polls failed, but the worker is still running.
    assert_eq!(worker.state().await, WorkerState::Running);
    assert!(worker.health().await.poll_errors >= 1);

    // Store recovers; the queue drains normally again.
    store.set_fail_claims(false);
    let job_id = store
        .enqueue(NewJob::new(JobType::ParseText))
        .await
        .unwrap();
    assert!(wait_for_status(&store, job_id, JobStatus::Completed, Duration::from_secs(3)).await);

    worker.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_worker_emits_lifecycle_events() {
    let store = MemoryJobStore::new();
    let (handler, _) = ScriptedHandler::succeeding(JobType::ParseText);
    let (worker, mut rx) = make_worker(
        fast_config("w1", "ingest"),
        store.clone(),
        vec![Box::new(handler)],
    );

    let job_id = store
        .enqueue(NewJob::new(JobType::ParseText))
        .await
        .unwrap();

    worker.start().await.unwrap();
    assert!(wait_for_status(&store, job_id, JobStatus::Completed, Duration::from_secs(3)).await);
    worker.stop(Duration::from_secs(1)).await;

    let mut saw_started = false;
    let mut saw_job_started = false;
    let mut saw_job_completed = false;
    let mut saw_stopped = false;
    while let Ok(event) = rx.try_recv() {
        match event {
            WorkerEvent::WorkerStarted { .. } => saw_started = true,
            WorkerEvent::JobStarted { job_id: id, .. } if id == job_id => saw_job_started = true,
            WorkerEvent::JobCompleted { job_id: id, .. } if id == job_id => {
                saw_job_completed = true
            }
            WorkerEvent::WorkerStopped { .. } => saw_stopped = true,
            _ => {}
        }
    }
    assert!(saw_started && saw_job_started && saw_job_completed && saw_stopped);
}

#[tokio::test]
async fn test_start_from_invalid_config_enters_error_state() {
    let store = MemoryJobStore::new();
    let (handler, _) = ScriptedHandler::succeeding(JobType::ParseText);
    let config = WorkerConfig::new("bad", "ingest").with_concurrency(0);
    let (worker, _rx) = make_worker(config, store, vec![Box::new(handler)]);

    assert!(worker.start().await.is_err());
    assert_eq!(worker.state().await, WorkerState::Error);

    // Error state is terminal until reconstruction.
    assert!(worker.start().await.is_err());
}
