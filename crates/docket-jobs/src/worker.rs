//! Polling worker: claims jobs from one queue and runs them concurrently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use docket_core::{defaults, Error, Job, JobStore, JobType, Result, WorkerHealth, WorkerState};

use crate::handler::{CancellationFlag, JobContext, JobHandler, JobResult};
use crate::retry::next_retry_at;

/// Configuration for one worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Unique worker name; doubles as the `worker_id` written to claimed rows.
    pub name: String,
    /// Queue this worker claims from.
    pub queue: String,
    /// Maximum number of jobs processed in parallel.
    pub concurrency: usize,
    /// Polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Hard wall-clock deadline per job attempt, in seconds.
    pub timeout_secs: u64,
    /// Whether this worker should be constructed at all.
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "worker-1".to_string(),
            queue: defaults::QUEUE_INGEST.to_string(),
            concurrency: defaults::JOB_CONCURRENCY,
            poll_interval_ms: defaults::JOB_POLL_INTERVAL_MS,
            timeout_secs: defaults::JOB_TIMEOUT_SECS,
            enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Create a config for `name` polling `queue`, with defaults elsewhere.
    pub fn new(name: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue: queue.into(),
            ..Self::default()
        }
    }

    /// Set maximum concurrent jobs.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the polling interval in milliseconds.
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set the per-job timeout in seconds.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Enable or disable this worker.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Check every field against the sane-bounds ranges.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("worker name must not be empty".into()));
        }
        if self.queue.trim().is_empty() {
            return Err(Error::Config(format!(
                "worker '{}': queue must not be empty",
                self.name
            )));
        }
        if !defaults::CONCURRENCY_RANGE.contains(&self.concurrency) {
            return Err(Error::Config(format!(
                "worker '{}': concurrency {} outside {:?}",
                self.name,
                self.concurrency,
                defaults::CONCURRENCY_RANGE
            )));
        }
        if !defaults::POLL_INTERVAL_RANGE_MS.contains(&self.poll_interval_ms) {
            return Err(Error::Config(format!(
                "worker '{}': poll interval {}ms outside {:?}",
                self.name,
                self.poll_interval_ms,
                defaults::POLL_INTERVAL_RANGE_MS
            )));
        }
        if !defaults::TIMEOUT_RANGE_SECS.contains(&self.timeout_secs) {
            return Err(Error::Config(format!(
                "worker '{}': timeout {}s outside {:?}",
                self.name,
                self.timeout_secs,
                defaults::TIMEOUT_RANGE_SECS
            )));
        }
        Ok(())
    }
}

/// Event emitted by a worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// Worker entered its poll loop.
    WorkerStarted { worker: String },
    /// Worker left its poll loop.
    WorkerStopped { worker: String },
    /// A poll or claim against the store failed.
    WorkerError { worker: String, error: String },
    /// A claimed job was handed to its handler.
    JobStarted {
        worker: String,
        job_id: Uuid,
        job_type: JobType,
    },
    /// Handler-reported progress.
    JobProgress {
        job_id: Uuid,
        current: i32,
        total: i32,
        message: Option<String>,
    },
    /// A job completed successfully.
    JobCompleted {
        job_id: Uuid,
        job_type: JobType,
        duration_ms: u64,
    },
    /// A job failed with attempts remaining and was scheduled for retry.
    JobRetried {
        job_id: Uuid,
        job_type: JobType,
        attempt: i32,
        error: String,
    },
    /// A job failed terminally.
    JobFailed {
        job_id: Uuid,
        job_type: JobType,
        error: String,
    },
}

/// Cumulative per-worker counters.
#[derive(Debug, Default)]
struct WorkerStats {
    active: AtomicUsize,
    claimed: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    poll_errors: AtomicU64,
}

impl WorkerStats {
    fn error_rate(&self) -> f64 {
        let completed = self.completed.load(Ordering::SeqCst);
        let failed = self.failed.load(Ordering::SeqCst);
        let finished = completed + failed;
        if finished == 0 {
            0.0
        } else {
            failed as f64 / finished as f64
        }
    }
}

/// How a single job attempt ended before retry bookkeeping.
enum AttemptOutcome {
    Handler(JobResult),
    TimedOut,
}

/// A named worker bound to one queue.
///
/// Runs a timer-driven poll loop while `Running`; every claimed job is
/// processed on its own task, bounded by `concurrency`. Workers share no
/// in-memory state with each other — the job store is the only coordination
/// point.
pub struct Worker {
    config: WorkerConfig,
    store: Arc<dyn JobStore>,
    handlers: Arc<HashMap<JobType, Arc<dyn JobHandler>>>,
    event_tx: broadcast::Sender<WorkerEvent>,
    state: RwLock<WorkerState>,
    stats: WorkerStats,
    inflight: Mutex<HashMap<Uuid, CancellationFlag>>,
    shutdown: Notify,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    /// Create a new worker. `event_tx` is shared across workers so a single
    /// subscriber observes the whole pool.
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn JobStore>,
        handlers: HashMap<JobType, Arc<dyn JobHandler>>,
        event_tx: broadcast::Sender<WorkerEvent>,
    ) -> Self {
        Self {
            config,
            store,
            handlers: Arc::new(handlers),
            event_tx,
            state: RwLock::new(WorkerState::Stopped),
            stats: WorkerStats::default(),
            inflight: Mutex::new(HashMap::new()),
            shutdown: Notify::new(),
            join: Mutex::new(None),
        }
    }

    /// The worker's unique name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The queue this worker polls.
    pub fn queue(&self) -> &str {
        &self.config.queue
    }

    /// The worker's configuration.
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    /// Subscribe to this worker's event stream.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Point-in-time health counters.
    pub async fn health(&self) -> WorkerHealth {
        WorkerHealth {
            name: self.config.name.clone(),
            queue: self.config.queue.clone(),
            state: *self.state.read().await,
            active_jobs: self.stats.active.load(Ordering::SeqCst),
            claimed_total: self.stats.claimed.load(Ordering::SeqCst),
            completed_total: self.stats.completed.load(Ordering::SeqCst),
            failed_total: self.stats.failed.load(Ordering::SeqCst),
            retried_total: self.stats.retried.load(Ordering::SeqCst),
            poll_errors: self.stats.poll_errors.load(Ordering::SeqCst),
            error_rate: self.stats.error_rate(),
        }
    }

    /// Validate configuration and enter the poll loop.
    ///
    /// A validation failure leaves the worker in `Error` state — terminal
    /// until the worker is reconstructed.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if let Err(e) = self.config.validate() {
            *self.state.write().await = WorkerState::Error;
            return Err(e);
        }

        {
            let mut state = self.state.write().await;
            if *state != WorkerState::Stopped {
                return Err(Error::Job(format!(
                    "worker '{}' cannot start from state {:?}",
                    self.config.name, *state
                )));
            }
            *state = WorkerState::Running;
        }

        let worker = Arc::clone(self);
        let handle = tokio::spawn(async move {
            worker.run().await;
        });
        *self.join.lock().await = Some(handle);
        Ok(())
    }

    /// Stop claiming, drain in-flight jobs for up to `grace`, then cancel
    /// whatever is left.
    ///
    /// Abandoned jobs keep their PROCESSING rows; the next stale sweep
    /// recovers them.
    pub async fn stop(&self, grace: Duration) {
        {
            let mut state = self.state.write().await;
            if *state != WorkerState::Running {
                return;
            }
            *state = WorkerState::Stopping;
        }
        self.shutdown.notify_waiters();

        info!(
            subsystem = "jobs",
            component = "worker",
            worker = %self.config.name,
            op = "drain",
            grace_secs = grace.as_secs(),
            "Draining worker"
        );

        let deadline = Instant::now() + grace;
        while self.stats.active.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let abandoned = {
            let inflight = self.inflight.lock().await;
            for flag in inflight.values() {
                flag.cancel();
            }
            inflight.len()
        };
        if abandoned > 0 {
            warn!(
                subsystem = "jobs",
                component = "worker",
                worker = %self.config.name,
                abandoned,
                "Grace period expired; in-flight jobs cancelled, rows await stale recovery"
            );
        }

        if let Some(handle) = self.join.lock().await.take() {
            let _ = handle.await;
        }
        *self.state.write().await = WorkerState::Stopped;
    }

    /// The poll loop. Claims whenever capacity is free; the next poll always
    /// happens one interval later whether or not jobs were claimed.
    async fn run(self: Arc<Self>) {
        info!(
            subsystem = "jobs",
            component = "worker",
            worker = %self.config.name,
            queue = %self.config.queue,
            concurrency = self.config.concurrency,
            poll_interval_ms = self.config.poll_interval_ms,
            "Worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted {
            worker: self.config.name.clone(),
        });

        let mut poll = interval(Duration::from_millis(self.config.poll_interval_ms));
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = poll.tick() => {}
                _ = self.shutdown.notified() => break,
            }
            if *self.state.read().await != WorkerState::Running {
                break;
            }

            let active = self.stats.active.load(Ordering::SeqCst);
            if active >= self.config.concurrency {
                continue;
            }
            let capacity = self.config.concurrency - active;

            match self
                .store
                .claim_batch(&self.config.queue, capacity, &self.config.name)
                .await
            {
                Ok(jobs) => {
                    if !jobs.is_empty() {
                        debug!(
                            subsystem = "jobs",
                            component = "worker",
                            worker = %self.config.name,
                            claimed = jobs.len(),
                            active,
                            "Claimed job batch"
                        );
                    }
                    for job in jobs {
                        self.stats.claimed.fetch_add(1, Ordering::SeqCst);
                        self.spawn_job(job).await;
                    }
                }
                Err(e) => {
                    // Store unavailable: throughput degrades, the worker
                    // survives to the next tick.
                    self.stats.poll_errors.fetch_add(1, Ordering::SeqCst);
                    error!(
                        subsystem = "jobs",
                        component = "worker",
                        worker = %self.config.name,
                        error = %e,
                        "Failed to claim jobs"
                    );
                    let _ = self.event_tx.send(WorkerEvent::WorkerError {
                        worker: self.config.name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped {
            worker: self.config.name.clone(),
        });
        info!(
            subsystem = "jobs",
            component = "worker",
            worker = %self.config.name,
            "Worker stopped"
        );
    }

    /// Track a claimed job and process it on its own task.
    async fn spawn_job(self: &Arc<Self>, job: Job) {
        let cancel = CancellationFlag::new();
        self.inflight.lock().await.insert(job.id, cancel.clone());
        self.stats.active.fetch_add(1, Ordering::SeqCst);

        let worker = Arc::clone(self);
        tokio::spawn(async move {
            worker.execute_job(job, cancel).await;
        });
    }

    /// Execute one claimed job: race the handler against the deadline, then
    /// write the outcome back.
    async fn execute_job(self: Arc<Self>, job: Job, cancel: CancellationFlag) {
        let start = Instant::now();
        let job_id = job.id;
        let job_type = job.job_type;

        info!(
            subsystem = "jobs",
            component = "worker",
            worker = %self.config.name,
            job_id = %job_id,
            job_type = ?job_type,
            attempt = job.attempts,
            "Processing job"
        );
        let _ = self.event_tx.send(WorkerEvent::JobStarted {
            worker: self.config.name.clone(),
            job_id,
            job_type,
        });

        let handler = self.handlers.get(&job_type).cloned();
        let outcome = match handler {
            Some(handler) => {
                let store = self.store.clone();
                let event_tx = self.event_tx.clone();
                let ctx = JobContext::new(job.clone(), cancel.clone())
                    .with_progress_callback(move |current, total, message| {
                        let message = message.map(String::from);
                        let _ = event_tx.send(WorkerEvent::JobProgress {
                            job_id,
                            current,
                            total,
                            message: message.clone(),
                        });
                        let store = store.clone();
                        tokio::spawn(async move {
                            if let Err(e) = store
                                .update_progress(job_id, current, total, message.as_deref())
                                .await
                            {
                                warn!(
                                    subsystem = "jobs",
                                    component = "worker",
                                    job_id = %job_id,
                                    error = %e,
                                    "Failed to persist job progress"
                                );
                            }
                        });
                    });

                let deadline = Duration::from_secs(self.config.timeout_secs);
                match timeout(deadline, handler.execute(ctx)).await {
                    Ok(result) => AttemptOutcome::Handler(result),
                    Err(_) => {
                        // Deadline passed. Signal the handler; it may keep
                        // running detached if it never checks the flag.
                        cancel.cancel();
                        warn!(
                            subsystem = "jobs",
                            component = "worker",
                            worker = %self.config.name,
                            job_id = %job_id,
                            job_type = ?job_type,
                            timeout_secs = self.config.timeout_secs,
                            "Job exceeded its deadline"
                        );
                        AttemptOutcome::TimedOut
                    }
                }
            }
            None => {
                warn!(
                    subsystem = "jobs",
                    component = "worker",
                    job_type = ?job_type,
                    "No handler registered for job type"
                );
                AttemptOutcome::Handler(JobResult::Failed(format!(
                    "No handler for job type: {job_type:?}"
                )))
            }
        };

        match outcome {
            AttemptOutcome::Handler(JobResult::Success(result_data)) => {
                if let Err(e) = self.store.mark_completed(job_id, result_data).await {
                    error!(
                        subsystem = "jobs",
                        component = "worker",
                        job_id = %job_id,
                        error = %e,
                        "Failed to mark job as completed"
                    );
                } else {
                    self.stats.completed.fetch_add(1, Ordering::SeqCst);
                    let duration_ms = start.elapsed().as_millis() as u64;
                    info!(
                        subsystem = "jobs",
                        component = "worker",
                        job_id = %job_id,
                        job_type = ?job_type,
                        duration_ms,
                        "Job completed"
                    );
                    let _ = self.event_tx.send(WorkerEvent::JobCompleted {
                        job_id,
                        job_type,
                        duration_ms,
                    });
                }
            }
            AttemptOutcome::Handler(JobResult::Failed(error))
            | AttemptOutcome::Handler(JobResult::Retry(error)) => {
                self.finish_failed(&job, error, "handler_error").await;
            }
            AttemptOutcome::TimedOut => {
                let error = format!("Job exceeded timeout of {}s", self.config.timeout_secs);
                self.finish_failed(&job, error, "timeout").await;
            }
        }

        self.inflight.lock().await.remove(&job_id);
        self.stats.active.fetch_sub(1, Ordering::SeqCst);
    }

    /// Route a failed attempt into RETRY or terminal FAILED per the job's
    /// remaining attempts.
    async fn finish_failed(&self, job: &Job, error: String, code: &str) {
        if job.has_attempts_remaining() {
            let at = next_retry_at(job);
            if let Err(e) = self.store.mark_retry(job.id, &error, at).await {
                error!(
                    subsystem = "jobs",
                    component = "worker",
                    job_id = %job.id,
                    error = %e,
                    "Failed to mark job for retry"
                );
            } else {
                self.stats.retried.fetch_add(1, Ordering::SeqCst);
                warn!(
                    subsystem = "jobs",
                    component = "worker",
                    job_id = %job.id,
                    job_type = ?job.job_type,
                    attempt = job.attempts,
                    next_retry_at = %at,
                    error = %error,
                    "Job failed, scheduled for retry"
                );
                let _ = self.event_tx.send(WorkerEvent::JobRetried {
                    job_id: job.id,
                    job_type: job.job_type,
                    attempt: job.attempts,
                    error,
                });
            }
        } else if let Err(e) = self
            .store
            .mark_failed(job.id, &error, Some(code), None)
            .await
        {
            error!(
                subsystem = "jobs",
                component = "worker",
                job_id = %job.id,
                error = %e,
                "Failed to mark job as failed"
            );
        } else {
            self.stats.failed.fetch_add(1, Ordering::SeqCst);
            warn!(
                subsystem = "jobs",
                component = "worker",
                job_id = %job.id,
                job_type = ?job.job_type,
                attempt = job.attempts,
                error = %error,
                "Job failed terminally"
            );
            let _ = self.event_tx.send(WorkerEvent::JobFailed {
                job_id: job.id,
                job_type: job.job_type,
                error,
            });
        }
    }
}
