//! Worker pool lifecycle, health aggregation, and graceful drain.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use docket_core::{
    defaults, Error, HealthSnapshot, HealthStatus, JobStore, Result, WorkerHealth, WorkerState,
};

use crate::worker::{Worker, WorkerConfig, WorkerEvent};

/// Owns a set of named workers and coordinates their lifecycle.
pub struct WorkerManager {
    store: Arc<dyn JobStore>,
    workers: RwLock<Vec<Arc<Worker>>>,
    event_tx: broadcast::Sender<WorkerEvent>,
    error_rate_threshold: f64,
    health_handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerManager {
    /// Create a manager with its own shared event channel.
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            store,
            workers: RwLock::new(Vec::new()),
            event_tx,
            error_rate_threshold: defaults::WORKER_ERROR_RATE_THRESHOLD,
            health_handle: Mutex::new(None),
        }
    }

    /// Override the error-rate threshold used for health classification.
    pub fn with_error_rate_threshold(mut self, threshold: f64) -> Self {
        self.error_rate_threshold = threshold;
        self
    }

    /// The event sender workers must be constructed with so the manager's
    /// subscribers observe the whole pool.
    pub fn event_sender(&self) -> broadcast::Sender<WorkerEvent> {
        self.event_tx.clone()
    }

    /// Subscribe to the pool-wide event stream.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Register a worker. Duplicate names are rejected.
    pub async fn register(&self, worker: Arc<Worker>) -> Result<()> {
        let mut workers = self.workers.write().await;
        if workers.iter().any(|w| w.name() == worker.name()) {
            return Err(Error::Config(format!(
                "duplicate worker name: '{}'",
                worker.name()
            )));
        }
        info!(
            subsystem = "jobs",
            component = "manager",
            worker = %worker.name(),
            queue = %worker.queue(),
            "Registered worker"
        );
        workers.push(worker);
        Ok(())
    }

    /// Register a batch of workers; duplicates are logged and skipped.
    /// Returns the number actually registered.
    pub async fn register_all(&self, workers: Vec<Arc<Worker>>) -> usize {
        let mut registered = 0;
        for worker in workers {
            match self.register(worker.clone()).await {
                Ok(()) => registered += 1,
                Err(e) => warn!(
                    subsystem = "jobs",
                    component = "manager",
                    worker = %worker.name(),
                    error = %e,
                    "Skipping worker registration"
                ),
            }
        }
        registered
    }

    /// Number of registered workers.
    pub async fn worker_count(&self) -> usize {
        self.workers.read().await.len()
    }

    /// Configurations of every registered worker.
    pub async fn list_configs(&self) -> Vec<WorkerConfig> {
        self.workers
            .read()
            .await
            .iter()
            .map(|w| w.config().clone())
            .collect()
    }

    /// Start every registered worker. A worker whose startup fails is left
    /// in `Error` state and logged; the rest of the pool still starts.
    /// Returns the number of workers now running.
    pub async fn start_all(&self) -> usize {
        let workers = self.workers.read().await.clone();
        let mut started = 0;
        for worker in &workers {
            match worker.start().await {
                Ok(()) => started += 1,
                Err(e) => error!(
                    subsystem = "jobs",
                    component = "manager",
                    worker = %worker.name(),
                    error = %e,
                    "Worker failed to start"
                ),
            }
        }
        info!(
            subsystem = "jobs",
            component = "manager",
            started,
            total = workers.len(),
            "Worker pool started"
        );
        started
    }

    /// Stop every worker: no new claims, then a bounded drain of in-flight
    /// jobs. Rows abandoned past the grace period stay PROCESSING and are
    /// recovered by the next stale sweep, not by the manager.
    pub async fn stop_all(&self, grace: Duration) {
        if let Some(handle) = self.health_handle.lock().await.take() {
            handle.abort();
        }

        let workers = self.workers.read().await.clone();
        info!(
            subsystem = "jobs",
            component = "manager",
            workers = workers.len(),
            grace_secs = grace.as_secs(),
            "Stopping worker pool"
        );
        join_all(workers.iter().map(|w| w.stop(grace))).await;
        info!(
            subsystem = "jobs",
            component = "manager",
            "Worker pool stopped"
        );
    }

    /// Health counters for every registered worker.
    pub async fn worker_health(&self) -> Vec<WorkerHealth> {
        let workers = self.workers.read().await.clone();
        let mut healths = Vec::with_capacity(workers.len());
        for worker in &workers {
            healths.push(worker.health().await);
        }
        healths
    }

    /// Aggregated system snapshot: worker states, per-queue statistics,
    /// and load. Queue statistics degrade to empty when the store is
    /// unreachable — the snapshot itself never fails.
    pub async fn health_snapshot(&self) -> HealthSnapshot {
        let workers = self.worker_health().await;
        let status = classify(&workers, self.error_rate_threshold);

        let queues = match self.store.queue_stats().await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "manager",
                    error = %e,
                    "Queue statistics unavailable for health snapshot"
                );
                Vec::new()
            }
        };

        let capacity: usize = {
            let pool = self.workers.read().await;
            pool.iter().map(|w| w.config().concurrency).sum()
        };
        let active: usize = workers.iter().map(|w| w.active_jobs).sum();
        let system_load = if capacity == 0 {
            0.0
        } else {
            active as f64 / capacity as f64
        };

        HealthSnapshot {
            status,
            workers,
            queues,
            system_load,
            timestamp: Utc::now(),
        }
    }

    /// Spawn the periodic health check: logs the snapshot at a fixed
    /// interval until `stop_all` aborts it.
    pub async fn spawn_health_loop(self: &Arc<Self>, period: Duration) {
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut tick = interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tick.tick().await; // skip the immediate first tick
            loop {
                tick.tick().await;
                let snapshot = manager.health_snapshot().await;
                info!(
                    subsystem = "jobs",
                    component = "manager",
                    op = "health_check",
                    status = ?snapshot.status,
                    workers = snapshot.workers.len(),
                    system_load = snapshot.system_load,
                    "Periodic health check"
                );
            }
        });
        *self.health_handle.lock().await = Some(handle);
    }
}

/// Classify the pool from per-worker health.
///
/// Healthy: every worker running with error rate below threshold.
/// Degraded: some are. Unhealthy: none are (or there are no workers).
pub fn classify(workers: &[WorkerHealth], error_rate_threshold: f64) -> HealthStatus {
    if workers.is_empty() {
        return HealthStatus::Unhealthy;
    }
    let healthy = workers
        .iter()
        .filter(|w| w.state == WorkerState::Running && w.error_rate < error_rate_threshold)
        .count();
    if healthy == workers.len() {
        HealthStatus::Healthy
    } else if healthy > 0 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Unhealthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn health(name: &str, state: WorkerState, error_rate: f64) -> WorkerHealth {
        WorkerHealth {
            name: name.to_string(),
            queue: "ingest".to_string(),
            state,
            active_jobs: 0,
            claimed_total: 0,
            completed_total: 0,
            failed_total: 0,
            retried_total: 0,
            poll_errors: 0,
            error_rate,
        }
    }

    #[test]
    fn test_classify_empty_pool_is_unhealthy() {
        assert_eq!(classify(&[], 0.5), HealthStatus::Unhealthy);
    }

    #[test]
    fn test_classify_all_running_healthy() {
        let pool = vec![
            health("a", WorkerState::Running, 0.0),
            health("b", WorkerState::Running, 0.1),
        ];
        assert_eq!(classify(&pool, 0.5), HealthStatus::Healthy);
    }

    #[test]
    fn test_classify_some_running_degraded() {
        let pool = vec![
            health("a", WorkerState::Running, 0.0),
            health("b", WorkerState::Stopped, 0.0),
        ];
        assert_eq!(classify(&pool, 0.5), HealthStatus::Degraded);
    }

    #[test]
    fn test_classify_high_error_rate_counts_against_health() {
        let pool = vec![
            health("a", WorkerState::Running, 0.9),
            health("b", WorkerState::Running, 0.0),
        ];
        assert_eq!(classify(&pool, 0.5), HealthStatus::Degraded);
    }

    #[test]
    fn test_classify_none_running_unhealthy() {
        let pool = vec![
            health("a", WorkerState::Stopped, 0.0),
            health("b", WorkerState::Error, 0.0),
        ];
        assert_eq!(classify(&pool, 0.5), HealthStatus::Unhealthy);
    }
}
