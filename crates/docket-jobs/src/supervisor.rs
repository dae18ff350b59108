//! Bootstrap and self-healing maintenance for the worker pool.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use docket_core::{defaults, HealthSnapshot, JobStore, JobType, NewJob, Result};
use docket_db::Database;

use crate::manager::WorkerManager;
use crate::worker::WorkerConfig;

/// Queue used by `self_test` probe jobs so no worker ever claims them.
const SELF_TEST_QUEUE: &str = "self-test";

/// Supervisor timing and retention configuration.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Age after which a PROCESSING job counts as orphaned.
    pub stale_after: Duration,
    /// Interval between maintenance sweeps.
    pub maintenance_interval: Duration,
    /// Retention for COMPLETED rows.
    pub completed_retention: Duration,
    /// Retention for FAILED rows.
    pub failed_retention: Duration,
    /// Interval between manager health checks.
    pub health_interval: Duration,
    /// Grace period for draining in-flight jobs on shutdown.
    pub shutdown_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(defaults::STALE_JOB_SECS),
            maintenance_interval: Duration::from_secs(defaults::MAINTENANCE_INTERVAL_SECS),
            completed_retention: Duration::from_secs(
                defaults::RETENTION_COMPLETED_HOURS as u64 * 3600,
            ),
            failed_retention: Duration::from_secs(defaults::RETENTION_FAILED_HOURS as u64 * 3600),
            health_interval: Duration::from_secs(defaults::HEALTH_CHECK_INTERVAL_SECS),
            shutdown_grace: Duration::from_secs(defaults::SHUTDOWN_GRACE_SECS),
        }
    }
}

impl SupervisorConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_STALE_AFTER_SECS` | `1800` | Staleness window for orphan recovery |
    /// | `JOB_MAINTENANCE_INTERVAL_SECS` | `3600` | Maintenance sweep interval |
    /// | `JOB_RETENTION_COMPLETED_HOURS` | `24` | Completed-row retention |
    /// | `JOB_RETENTION_FAILED_HOURS` | `168` | Failed-row retention |
    /// | `JOB_SHUTDOWN_GRACE_SECS` | `30` | Drain grace on shutdown |
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(secs) = env_u64("JOB_STALE_AFTER_SECS") {
            config.stale_after = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("JOB_MAINTENANCE_INTERVAL_SECS") {
            config.maintenance_interval = Duration::from_secs(secs);
        }
        if let Some(hours) = env_u64("JOB_RETENTION_COMPLETED_HOURS") {
            config.completed_retention = Duration::from_secs(hours * 3600);
        }
        if let Some(hours) = env_u64("JOB_RETENTION_FAILED_HOURS") {
            config.failed_retention = Duration::from_secs(hours * 3600);
        }
        if let Some(secs) = env_u64("JOB_SHUTDOWN_GRACE_SECS") {
            config.shutdown_grace = Duration::from_secs(secs);
        }

        config
    }

    /// Set the staleness window.
    pub fn with_stale_after(mut self, d: Duration) -> Self {
        self.stale_after = d;
        self
    }

    /// Set the maintenance sweep interval.
    pub fn with_maintenance_interval(mut self, d: Duration) -> Self {
        self.maintenance_interval = d;
        self
    }

    /// Set the shutdown drain grace period.
    pub fn with_shutdown_grace(mut self, d: Duration) -> Self {
        self.shutdown_grace = d;
        self
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Orchestrates store initialization, crash recovery, worker startup, and
/// the recurring maintenance sweep.
pub struct Supervisor {
    db: Database,
    manager: Arc<WorkerManager>,
    config: SupervisorConfig,
    maintenance_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Supervisor {
    /// Create a supervisor over an already-connected database and manager.
    pub fn new(db: Database, manager: Arc<WorkerManager>, config: SupervisorConfig) -> Self {
        Self {
            db,
            manager,
            config,
            maintenance_handle: Mutex::new(None),
        }
    }

    /// Verify store liveness and recover orphaned jobs.
    ///
    /// Must run before any worker starts claiming: PROCESSING rows left by a
    /// crashed process go back to QUEUED here. Startup errors are fatal and
    /// propagate to the caller.
    pub async fn init(&self) -> Result<u64> {
        self.db.ping().await?;
        let recovered = self.db.jobs.reset_stale(self.config.stale_after).await?;
        info!(
            subsystem = "jobs",
            component = "supervisor",
            op = "init",
            recovered,
            "Store live, stale jobs recovered"
        );
        Ok(recovered)
    }

    /// Start the worker pool, the health check, and the maintenance sweep.
    /// Returns the number of workers running.
    pub async fn start(self: &Arc<Self>) -> Result<usize> {
        let started = self.manager.start_all().await;
        self.manager
            .spawn_health_loop(self.config.health_interval)
            .await;

        let supervisor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            supervisor.maintenance_loop().await;
        });
        *self.maintenance_handle.lock().await = Some(handle);

        info!(
            subsystem = "jobs",
            component = "supervisor",
            workers = started,
            maintenance_interval_secs = self.config.maintenance_interval.as_secs(),
            "Supervisor started"
        );
        Ok(started)
    }

    /// Recurring maintenance: stale reset + retention purge + health log.
    async fn maintenance_loop(self: Arc<Self>) {
        let mut tick = interval(self.config.maintenance_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tick.tick().await; // init() already swept once
        loop {
            tick.tick().await;
            if let Err(e) = self.run_maintenance_once().await {
                error!(
                    subsystem = "jobs",
                    component = "supervisor",
                    op = "maintenance",
                    error = %e,
                    "Maintenance sweep failed"
                );
            }
        }
    }

    /// Run one maintenance sweep now. Returns (stale rows recovered, old
    /// rows purged).
    pub async fn run_maintenance_once(&self) -> Result<(u64, u64)> {
        let recovered = self.db.jobs.reset_stale(self.config.stale_after).await?;
        let purged = self
            .db
            .jobs
            .purge_old(self.config.completed_retention, self.config.failed_retention)
            .await?;

        let snapshot = self.manager.health_snapshot().await;
        info!(
            subsystem = "jobs",
            component = "supervisor",
            op = "maintenance",
            recovered,
            purged,
            status = ?snapshot.status,
            system_load = snapshot.system_load,
            "Maintenance sweep complete"
        );
        Ok((recovered, purged))
    }

    /// Current health snapshot (management surface).
    pub async fn status(&self) -> HealthSnapshot {
        self.manager.health_snapshot().await
    }

    /// Configurations of every registered worker (management surface).
    pub async fn list_config(&self) -> Vec<WorkerConfig> {
        self.manager.list_configs().await
    }

    /// Force a maintenance sweep now (management surface).
    pub async fn force_cleanup(&self) -> Result<(u64, u64)> {
        self.run_maintenance_once().await
    }

    /// Round-trip the store write path: enqueue a probe job on a queue no
    /// worker polls, then cancel it (management surface).
    pub async fn self_test(&self) -> Result<()> {
        self.db.ping().await?;

        let job_id = self
            .db
            .jobs
            .enqueue(NewJob::new(JobType::CleanupTemp).with_queue(SELF_TEST_QUEUE))
            .await?;
        let cancelled = self.db.jobs.cancel(job_id).await?;
        if !cancelled {
            return Err(docket_core::Error::Internal(
                "self-test probe job was not cancellable".into(),
            ));
        }
        info!(
            subsystem = "jobs",
            component = "supervisor",
            op = "self_test",
            job_id = %job_id,
            "Self-test passed"
        );
        Ok(())
    }

    /// Stop maintenance and drain the worker pool within the configured
    /// grace period.
    pub async fn shutdown(&self) {
        info!(
            subsystem = "jobs",
            component = "supervisor",
            op = "shutdown",
            "Supervisor shutting down"
        );
        if let Some(handle) = self.maintenance_handle.lock().await.take() {
            handle.abort();
        }
        self.manager.stop_all(self.config.shutdown_grace).await;
    }
}
