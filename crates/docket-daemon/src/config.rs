//! Daemon configuration from environment variables (with defaults).

use std::path::PathBuf;
use std::time::Duration;

use docket_core::defaults;
use docket_jobs::{SupervisorConfig, WorkerConfig};

/// Worker fleet sizing.
///
/// | Variable | Default | Description |
/// |----------|---------|-------------|
/// | `INGEST_WORKERS` | `2` | Number of workers polling the ingest queue |
/// | `INGEST_CONCURRENCY` | `4` | Concurrency per ingest worker |
/// | `INGEST_POLL_INTERVAL_MS` | `500` | Ingest poll interval |
/// | `INGEST_TIMEOUT_SECS` | `600` | Per-job deadline on ingest workers |
/// | `MAINTENANCE_WORKERS` | `1` | Number of workers polling the maintenance queue |
/// | `MAINTENANCE_TIMEOUT_SECS` | `300` | Per-job deadline on maintenance workers |
#[derive(Debug, Clone)]
pub struct FleetSpec {
    pub ingest_workers: usize,
    pub ingest_concurrency: usize,
    pub ingest_poll_interval_ms: u64,
    pub ingest_timeout_secs: u64,
    pub maintenance_workers: usize,
    pub maintenance_timeout_secs: u64,
}

impl Default for FleetSpec {
    fn default() -> Self {
        Self {
            ingest_workers: 2,
            ingest_concurrency: defaults::JOB_CONCURRENCY,
            ingest_poll_interval_ms: defaults::JOB_POLL_INTERVAL_MS,
            ingest_timeout_secs: defaults::JOB_TIMEOUT_SECS,
            maintenance_workers: 1,
            maintenance_timeout_secs: 300,
        }
    }
}

impl FleetSpec {
    /// Read the fleet sizing from the environment.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            ingest_workers: env_parse("INGEST_WORKERS", d.ingest_workers),
            ingest_concurrency: env_parse("INGEST_CONCURRENCY", d.ingest_concurrency),
            ingest_poll_interval_ms: env_parse("INGEST_POLL_INTERVAL_MS", d.ingest_poll_interval_ms),
            ingest_timeout_secs: env_parse("INGEST_TIMEOUT_SECS", d.ingest_timeout_secs),
            maintenance_workers: env_parse("MAINTENANCE_WORKERS", d.maintenance_workers),
            maintenance_timeout_secs: env_parse(
                "MAINTENANCE_TIMEOUT_SECS",
                d.maintenance_timeout_secs,
            ),
        }
    }
}

/// Expand a fleet spec into named worker configurations.
///
/// Workers are named `ingest-1..N` and `maintenance-1..N`; invalid values
/// surface later through per-worker validation in the registry, which skips
/// the offending entry instead of failing the fleet.
pub fn build_worker_fleet(spec: &FleetSpec) -> Vec<WorkerConfig> {
    let mut configs = Vec::new();

    for i in 1..=spec.ingest_workers {
        configs.push(
            WorkerConfig::new(format!("ingest-{i}"), defaults::QUEUE_INGEST)
                .with_concurrency(spec.ingest_concurrency)
                .with_poll_interval(spec.ingest_poll_interval_ms)
                .with_timeout(spec.ingest_timeout_secs),
        );
    }

    for i in 1..=spec.maintenance_workers {
        configs.push(
            WorkerConfig::new(format!("maintenance-{i}"), defaults::QUEUE_MAINTENANCE)
                .with_concurrency(1)
                .with_timeout(spec.maintenance_timeout_secs),
        );
    }

    configs
}

/// Full daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub database_url: String,
    pub worker_enabled: bool,
    pub workers: Vec<WorkerConfig>,
    pub supervisor: SupervisorConfig,
    pub pipeline_url: String,
    pub temp_dir: PathBuf,
    pub temp_max_age: Duration,
}

impl DaemonConfig {
    /// Read the entire daemon configuration from the environment.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `DATABASE_URL` | `postgres://localhost/docket` |
    /// | `WORKER_ENABLED` | `true` |
    /// | `PIPELINE_URL` | `http://127.0.0.1:8091` |
    /// | `TEMP_DIR` | `/var/lib/docket/tmp` |
    /// | `TEMP_MAX_AGE_SECS` | `86400` |
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/docket".to_string());

        let worker_enabled = std::env::var("WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let workers = if worker_enabled {
            build_worker_fleet(&FleetSpec::from_env())
        } else {
            Vec::new()
        };

        let pipeline_url = std::env::var("PIPELINE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8091".to_string());

        let temp_dir = std::env::var("TEMP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/var/lib/docket/tmp"));

        let temp_max_age = Duration::from_secs(env_parse("TEMP_MAX_AGE_SECS", 86_400u64));

        Self {
            database_url,
            worker_enabled,
            workers,
            supervisor: SupervisorConfig::from_env(),
            pipeline_url,
            temp_dir,
            temp_max_age,
        }
    }
}

fn env_parse<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
