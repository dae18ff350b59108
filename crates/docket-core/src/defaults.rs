//! Centralized default constants for the docket system.
//!
//! **This module is the single source of truth** for all shared default values.
//! All crates and the daemon should reference these constants instead of
//! defining their own magic numbers.
//!
//! Organized by domain area. When adding new constants, place them in the
//! appropriate section and document the rationale for the chosen value.

// =============================================================================
// JOB PROCESSING
// =============================================================================

/// Default maximum attempts before a job is marked failed.
pub const JOB_MAX_ATTEMPTS: i32 = 3;

/// Default per-job backoff base in seconds (multiplied into the retry delay).
pub const JOB_RETRY_DELAY_SECS: i32 = 1;

/// Ceiling on the computed retry backoff (5 minutes).
pub const RETRY_BACKOFF_CAP_MS: u64 = 300_000;

/// Default worker poll interval in milliseconds.
pub const JOB_POLL_INTERVAL_MS: u64 = 500;

/// Default per-worker concurrency (max jobs processed in parallel).
pub const JOB_CONCURRENCY: usize = 4;

/// Default hard deadline for a single job attempt in seconds.
pub const JOB_TIMEOUT_SECS: u64 = 600;

// =============================================================================
// QUEUES
// =============================================================================

/// Queue for document pipeline jobs (parse, chunk, embed).
pub const QUEUE_INGEST: &str = "ingest";

/// Queue for housekeeping jobs (temp cleanup).
pub const QUEUE_MAINTENANCE: &str = "maintenance";

// =============================================================================
// SUPERVISOR / MAINTENANCE
// =============================================================================

/// Age after which a PROCESSING job is considered orphaned, in seconds.
pub const STALE_JOB_SECS: u64 = 1800;

/// Interval between maintenance sweeps (stale reset + retention purge).
pub const MAINTENANCE_INTERVAL_SECS: u64 = 3600;

/// Retention window for COMPLETED rows, in hours.
pub const RETENTION_COMPLETED_HOURS: i64 = 24;

/// Retention window for FAILED rows, in hours (kept longer for diagnosis).
pub const RETENTION_FAILED_HOURS: i64 = 24 * 7;

// =============================================================================
// MANAGER / HEALTH
// =============================================================================

/// Interval between manager health checks, in seconds.
pub const HEALTH_CHECK_INTERVAL_SECS: u64 = 30;

/// Per-worker error rate above which the worker counts as degraded.
pub const WORKER_ERROR_RATE_THRESHOLD: f64 = 0.5;

/// Grace period for draining in-flight jobs on shutdown, in seconds.
pub const SHUTDOWN_GRACE_SECS: u64 = 30;

/// Worker event broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// CONFIG VALIDATION BOUNDS
// =============================================================================

/// Valid range for per-worker concurrency.
pub const CONCURRENCY_RANGE: std::ops::RangeInclusive<usize> = 1..=32;

/// Valid range for the poll interval in milliseconds.
pub const POLL_INTERVAL_RANGE_MS: std::ops::RangeInclusive<u64> = 50..=60_000;

/// Valid range for max attempts.
pub const MAX_ATTEMPTS_RANGE: std::ops::RangeInclusive<i32> = 1..=10;

/// Valid range for the per-job timeout in seconds.
pub const TIMEOUT_RANGE_SECS: std::ops::RangeInclusive<u64> = 1..=3600;
