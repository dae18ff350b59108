//! Structured logging field name constants for docket.
//!
//! All crates use these constants for consistent structured logging fields so
//! log aggregation tools (Loki, Elasticsearch) can query by standardized
//! field names across every subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), operation completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-item iteration, high-volume data |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "db", "jobs", "daemon"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "pool", "job_store", "worker", "manager", "supervisor"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "claim_batch", "mark_retry", "reset_stale", "drain"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Job UUID being processed.
pub const JOB_ID: &str = "job_id";

/// Job type enum variant.
pub const JOB_TYPE: &str = "job_type";

/// Logical queue partition name.
pub const QUEUE: &str = "queue";

/// Worker name holding or polling for jobs.
pub const WORKER: &str = "worker";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of jobs claimed in a poll.
pub const CLAIMED: &str = "claimed";

/// Number of jobs currently in flight on a worker.
pub const ACTIVE: &str = "active";

/// Attempt counter for the current job execution.
pub const ATTEMPT: &str = "attempt";
