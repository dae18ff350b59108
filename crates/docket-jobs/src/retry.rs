//! Retry backoff schedule.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

use docket_core::{defaults, Job};

/// Upper bound (exclusive) of the random jitter added to every delay, in ms.
const JITTER_MS: u64 = 1000;

/// Compute the delay before a failed attempt becomes eligible again.
///
/// `delay = max_attempts * base + 2^attempts * base + jitter(0..1s)`, capped
/// at `cap_ms`. `base` is the job's `retry_delay_seconds` in milliseconds
/// (1s by default), so the schedule grows exponentially in the attempt
/// number with a floor proportional to the retry budget.
pub fn backoff_delay(attempts: i32, max_attempts: i32, base_ms: u64, cap_ms: u64) -> Duration {
    let exp = 2u64.saturating_pow(attempts.max(0) as u32);
    let deterministic = (max_attempts.max(0) as u64)
        .saturating_mul(base_ms)
        .saturating_add(exp.saturating_mul(base_ms));
    let jitter = rand::thread_rng().gen_range(0..JITTER_MS);
    Duration::from_millis(deterministic.saturating_add(jitter).min(cap_ms))
}

/// Earliest time `job` may be claimed again after its current attempt failed.
pub fn next_retry_at(job: &Job) -> DateTime<Utc> {
    let base_ms = (job.retry_delay_seconds.max(1) as u64) * 1000;
    let delay = backoff_delay(
        job.attempts,
        job.max_attempts,
        base_ms,
        defaults::RETRY_BACKOFF_CAP_MS,
    );
    Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64)
}
