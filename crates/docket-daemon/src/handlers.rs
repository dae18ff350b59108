//! Concrete job handlers wired into the daemon.
//!
//! The document stages (parse, chunk, embed) delegate to the external
//! processing service over HTTP — the queue passes the payload through
//! unmodified and records whatever the service returns. `cleanup_temp` is
//! implemented locally against the filesystem.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use docket_core::JobType;
use docket_jobs::{JobContext, JobHandler, JobResult};

/// URL path segment for each job type on the processing service.
fn job_type_slug(job_type: JobType) -> &'static str {
    match job_type {
        JobType::ParsePdf => "parse_pdf",
        JobType::ParseMarkdown => "parse_markdown",
        JobType::ParseText => "parse_text",
        JobType::ChunkDocument => "chunk_document",
        JobType::EmbedChunks => "embed_chunks",
        JobType::CleanupTemp => "cleanup_temp",
    }
}

/// HTTP client for the external document-processing service.
pub struct PipelineClient {
    client: reqwest::Client,
    base_url: String,
}

impl PipelineClient {
    /// Create a client against `base_url` (no trailing slash).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Endpoint for one job type.
    fn endpoint(&self, job_type: JobType) -> String {
        format!(
            "{}/v1/jobs/{}",
            self.base_url.trim_end_matches('/'),
            job_type_slug(job_type)
        )
    }
}

/// Handler that forwards a job to the processing service and relays the
/// response as the job result.
pub struct PipelineHandler {
    job_type: JobType,
    client: std::sync::Arc<PipelineClient>,
}

impl PipelineHandler {
    /// Create a handler for `job_type` sharing one pipeline client.
    pub fn new(job_type: JobType, client: std::sync::Arc<PipelineClient>) -> Self {
        Self { job_type, client }
    }
}

#[async_trait]
impl JobHandler for PipelineHandler {
    fn job_type(&self) -> JobType {
        self.job_type
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        if ctx.is_cancelled() {
            return JobResult::Failed("cancelled before dispatch".to_string());
        }

        let url = self.client.endpoint(self.job_type);
        let body = json!({
            "job_id": ctx.job.id,
            "document_id": ctx.job.document_id,
            "user_id": ctx.job.user_id,
            "payload": ctx.job.payload,
        });

        ctx.report_progress(0, 1, Some("dispatching to pipeline"));
        debug!(
            subsystem = "daemon",
            component = "pipeline_handler",
            job_id = %ctx.job.id,
            url = %url,
            "Dispatching job to processing service"
        );

        let response = match self.client.client.post(&url).json(&body).send().await {
            Ok(response) => response,
            // Transport failure is transient by nature.
            Err(e) => return JobResult::Retry(format!("pipeline unreachable: {e}")),
        };

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return JobResult::Failed(format!(
                "pipeline returned {status}: {}",
                detail.chars().take(500).collect::<String>()
            ));
        }

        let result = match response.json::<serde_json::Value>().await {
            Ok(value) => value,
            Err(e) => return JobResult::Failed(format!("malformed pipeline response: {e}")),
        };

        ctx.report_progress(1, 1, Some("pipeline stage complete"));
        JobResult::Success(Some(result))
    }
}

/// Removes stale temporary artifacts left behind by earlier pipeline stages.
pub struct CleanupTempHandler {
    root: PathBuf,
    max_age: Duration,
}

impl CleanupTempHandler {
    /// Scan `root` for regular files older than `max_age`.
    pub fn new(root: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            root: root.into(),
            max_age,
        }
    }
}

#[async_trait]
impl JobHandler for CleanupTempHandler {
    fn job_type(&self) -> JobType {
        JobType::CleanupTemp
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        // A missing root means nothing to clean.
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return JobResult::Success(Some(json!({"scanned": 0, "removed": 0})));
            }
            Err(e) => return JobResult::Failed(format!("cannot read temp dir: {e}")),
        };

        let files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();

        let now = SystemTime::now();
        let total = files.len() as i32;
        let mut removed = 0u64;

        for (idx, path) in files.iter().enumerate() {
            if ctx.is_cancelled() {
                return JobResult::Failed(format!(
                    "cancelled after removing {removed} of {total} candidates"
                ));
            }

            let old_enough = std::fs::metadata(path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .map(|age| age >= self.max_age)
                .unwrap_or(false);

            if old_enough {
                match std::fs::remove_file(path) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(
                        subsystem = "daemon",
                        component = "cleanup_temp",
                        path = %path.display(),
                        error = %e,
                        "Failed to remove temp file"
                    ),
                }
            }

            if (idx + 1) % 10 == 0 {
                ctx.report_progress(idx as i32 + 1, total, Some("removing stale temp files"));
            }
        }

        ctx.report_progress(total, total.max(1), Some("cleanup complete"));
        JobResult::Success(Some(json!({"scanned": total, "removed": removed})))
    }
}
