//! docket-daemon: job-queue worker pool for the document-ingestion pipeline.
//!
//! Boot order matters: connect → migrate → recover stale jobs → start
//! workers. Crash recovery must complete before anything starts claiming.

mod config;
mod handlers;

use std::sync::Arc;

use tracing::{debug, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use docket_core::{JobStore, JobType};
use docket_db::Database;
use docket_jobs::{Supervisor, WorkerEvent, WorkerManager, WorkerRegistry};

use config::DaemonConfig;
use handlers::{CleanupTempHandler, PipelineClient, PipelineHandler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with configurable output
    //
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   RUST_LOG    - standard env filter (default: "docket=info")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "docket_daemon=info,docket_jobs=info,docket_db=info".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("docket-daemon.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false), // no ANSI in files
                )
                .init();
        }
        Some(guard)
    } else if log_format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
        None
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let daemon_config = DaemonConfig::from_env();

    // Connect to database and run migrations
    info!("Connecting to database...");
    let db = Database::connect(&daemon_config.database_url).await?;
    info!("Database connected");

    info!("Running database migrations...");
    db.migrate().await?;
    info!("Database migrations complete");

    let store: Arc<dyn JobStore> = Arc::new(db.jobs.clone());
    let manager = Arc::new(WorkerManager::new(store.clone()));

    // Register handlers: document stages delegate to the processing
    // service; temp cleanup runs locally.
    let mut registry = WorkerRegistry::new();
    let pipeline = Arc::new(PipelineClient::new(&daemon_config.pipeline_url));
    for job_type in [
        JobType::ParsePdf,
        JobType::ParseMarkdown,
        JobType::ParseText,
        JobType::ChunkDocument,
        JobType::EmbedChunks,
    ] {
        registry.register_shared(Arc::new(PipelineHandler::new(job_type, pipeline.clone())));
    }
    registry.register_handler(CleanupTempHandler::new(
        daemon_config.temp_dir.clone(),
        daemon_config.temp_max_age,
    ));

    let workers = registry.build(store, &daemon_config.workers, &manager.event_sender());
    let registered = manager.register_all(workers).await;
    if daemon_config.worker_enabled {
        info!(workers = registered, "Worker pool configured");
    } else {
        info!("Job workers disabled; running maintenance only");
    }

    // Surface the pool-wide event stream in the logs.
    let mut events = manager.events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                WorkerEvent::JobProgress { .. } => {}
                other => debug!(event = ?other, "Worker event"),
            }
        }
    });

    let supervisor = Arc::new(Supervisor::new(
        db,
        manager.clone(),
        daemon_config.supervisor.clone(),
    ));

    // Crash recovery before any worker starts claiming. A dead store here
    // is fatal to the whole process.
    supervisor.init().await?;
    let started = supervisor.start().await?;
    info!(workers = started, "docket-daemon running");

    shutdown_signal().await?;
    info!("Shutdown signal received, draining workers...");
    supervisor.shutdown().await;
    info!("docket-daemon stopped");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = sigterm.recv() => {}
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok(())
    }
}
