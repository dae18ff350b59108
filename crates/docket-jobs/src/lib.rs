//! # docket-jobs
//!
//! Worker pool and job processing runtime for docket.
//!
//! This crate provides:
//! - Polling workers with bounded per-worker concurrency
//! - Atomic batch claims against the shared job store
//! - Retry with exponential backoff and a hard per-job deadline
//! - Pool lifecycle, health aggregation, and graceful drain
//! - Crash recovery and retention maintenance via the supervisor
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use docket_db::Database;
//! use docket_jobs::{
//!     NoOpHandler, Supervisor, SupervisorConfig, WorkerConfig, WorkerManager, WorkerRegistry,
//! };
//! use docket_core::{JobStore, JobType};
//!
//! let db = Database::connect("postgres://...").await?;
//! let store: Arc<dyn JobStore> = Arc::new(db.jobs.clone());
//!
//! let mut registry = WorkerRegistry::new();
//! registry.register_handler(NoOpHandler::new(JobType::ParseText));
//!
//! let manager = Arc::new(WorkerManager::new(store.clone()));
//! let workers = registry.build(
//!     store,
//!     &[WorkerConfig::new("ingest-1", "ingest")],
//!     &manager.event_sender(),
//! );
//! manager.register_all(workers).await;
//!
//! let supervisor = Arc::new(Supervisor::new(db, manager, SupervisorConfig::default()));
//! supervisor.init().await?;   // crash recovery before any claims
//! supervisor.start().await?;
//! ```

pub mod handler;
pub mod manager;
pub mod registry;
pub mod retry;
pub mod supervisor;
pub mod worker;

// Re-export core types
pub use docket_core::*;

pub use handler::{CancellationFlag, JobContext, JobHandler, JobResult, NoOpHandler};
pub use manager::WorkerManager;
pub use registry::WorkerRegistry;
pub use retry::{backoff_delay, next_retry_at};
pub use supervisor::{Supervisor, SupervisorConfig};
pub use worker::{Worker, WorkerConfig, WorkerEvent};
