//! Worker factory: builds configured workers from named configurations.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use docket_core::{JobStore, JobType};

use crate::handler::JobHandler;
use crate::worker::{Worker, WorkerConfig, WorkerEvent};

/// Pure factory for workers.
///
/// Handlers are registered once per job type; `build` then constructs a
/// worker for every valid, enabled configuration. Invalid or disabled
/// entries are skipped with a warning — never fatal to the whole registry.
#[derive(Default)]
pub struct WorkerRegistry {
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
}

impl WorkerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for its job type. A later registration for the
    /// same type replaces the earlier one.
    pub fn register_handler<H: JobHandler + 'static>(&mut self, handler: H) {
        let job_type = handler.job_type();
        self.handlers.insert(job_type, Arc::new(handler));
        debug!(
            subsystem = "jobs",
            component = "registry",
            job_type = ?job_type,
            "Registered job handler"
        );
    }

    /// Register an already-shared handler.
    pub fn register_shared(&mut self, handler: Arc<dyn JobHandler>) {
        let job_type = handler.job_type();
        self.handlers.insert(job_type, handler);
        debug!(
            subsystem = "jobs",
            component = "registry",
            job_type = ?job_type,
            "Registered job handler"
        );
    }

    /// Job types with a registered handler.
    pub fn handler_types(&self) -> Vec<JobType> {
        self.handlers.keys().copied().collect()
    }

    /// Construct a worker per valid, enabled configuration.
    ///
    /// Every worker gets the full handler table; dispatch happens per
    /// claimed job by type. `event_tx` is shared so one subscriber observes
    /// the whole pool.
    pub fn build(
        &self,
        store: Arc<dyn JobStore>,
        configs: &[WorkerConfig],
        event_tx: &broadcast::Sender<WorkerEvent>,
    ) -> Vec<Arc<Worker>> {
        if self.handlers.is_empty() {
            warn!(
                subsystem = "jobs",
                component = "registry",
                "No handlers registered; building no workers"
            );
            return Vec::new();
        }

        let mut workers = Vec::new();
        for config in configs {
            if !config.enabled {
                info!(
                    subsystem = "jobs",
                    component = "registry",
                    worker = %config.name,
                    "Worker disabled by configuration, skipping"
                );
                continue;
            }
            if let Err(e) = config.validate() {
                warn!(
                    subsystem = "jobs",
                    component = "registry",
                    worker = %config.name,
                    error = %e,
                    "Invalid worker configuration, skipping"
                );
                continue;
            }

            workers.push(Arc::new(Worker::new(
                config.clone(),
                store.clone(),
                self.handlers.clone(),
                event_tx.clone(),
            )));
        }

        info!(
            subsystem = "jobs",
            component = "registry",
            built = workers.len(),
            configured = configs.len(),
            "Worker registry build complete"
        );
        workers
    }
}
