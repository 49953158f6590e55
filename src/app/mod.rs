//! Application layer: background workers and the "App" health probe

mod demo;
mod supervisor;

pub use demo::{DemoWorker, DEMO_WORKER_NAME};
pub use supervisor::{RestartPolicy, Worker, WorkerError, WorkerStatus, WorkerSupervisor};

use crate::server::health::{HealthCheck, HealthProbe};
use async_trait::async_trait;
use std::sync::Arc;

/// Application health as seen by the probe registry
pub struct App {
    workers: WorkerStatus,
}

impl App {
    pub fn new(workers: WorkerStatus) -> Self {
        Self { workers }
    }

    /// The "App" probe for the health aggregator
    pub fn probe(self: Arc<Self>) -> HealthProbe {
        HealthProbe::new("App", "Check app health.", self)
    }
}

#[async_trait]
impl HealthCheck for App {
    /// Fails while any worker's most recent iteration ended in error
    async fn healthz(&self) -> anyhow::Result<()> {
        let failing = self.workers.failing();
        if failing.is_empty() {
            return Ok(());
        }
        let detail = failing
            .iter()
            .map(|(name, err)| format!("{}: {}", name, err))
            .collect::<Vec<_>>()
            .join("; ");
        anyhow::bail!("worker failing: {}", detail)
    }
}

#[cfg(test)]
#[path = "supervisor_test.rs"]
mod supervisor_tests;
