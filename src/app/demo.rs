//! Demo worker
//!
//! Runs its task once right away (so health checks have a result before the
//! first sleep elapses), then once per `worker-sleep` until shutdown.

use crate::app::supervisor::{Worker, WorkerError};
use crate::server::metrics::SharedMetrics;
use crate::server::shutdown::ShutdownSignal;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

pub const DEMO_WORKER_NAME: &str = "DemoWorker";

pub struct DemoWorker {
    sleep: Duration,
    demo_metrics: Vec<String>,
    metrics: Option<SharedMetrics>,
    runs: AtomicU64,
}

impl DemoWorker {
    pub fn new(sleep: Duration, demo_metrics: Vec<String>) -> Self {
        Self {
            sleep,
            demo_metrics,
            metrics: None,
            runs: AtomicU64::new(0),
        }
    }

    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Total task runs across all invocations
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }

    fn run_task(&self, iteration: u64) {
        let total = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        info!(worker = "demo", iteration, "Running demo task");

        if let Some(metrics) = &self.metrics {
            let value = i64::try_from(total).unwrap_or(i64::MAX);
            for name in &self.demo_metrics {
                metrics.set_demo_metric(name, value);
            }
        }
    }
}

#[async_trait]
impl Worker for DemoWorker {
    async fn run(&self, mut shutdown: ShutdownSignal) -> Result<(), WorkerError> {
        let mut iteration = 0;
        self.run_task(iteration);

        loop {
            tokio::select! {
                _ = shutdown.wait() => {
                    debug!(worker = "demo", "Received shutdown signal");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.sleep) => {
                    iteration += 1;
                    self.run_task(iteration);
                }
            }
        }
    }
}
