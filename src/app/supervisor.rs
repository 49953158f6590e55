//! Supervised background workers
//!
//! Each worker runs in its own task inside a restart loop:
//! - An error return is logged and the worker is invoked again
//! - A panic is caught at the iteration boundary, logged as critical,
//!   and the worker is invoked again
//! - Once the shutdown signal fires the loop exits for good
//!
//! One worker crashing never affects another.

use crate::fault::catch_fault;
use crate::server::metrics::SharedMetrics;
use crate::server::shutdown::ShutdownSignal;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Errors a worker iteration can end with
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("{0}")]
    Failed(String),

    #[error("worker panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A long-running background task
///
/// `run` should return once `shutdown` fires. Returning earlier, with or
/// without an error, makes the supervisor invoke it again.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn run(&self, shutdown: ShutdownSignal) -> Result<(), WorkerError>;
}

/// What to do between two invocations of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestartPolicy {
    /// Invoke again right away
    #[default]
    Immediate,
    /// Wait this long first (cut short by shutdown)
    Delay(Duration),
}

impl RestartPolicy {
    pub fn from_delay(delay: Duration) -> Self {
        if delay.is_zero() {
            RestartPolicy::Immediate
        } else {
            RestartPolicy::Delay(delay)
        }
    }
}

/// Outcome of each worker's most recent iteration, by name
///
/// `None` means the last iteration succeeded (or none has finished yet).
#[derive(Debug, Clone, Default)]
pub struct WorkerStatus {
    last_errors: Arc<Mutex<BTreeMap<String, Option<String>>>>,
}

impl WorkerStatus {
    pub(crate) fn record(&self, name: &str, outcome: Option<String>) {
        let mut last_errors = match self.last_errors.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        last_errors.insert(name.to_string(), outcome);
    }

    /// Workers whose last iteration failed, with the error text
    pub fn failing(&self) -> Vec<(String, String)> {
        let last_errors = match self.last_errors.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        last_errors
            .iter()
            .filter_map(|(name, err)| err.as_ref().map(|e| (name.clone(), e.clone())))
            .collect()
    }
}

/// Runs named workers under restart loops until the shutdown signal fires
pub struct WorkerSupervisor {
    shutdown: ShutdownSignal,
    policy: RestartPolicy,
    metrics: Option<SharedMetrics>,
    status: WorkerStatus,
    tasks: JoinSet<()>,
}

impl WorkerSupervisor {
    pub fn new(shutdown: ShutdownSignal) -> Self {
        Self {
            shutdown,
            policy: RestartPolicy::default(),
            metrics: None,
            status: WorkerStatus::default(),
            tasks: JoinSet::new(),
        }
    }

    pub fn with_policy(mut self, policy: RestartPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Shared view of per-worker outcomes
    pub fn status(&self) -> WorkerStatus {
        self.status.clone()
    }

    /// Start supervising `worker` under `name`
    pub fn spawn(&mut self, name: impl Into<String>, worker: Arc<dyn Worker>) {
        let supervised = Supervised {
            name: name.into(),
            worker,
            shutdown: self.shutdown.clone(),
            policy: self.policy,
            metrics: self.metrics.clone(),
            status: self.status.clone(),
        };
        self.tasks.spawn(supervised.run());
    }

    /// Number of workers still running
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait until every supervised worker has returned
    ///
    /// Only returns once the shutdown signal has fired, since workers never
    /// leave their loop otherwise. Returns the number of workers drained.
    pub async fn wait_drained(mut self) -> usize {
        let mut drained = 0;
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                // The loop itself never panics; this is a cancelled runtime
                warn!(error = %e, "Supervisor task ended abnormally");
            }
            drained += 1;
        }
        drained
    }
}

struct Supervised {
    name: String,
    worker: Arc<dyn Worker>,
    shutdown: ShutdownSignal,
    policy: RestartPolicy,
    metrics: Option<SharedMetrics>,
    status: WorkerStatus,
}

impl Supervised {
    async fn run(mut self) {
        loop {
            if self.shutdown.is_shutdown() {
                break;
            }

            info!(worker = %self.name, "Running worker");
            if let Some(metrics) = &self.metrics {
                metrics.record_worker_iteration(&self.name);
            }

            let outcome = match catch_fault(self.worker.run(self.shutdown.clone())).await {
                Ok(result) => result,
                Err(panic) => Err(WorkerError::Panicked(panic)),
            };

            match outcome {
                Ok(()) => self.status.record(&self.name, None),
                Err(err) => {
                    if let WorkerError::Panicked(panic) = &err {
                        error!(
                            worker = %self.name,
                            severity = "critical",
                            panic = %panic,
                            "Worker panicked"
                        );
                        if let Some(metrics) = &self.metrics {
                            metrics.record_worker_panic(&self.name);
                        }
                    } else {
                        error!(worker = %self.name, error = %err, "Worker failed");
                    }
                    if let Some(metrics) = &self.metrics {
                        metrics.record_worker_failure(&self.name);
                    }
                    self.status.record(&self.name, Some(err.to_string()));
                }
            }

            match self.policy {
                // A worker that returns at once would otherwise never yield
                RestartPolicy::Immediate => tokio::task::yield_now().await,
                RestartPolicy::Delay(delay) => {
                    tokio::select! {
                        _ = self.shutdown.wait() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        info!(worker = %self.name, "Closing worker loop");
    }
}
