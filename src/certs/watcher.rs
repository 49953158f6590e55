//! Poll-based certificate rotation
//!
//! The watcher re-reads the certificate and key files on a fixed interval.
//! When their contents differ from the active pair, a new pair is parsed,
//! validated, and swapped into the [`CertificateStore`].
//!
//! Failure policy:
//! - The initial load is fatal: [`CertificateWatcher::start`] returns the error
//!   and nothing is spawned.
//! - Later loads are best effort: the error goes to the error callback, the
//!   stale pair stays active, and polling continues.

use super::store::{CertError, CertificatePair, CertificatePaths, CertificateStore};
use crate::server::metrics::SharedMetrics;
use crate::server::shutdown::{shutdown_channel, ShutdownController, ShutdownSignal};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// How often the certificate and key are polled for changes
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Callback invoked for every failed rotation attempt
pub type ErrorCallback = Arc<dyn Fn(&CertError) + Send + Sync>;

/// Result of a single poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult {
    /// Files unchanged since the active pair was loaded
    Unchanged,
    /// A new pair was validated and installed
    Rotated,
}

/// Watches a certificate/key pair on disk and keeps the store current
pub struct CertificateWatcher {
    paths: CertificatePaths,
    interval: Duration,
    store: Arc<CertificateStore>,
    on_error: ErrorCallback,
    metrics: Option<SharedMetrics>,
}

impl CertificateWatcher {
    pub fn new(paths: CertificatePaths, store: Arc<CertificateStore>) -> Self {
        let log_paths = paths.clone();
        Self {
            paths,
            interval: DEFAULT_POLL_INTERVAL,
            store,
            on_error: Arc::new(move |err| {
                warn!(
                    cert = %log_paths.cert.display(),
                    key = %log_paths.key.display(),
                    error = %err,
                    "Unable to reload certificate, keeping the active one"
                );
            }),
            metrics: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Replace the default (logging) error callback
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&CertError) + Send + Sync + 'static,
    {
        self.on_error = Arc::new(callback);
        self
    }

    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Load the pair once and install it; errors here are fatal to startup
    pub async fn load_initial(&self) -> Result<(), CertError> {
        let pair = read_pair(&self.paths).await?;
        info!(
            cert = %self.paths.cert.display(),
            key = %self.paths.key.display(),
            "Loaded initial certificate"
        );
        self.store.set(pair);
        self.record(true);
        Ok(())
    }

    /// Check the files once and rotate if their contents changed
    ///
    /// On error the active pair is left untouched and the error callback runs.
    pub async fn poll_once(&self) -> Result<PollResult, CertError> {
        match self.try_rotate().await {
            Ok(result) => Ok(result),
            Err(err) => {
                self.record(false);
                (self.on_error)(&err);
                Err(err)
            }
        }
    }

    async fn try_rotate(&self) -> Result<PollResult, CertError> {
        let cert_pem = read_file(&self.paths.cert).await?;
        let key_pem = read_file(&self.paths.key).await?;

        if let Some(current) = self.store.get() {
            if current.same_contents(&cert_pem, &key_pem) {
                return Ok(PollResult::Unchanged);
            }
        }

        let pair = CertificatePair::from_pem(cert_pem, key_pem, self.paths.clone())?;
        self.store.set(pair);
        self.record(true);
        info!(
            cert = %self.paths.cert.display(),
            key = %self.paths.key.display(),
            "Certificate rotated"
        );
        Ok(PollResult::Rotated)
    }

    fn record(&self, success: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_cert_reload(success);
        }
    }

    /// Perform the initial load, then poll in the background
    ///
    /// The returned handle stops polling when closed or dropped.
    pub async fn start(self) -> Result<WatcherHandle, CertError> {
        self.load_initial().await?;

        let (controller, signal) = shutdown_channel("certwatcher");
        let interval = self.interval;
        let task = tokio::spawn(self.run(signal));
        debug!(interval = ?interval, "Certificate watcher started");

        Ok(WatcherHandle {
            controller,
            task: Some(task),
        })
    }

    async fn run(self, mut signal: ShutdownSignal) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = signal.wait() => {
                    debug!("Certificate watcher stopped");
                    return;
                }
                _ = ticker.tick() => {
                    // Failures are already reported through the callback
                    let _ = self.poll_once().await;
                }
            }
        }
    }
}

/// Handle to a running watcher
pub struct WatcherHandle {
    controller: ShutdownController,
    task: Option<JoinHandle<()>>,
}

impl WatcherHandle {
    /// Stop polling and wait for the poll task to exit; idempotent
    pub async fn close(&mut self) {
        self.controller.shutdown();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Certificate watcher task ended abnormally");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.task.is_none()
    }
}

async fn read_file(path: &Path) -> Result<Vec<u8>, CertError> {
    tokio::fs::read(path).await.map_err(|source| CertError::Read {
        path: path.to_path_buf(),
        source,
    })
}

async fn read_pair(paths: &CertificatePaths) -> Result<CertificatePair, CertError> {
    let cert_pem = read_file(&paths.cert).await?;
    let key_pem = read_file(&paths.key).await?;
    CertificatePair::from_pem(cert_pem, key_pem, paths.clone())
}
