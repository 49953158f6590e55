//! Graceful shutdown handling
//!
//! SIGTERM and SIGINT drive a two-phase shutdown:
//! - Workers are cancelled first and drained completely
//! - Only then is the TLS server cancelled and given a bounded drain
//!
//! The server keeps answering requests (health checks included) while the
//! workers wind down.

use crate::app::WorkerSupervisor;
use crate::server::tls::ServerError;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Receiving half of a one-shot cancellation
///
/// Once fired it stays fired. Cheap to clone; every clone observes the same
/// state.
#[derive(Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Wait for shutdown signal
    pub async fn wait(&mut self) {
        while !*self.receiver.borrow() {
            if self.receiver.changed().await.is_err() {
                // Sender dropped, treat as shutdown
                break;
            }
        }
    }

    /// Check if shutdown was signaled (non-blocking)
    pub fn is_shutdown(&self) -> bool {
        *self.receiver.borrow()
    }
}

/// Controller for triggering shutdown
pub struct ShutdownController {
    sender: watch::Sender<bool>,
    scope: &'static str,
}

impl ShutdownController {
    /// Trigger shutdown; repeated calls are no-ops
    pub fn shutdown(&self) {
        let fired = self.sender.send_if_modified(|cancelled| {
            let first = !*cancelled;
            *cancelled = true;
            first
        });
        if fired {
            info!(scope = self.scope, "Shutdown signal sent");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow()
    }
}

/// Create a new shutdown signal pair
///
/// Returns (controller, signal) where:
/// - controller: Used to trigger shutdown
/// - signal: Cloned and passed to components that need to listen
///
/// `scope` only labels log lines.
pub fn shutdown_channel(scope: &'static str) -> (ShutdownController, ShutdownSignal) {
    let (sender, receiver) = watch::channel(false);
    (ShutdownController { sender, scope }, ShutdownSignal { receiver })
}

/// Registered SIGTERM/SIGINT listeners
///
/// Registration happens up front so a failure is a startup error rather
/// than a surprise at shutdown time.
#[cfg(unix)]
pub struct TerminationSignals {
    sigterm: tokio::signal::unix::Signal,
    sigint: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl TerminationSignals {
    pub fn register() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
        })
    }

    /// Wait for SIGTERM or SIGINT, returning the signal name
    pub async fn recv(mut self) -> &'static str {
        tokio::select! {
            _ = self.sigterm.recv() => "SIGTERM",
            _ = self.sigint.recv() => "SIGINT",
        }
    }
}

/// Ctrl+C listener (non-unix)
#[cfg(not(unix))]
pub struct TerminationSignals;

#[cfg(not(unix))]
impl TerminationSignals {
    pub fn register() -> std::io::Result<Self> {
        Ok(Self)
    }

    pub async fn recv(self) -> &'static str {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to wait for Ctrl+C");
            std::future::pending::<()>().await;
        }
        "CTRL_C"
    }
}

/// Progress through the shutdown sequence
///
/// Each flag goes false -> true at most once and never back.
#[derive(Debug, Default)]
pub struct ShutdownState {
    workers_cancelled: AtomicBool,
    workers_drained: AtomicBool,
    server_cancelled: AtomicBool,
}

/// Point-in-time copy of [`ShutdownState`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownSnapshot {
    pub workers_cancelled: bool,
    pub workers_drained: bool,
    pub server_cancelled: bool,
}

impl ShutdownState {
    pub fn snapshot(&self) -> ShutdownSnapshot {
        ShutdownSnapshot {
            workers_cancelled: self.workers_cancelled.load(Ordering::SeqCst),
            workers_drained: self.workers_drained.load(Ordering::SeqCst),
            server_cancelled: self.server_cancelled.load(Ordering::SeqCst),
        }
    }
}

/// How the shutdown sequence ended
#[derive(Debug)]
pub enum ShutdownOutcome {
    /// Workers drained and the server stopped within its bound
    Clean { signal: &'static str },
    /// The server stopped on its own before any termination request
    ServerFailed(ServerError),
    /// The server's stop phase returned an error
    StopFailed(ServerError),
    /// The server did not finish stopping within the bound
    StopTimedOut(Duration),
}

impl ShutdownOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, ShutdownOutcome::Clean { .. })
    }
}

/// Owner of the worker and server cancellation contexts
///
/// Server cancellation is only ever issued after every supervised worker
/// has returned.
pub struct ShutdownCoordinator {
    workers: ShutdownController,
    worker_signal: ShutdownSignal,
    server: ShutdownController,
    server_signal: ShutdownSignal,
    state: Arc<ShutdownState>,
    server_timeout: Duration,
}

impl ShutdownCoordinator {
    /// `server_timeout` bounds the wait for the server task after it is cancelled
    pub fn new(server_timeout: Duration) -> Self {
        let (workers, worker_signal) = shutdown_channel("workers");
        let (server, server_signal) = shutdown_channel("server");
        Self {
            workers,
            worker_signal,
            server,
            server_signal,
            state: Arc::new(ShutdownState::default()),
            server_timeout,
        }
    }

    /// Signal handed to the worker supervisor
    pub fn worker_signal(&self) -> ShutdownSignal {
        self.worker_signal.clone()
    }

    /// Signal handed to the TLS server (and the health listener)
    pub fn server_signal(&self) -> ShutdownSignal {
        self.server_signal.clone()
    }

    pub fn state(&self) -> Arc<ShutdownState> {
        Arc::clone(&self.state)
    }

    /// Drive the shutdown sequence
    ///
    /// Waits for `trigger` (normally [`TerminationSignals::recv`]), then
    /// cancels and drains the workers, then cancels the server and waits for
    /// `server` to finish, bounded by the configured timeout. If `server`
    /// finishes before any trigger, the workers are still drained and
    /// [`ShutdownOutcome::ServerFailed`] is returned.
    pub async fn run<T>(
        self,
        trigger: T,
        supervisor: WorkerSupervisor,
        mut server: JoinHandle<Result<(), ServerError>>,
    ) -> ShutdownOutcome
    where
        T: Future<Output = &'static str>,
    {
        let signal = tokio::select! {
            signal = trigger => signal,
            joined = &mut server => {
                let err = match joined {
                    Ok(Ok(())) => ServerError::Serve(std::io::Error::other(
                        "server exited before shutdown was requested",
                    )),
                    Ok(Err(e)) => e,
                    Err(e) => ServerError::Panicked(e.to_string()),
                };
                error!(error = %err, "Server terminated unexpectedly");
                self.drain_workers(supervisor).await;
                self.state.server_cancelled.store(true, Ordering::SeqCst);
                self.server.shutdown();
                return ShutdownOutcome::ServerFailed(err);
            }
        };

        warn!(signal, "Caught signal, attempting clean shutdown");

        // Workers first, so requests keep being served while they finish
        self.drain_workers(supervisor).await;

        self.state.server_cancelled.store(true, Ordering::SeqCst);
        self.server.shutdown();

        match tokio::time::timeout(self.server_timeout, &mut server).await {
            Ok(Ok(Ok(()))) => {
                info!("Shutdown complete");
                ShutdownOutcome::Clean { signal }
            }
            Ok(Ok(Err(e))) => {
                error!(error = %e, "Server stop failed");
                ShutdownOutcome::StopFailed(e)
            }
            Ok(Err(e)) => {
                error!(error = %e, "Server task panicked during stop");
                ShutdownOutcome::StopFailed(ServerError::Panicked(e.to_string()))
            }
            Err(_) => {
                server.abort();
                error!(timeout = ?self.server_timeout, "Server did not stop in time");
                ShutdownOutcome::StopTimedOut(self.server_timeout)
            }
        }
    }

    async fn drain_workers(&self, supervisor: WorkerSupervisor) {
        self.state.workers_cancelled.store(true, Ordering::SeqCst);
        self.workers.shutdown();

        let drained = supervisor.wait_drained().await;
        self.state.workers_drained.store(true, Ordering::SeqCst);
        info!(workers = drained, "Workers drained");
    }
}
