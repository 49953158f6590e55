//! HTTP surfaces of the service
//!
//! - TLS listener for the application routes (`tls`, `routes`), gated by
//!   client certificate OU (`auth`)
//! - Plain-HTTP health listener: `/healthz`, `/liveness`, `/metrics` (`health`)
//! - Two-phase graceful shutdown for SIGTERM/SIGINT (`shutdown`)

pub mod auth;
pub mod health;
pub mod metrics;
pub mod routes;
pub mod shutdown;
pub mod tls;

pub use auth::{ClientIdentity, OuPolicy, ADMIN_OUS, BINDING_OUS};
pub use health::{
    health_router, serve_health, HealthAggregator, HealthCheck, HealthProbe, HealthReport,
    ProbeFailure,
};
pub use metrics::{create_metrics, Metrics, SharedMetrics};
pub use routes::app_router;
pub use shutdown::{
    shutdown_channel, ShutdownController, ShutdownCoordinator, ShutdownOutcome, ShutdownSignal,
    ShutdownSnapshot, ShutdownState, TerminationSignals,
};
pub use tls::{
    shutdown_deadline, stop_deadline, BoundServer, RunningServer, ServerError, TlsServer, TlsServerConfig,
    DEFAULT_GRACE_PERIOD,
};

#[cfg(test)]
#[path = "auth_test.rs"]
mod auth_tests;

#[cfg(test)]
#[path = "health_test.rs"]
mod health_tests;

#[cfg(test)]
#[path = "shutdown_test.rs"]
mod shutdown_tests;

#[cfg(test)]
#[path = "tls_test.rs"]
mod tls_tests;
