//! Health endpoints
//!
//! - `/healthz` - Runs every registered probe and reports the failures
//! - `/liveness` - Is the process alive? Never runs probes
//! - `/metrics` - Prometheus metrics in text format
//!
//! `/healthz` answers 200 OK whatever the probes say. External monitoring
//! looks for `"Errors":null` in the body and alerts otherwise; a 5xx would
//! hide the error text from on-call. The status code is reserved for
//! transport failures.

use crate::fault::catch_fault;
use crate::server::metrics::SharedMetrics;
use crate::server::routes::not_found;
use crate::server::shutdown::ShutdownSignal;
use async_trait::async_trait;
use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error};

/// A component that can report its own health
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// `Ok(())` when healthy, otherwise an error describing the cause
    async fn healthz(&self) -> anyhow::Result<()>;
}

/// A named health check registered at startup
#[derive(Clone)]
pub struct HealthProbe {
    name: String,
    description: String,
    check: Arc<dyn HealthCheck>,
}

impl HealthProbe {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        check: Arc<dyn HealthCheck>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            check,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A failing probe as it appears in the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProbeFailure {
    #[serde(rename = "Type")]
    pub probe: String,
    pub err_msg: String,
    pub description: String,
}

/// Body of `/healthz`
///
/// `errors` is `None` (serialized as `null`) when every probe passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HealthReport {
    pub errors: Option<Vec<ProbeFailure>>,
    pub hostname: String,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.errors.is_none()
    }
}

struct Inner {
    hostname: String,
    probes: Vec<HealthProbe>,
}

/// Runs the registered probes on demand
///
/// The probe set is fixed at construction.
#[derive(Clone)]
pub struct HealthAggregator {
    inner: Arc<Inner>,
}

impl HealthAggregator {
    pub fn new(hostname: impl Into<String>, probes: Vec<HealthProbe>) -> Self {
        Self {
            inner: Arc::new(Inner {
                hostname: hostname.into(),
                probes,
            }),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.inner.hostname
    }

    pub fn probe_count(&self) -> usize {
        self.inner.probes.len()
    }

    /// Run every probe in registration order and collect the failures
    ///
    /// A probe that panics is reported as failed; the rest still run.
    pub async fn report(&self) -> HealthReport {
        let mut failures = Vec::new();

        for probe in &self.inner.probes {
            let err_msg = match catch_fault(probe.check.healthz()).await {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => {
                    error!(
                        healthz_type = %probe.name,
                        severity = "critical",
                        panic = %panic,
                        "Health probe panicked"
                    );
                    format!("probe panicked: {}", panic)
                }
            };
            failures.push(ProbeFailure {
                probe: probe.name.clone(),
                err_msg,
                description: probe.description.clone(),
            });
        }

        if failures.is_empty() {
            debug!("All checks passed");
        } else {
            for failure in &failures {
                error!(
                    error = %failure.err_msg,
                    healthz_desc = %failure.description,
                    healthz_type = %failure.probe,
                    "Check failed"
                );
            }
        }

        HealthReport {
            errors: (!failures.is_empty()).then_some(failures),
            hostname: self.inner.hostname.clone(),
        }
    }

    /// Fixed liveness answer; independent of every probe
    pub fn liveness(&self) -> &'static str {
        "OK"
    }
}

/// Handler for `/healthz` (and the TLS `/v1/healthz` proxy)
pub async fn handle_healthz(State(health): State<HealthAggregator>) -> Response {
    let report = health.report().await;
    match serde_json::to_string(&report) {
        Ok(mut body) => {
            body.push('\n');
            (StatusCode::OK, [(CONTENT_TYPE, "application/json")], body).into_response()
        }
        Err(e) => {
            error!(error = %e, "Failed to encode health report");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode health report: {}", e),
            )
                .into_response()
        }
    }
}

/// Handler for `/liveness`
pub async fn handle_liveness(State(health): State<HealthAggregator>) -> &'static str {
    health.liveness()
}

/// Prometheus metrics handler
async fn metrics(State(metrics): State<SharedMetrics>) -> Response {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response(),
    }
}

/// Build the router for the plain-HTTP health listener
pub fn health_router(health: HealthAggregator, metrics: SharedMetrics) -> Router {
    let probes = Router::new()
        .route("/healthz", get(handle_healthz))
        .route("/liveness", get(handle_liveness))
        .with_state(health);

    let exporter = Router::new()
        .route("/metrics", get(self::metrics))
        .with_state(metrics);

    probes.merge(exporter).fallback(not_found)
}

/// Serve the health router on an already bound listener until `shutdown` fires
pub async fn serve_health(
    listener: TcpListener,
    router: Router,
    mut shutdown: ShutdownSignal,
) -> Result<(), std::io::Error> {
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
}
