//! Application routes served on the TLS listener
//!
//! ## Endpoints
//! - GET /v1/demo-get - admin OUs
//! - POST /v1/demo-post - admin OUs
//! - GET /v1/demo-less-priviledge - admin and site OUs
//! - GET /v1/demo-less-privilege - alias of the above
//! - GET /v1/healthz - Health report over TLS (the plain listener stays internal)
//!
//! Anything else gets a fixed plaintext 404.

use crate::server::auth::{require_ou, OuPolicy};
use crate::server::health::{handle_healthz, HealthAggregator};
use axum::{
    http::StatusCode,
    middleware::from_fn_with_state,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Body returned for unknown routes
pub const NOT_FOUND_BODY: &str = "The requested route does not exist.\n";

/// Response of the demo endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DemoResponse {
    pub message: String,
}

async fn demo() -> Json<DemoResponse> {
    info!(func = "demo", "Hello World!");
    Json(DemoResponse {
        message: "Hello World!".to_string(),
    })
}

/// Default response for routes that do not exist
pub async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, NOT_FOUND_BODY)
}

/// Build the application router
///
/// `client_auth` turns on the OU checks; it must match whether the listener
/// verifies client certificates.
pub fn app_router(health: HealthAggregator, client_auth: bool) -> Router {
    let admin = Router::new()
        .route("/v1/demo-get", get(demo))
        .route("/v1/demo-post", post(demo))
        .route_layer(from_fn_with_state(OuPolicy::admin(client_auth), require_ou));

    // Existing clients call the misspelled path
    let binding = Router::new()
        .route("/v1/demo-less-priviledge", get(demo))
        .route("/v1/demo-less-privilege", get(demo))
        .route_layer(from_fn_with_state(OuPolicy::binding(client_auth), require_ou));

    Router::new()
        .route("/v1/healthz", get(handle_healthz))
        .with_state(health)
        .merge(admin)
        .merge(binding)
        .fallback(not_found)
}

#[cfg(test)]
#[path = "routes_test.rs"]
mod tests;
