//! Liveness endpoint.
//!
//! `GET /healthz` reports that the gateway process is serving. It does not
//! contact backends or the identity provider, so it stays 200 while they are
//! down; route-level failures surface as 502/504/401 on proxied calls.

use axum::Json;
use axum::extract::State;
use chrono::Utc;
use tracing::instrument;

use crate::models::{HealthResponse, RouteInfo};
use crate::state::AppState;

/// Liveness check.
///
/// # Response Body
///
/// ```json
/// {
///   "status": "ok",
///   "version": "0.1.0",
///   "timestamp": "2024-01-15T10:30:00Z",
///   "uptime_seconds": 3600,
///   "routes": [{ "prefix": "users", "requires_auth": true, "public_paths": ["login", "signup"] }]
/// }
/// ```
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let mut routes: Vec<RouteInfo> = state
        .routes
        .iter()
        .map(|route| {
            let mut public_paths: Vec<String> =
                route.unauthenticated_subpaths.iter().cloned().collect();
            public_paths.sort();
            RouteInfo {
                prefix: route.prefix.clone(),
                requires_auth: route.requires_auth,
                public_paths,
            }
        })
        .collect();
    routes.sort_by(|a, b| a.prefix.cmp(&b.prefix));

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        uptime_seconds: state.uptime_seconds(),
        routes,
    })
}
