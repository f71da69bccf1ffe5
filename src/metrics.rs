//! Prometheus metrics for gateway observability.
//!
//! Metrics are exposed via a dedicated HTTP listener (default port 9090).
//!
//! # Available Metrics
//!
//! ## Counters
//! - `gateway_requests_total` - Requests handled (labels: service, method, outcome)
//! - `gateway_auth_failures_total` - Rejected credentials (labels: reason)
//! - `gateway_jwks_refresh_total` - Key set fetches (labels: status)
//!
//! ## Histograms
//! - `gateway_upstream_duration_seconds` - Backend round-trip time (labels: service)
//!
//! # Usage
//!
//! ```rust,ignore
//! use ride_gateway::metrics::{init_metrics, record_request};
//!
//! init_metrics("0.0.0.0:9090".parse()?)?;
//! record_request("rides", "GET", "200");
//! ```
//!
//! Recording before `init_metrics` (as in tests) is a no-op.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const REQUESTS_TOTAL: &str = "gateway_requests_total";
    pub const AUTH_FAILURES_TOTAL: &str = "gateway_auth_failures_total";
    pub const JWKS_REFRESH_TOTAL: &str = "gateway_jwks_refresh_total";
    pub const UPSTREAM_DURATION_SECONDS: &str = "gateway_upstream_duration_seconds";
}

/// Initialize the Prometheus metrics exporter.
///
/// # Errors
///
/// Returns a message if the exporter cannot be installed (e.g. port in use
/// or a recorder is already set).
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::REQUESTS_TOTAL,
        "Total number of requests handled by the gateway"
    );
    describe_counter!(
        names::AUTH_FAILURES_TOTAL,
        "Total number of requests rejected by the auth gate"
    );
    describe_counter!(
        names::JWKS_REFRESH_TOTAL,
        "Total number of identity provider key set fetches"
    );
    describe_histogram!(
        names::UPSTREAM_DURATION_SECONDS,
        "Backend round-trip duration in seconds"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

/// Record one handled request and how it ended.
///
/// `outcome` is the response status code or a gateway error code.
pub fn record_request(service: &str, method: &str, outcome: &str) {
    counter!(names::REQUESTS_TOTAL, "service" => service.to_string(), "method" => method.to_string(), "outcome" => outcome.to_string())
        .increment(1);
}

/// Record a credential rejection.
pub fn record_auth_failure(reason: &str) {
    counter!(names::AUTH_FAILURES_TOTAL, "reason" => reason.to_string()).increment(1);
}

/// Record a key set fetch.
pub fn record_jwks_refresh(status: &str) {
    counter!(names::JWKS_REFRESH_TOTAL, "status" => status.to_string()).increment(1);
}

/// Record backend round-trip duration.
pub fn record_upstream_duration(service: &str, duration_secs: f64) {
    histogram!(names::UPSTREAM_DURATION_SECONDS, "service" => service.to_string())
        .record(duration_secs);
}
