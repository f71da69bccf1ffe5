//! Response bodies produced by the gateway itself.
//!
//! Proxied responses are relayed byte-for-byte and have no model here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Liveness response for `GET /healthz`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the process is serving
    pub status: String,
    /// Gateway version
    pub version: String,
    /// Current timestamp
    pub timestamp: DateTime<Utc>,
    /// Seconds since startup
    pub uptime_seconds: u64,
    /// Configured routes, sorted by prefix
    pub routes: Vec<RouteInfo>,
}

/// Public view of one route; backend URLs are not exposed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteInfo {
    pub prefix: String,
    pub requires_auth: bool,
    /// Sub-paths that skip auth, sorted
    pub public_paths: Vec<String>,
}
