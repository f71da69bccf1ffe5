//! # Ride Gateway
//!
//! Authenticated API gateway for the ride platform. A single public entry
//! point that routes each request by its first path segment to one backend
//! service, verifying bearer tokens on the way:
//!
//! - **Routing**: Static prefix table (`/users`, `/rides`, ...) built at startup
//! - **Auth Gate**: JWT verification via JWKS or a shared HMAC secret, with
//!   per-route public sub-paths such as `/users/login`
//! - **Faithful Relay**: Status, headers, and body bytes passed through as-is
//! - **Observability**: Request IDs, structured logging, Prometheus metrics
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Middleware (Request ID → Trace → CORS → Body Limit)        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Proxy handler: RouteTable → TokenVerifier → Translator     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Forwarder (pooled reqwest client, bounded by timeout)      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Backends: users, rides, notifications, reviews, admin      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ride_gateway::{AppState, Config, build_router};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let addr = config.server_addr();
//!     let state = AppState::new(config)?;
//!     let app = build_router(state.clone());
//!
//!     let listener = tokio::net::TcpListener::bind(addr).await?;
//!     axum::serve(listener, app).await?;
//!     state.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Identity Provider
//!
//! ```bash
//! JWKS_URL=https://id.example.com/.well-known/jwks.json cargo run
//! # or, for a shared-secret identity service
//! JWT_SECRET=change-me cargo run
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod proxy;
pub mod routes;
pub mod routing;
pub mod state;
pub mod utils;

// Re-exports for convenience
pub use auth::{Identity, TokenVerifier, VerifyError};
pub use config::Config;
pub use error::{ErrorResponse, GatewayError, GatewayResult};
pub use proxy::{Forwarder, Translator};
pub use routes::build_router;
pub use routing::{Route, RouteTable};
pub use state::AppState;
