//! Shared application state for Axum handlers.
//!
//! This module provides thread-safe, clonable state that is shared across
//! all request handlers. It includes:
//!
//! - **Route Table**: Prefix to backend mapping, immutable after startup
//! - **Verifier**: Bearer token verification (JWKS cache or shared secret)
//! - **Forwarder**: Pooled HTTP client for backend calls
//! - **Configuration**: Runtime configuration access
//!
//! # Structured Concurrency
//!
//! Background tasks are managed using `tokio_util::task::TaskTracker` and
//! `CancellationToken`. Call `shutdown()` to stop them before exit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::auth::TokenVerifier;
use crate::config::Config;
use crate::error::{GatewayError, GatewayResult};
use crate::proxy::{Forwarder, Translator};
use crate::routing::RouteTable;

/// Floor for the JWKS background refresh period.
const MIN_JWKS_REFRESH_PERIOD: Duration = Duration::from_secs(1);

/// Shared application state for Axum handlers.
///
/// Cloned for each request; everything inside is behind `Arc` or cheap to
/// clone.
///
/// # Lifecycle
///
/// ```rust,ignore
/// let state = AppState::new(config)?;
/// // ... serve requests ...
/// state.shutdown().await;
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Prefix to backend mapping
    pub routes: Arc<RouteTable>,
    /// Token verifier
    pub verifier: Arc<TokenVerifier>,
    /// Inbound to outbound request translation
    pub translator: Translator,
    /// Backend HTTP client
    pub forwarder: Forwarder,
    /// Timestamp when the gateway started
    pub started_at: Instant,
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Build state from configuration.
    ///
    /// When keys come from a JWKS endpoint this spawns a task that pre-warms
    /// the key cache and refreshes it every half TTL.
    ///
    /// # Errors
    ///
    /// - `GatewayError::ConfigError` if the route table is invalid
    /// - `GatewayError::Internal` if an HTTP client cannot be built
    pub fn new(config: Config) -> GatewayResult<Self> {
        let routes = RouteTable::new(config.routes.clone())?;
        let verifier = TokenVerifier::new(&config.verifier_settings())
            .map_err(|e| GatewayError::Internal(e.to_string()))?;
        let forwarder = Forwarder::new(config.upstream_timeout, config.upstream_connect_timeout)
            .map_err(|e| GatewayError::Internal(e.to_string()))?;
        let translator = Translator::new(config.identity_header.clone());

        let state = Self {
            config: Arc::new(config),
            routes: Arc::new(routes),
            verifier: Arc::new(verifier),
            translator,
            forwarder,
            started_at: Instant::now(),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        state.spawn_jwks_refresh_task();

        Ok(state)
    }

    /// Keep the provider key set warm so requests rarely wait on a fetch.
    fn spawn_jwks_refresh_task(&self) {
        if self.verifier.jwks().is_none() {
            return;
        }

        let verifier = self.verifier.clone();
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let Some(store) = verifier.jwks() else {
                return;
            };

            let period = (store.ttl() / 2).max(MIN_JWKS_REFRESH_PERIOD);
            let mut ticker = interval(period);

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("JWKS refresh task received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = store.refresh().await {
                            warn!(url = %store.url(), error = %e, "Background JWKS refresh failed");
                        }
                    }
                }
            }

            debug!("JWKS refresh task shutting down");
        });
    }

    /// Gracefully shutdown all background tasks.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }

    /// Get the gateway uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
