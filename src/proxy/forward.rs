//! Backend forwarding over a pooled `reqwest` client.
//!
//! # Timeouts
//!
//! One deadline covers connect, send, and reading the full response body.
//! A separate, shorter connect timeout fails fast on dead hosts.
//!
//! # Redirects
//!
//! Redirects are followed only while they stay on the origin of the first
//! URL (scheme, host and port). A redirect anywhere else is not followed,
//! and the 3xx is relayed to the caller, so the injected identity and
//! request id never reach another origin.
//!
//! # Cancellation
//!
//! `forward` is an ordinary future. When a caller disconnects, axum drops
//! the handler future, which drops the in-flight `reqwest` call and
//! abandons the backend request.

use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use reqwest::Url;
use reqwest::redirect::Policy;
use thiserror::Error;
use tracing::debug;

use super::headers::strip_hop_by_hop;
use super::translate::OutboundRequest;

/// Maximum redirects followed on behalf of the caller.
pub const MAX_REDIRECTS: usize = 10;

/// Failures that leave the gateway without a usable backend response.
///
/// Each variant carries the low-level cause for logging.
#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("upstream timed out: {0}")]
    Timeout(String),

    #[error("upstream connection failed: {0}")]
    Connect(String),

    #[error("upstream body error: {0}")]
    Body(String),

    #[error("upstream request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for ForwardError {
    fn from(err: reqwest::Error) -> Self {
        let cause = err.to_string();
        if err.is_timeout() {
            Self::Timeout(cause)
        } else if err.is_connect() {
            Self::Connect(cause)
        } else if err.is_body() || err.is_decode() {
            Self::Body(cause)
        } else {
            Self::Request(cause)
        }
    }
}

/// A response relayed to the original caller.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl GatewayResponse {
    pub fn content_type(&self) -> Option<&HeaderValue> {
        self.headers.get(CONTENT_TYPE)
    }
}

impl IntoResponse for GatewayResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Sends outbound requests to backends.
///
/// Cheap to clone; all clones share one connection pool.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    timeout: Duration,
}

impl Forwarder {
    /// Build a forwarder with a whole-request `timeout`.
    ///
    /// `connect_timeout` is clamped to `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `ForwardError::Request` if the HTTP client cannot be built
    /// (e.g. TLS backend initialization failure).
    pub fn new(timeout: Duration, connect_timeout: Duration) -> Result<Self, ForwardError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout.min(timeout))
            .redirect(same_origin_policy())
            .build()
            .map_err(|e| ForwardError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send `request` once and collect the backend's full response.
    ///
    /// Any status code the backend returns, including 4xx/5xx, is a
    /// successful forward.
    ///
    /// # Errors
    ///
    /// Returns `ForwardError` if no complete response was received.
    pub async fn forward(&self, request: OutboundRequest) -> Result<GatewayResponse, ForwardError> {
        let OutboundRequest {
            method,
            url,
            headers,
            body,
        } = request;

        debug!(%method, %url, body_len = body.len(), "Forwarding request upstream");

        let response = self
            .client
            .request(method, url)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let headers = strip_hop_by_hop(response.headers());
        let body = response.bytes().await?;

        Ok(GatewayResponse {
            status,
            headers,
            body,
        })
    }
}

fn same_origin_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() > MAX_REDIRECTS {
            return attempt.error("too many redirects");
        }
        let on_origin = attempt
            .previous()
            .first()
            .is_some_and(|first| same_origin(first, attempt.url()));
        if on_origin {
            attempt.follow()
        } else {
            debug!(location = %attempt.url(), "Not following cross-origin redirect");
            attempt.stop()
        }
    })
}

/// Whether two URLs share scheme, host, and (effective) port.
pub fn same_origin(a: &Url, b: &Url) -> bool {
    a.origin() == b.origin()
}
