use axum::http::StatusCode;
use axum::http::header::WWW_AUTHENTICATE;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::VerifyError;
use crate::proxy::ForwardError;
use crate::routing::RouteError;

/// Value of the `WWW-Authenticate` challenge sent with every 401.
pub const BEARER_CHALLENGE: &str = r#"Bearer realm="gateway""#;

/// Gateway-wide error types with their HTTP status mapping.
///
/// Every variant is terminal for the request that produced it. The
/// `Display` text carries the underlying cause and is only ever logged;
/// callers receive the sanitized [`ErrorResponse`] body instead.
///
/// # Auth Errors
///
/// The three auth variants are kept apart so logs and metrics can tell
/// them apart, but all of them answer with 401:
///
/// - `MissingCredential` - no bearer token on a protected route
/// - `Unauthorized` - token present but rejected (signature, expiry, claims)
/// - `VerifierUnavailable` - identity provider could not be consulted
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("No route for path: {0}")]
    RouteNotFound(String),

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("Missing bearer credential")]
    MissingCredential,

    #[error("Credential rejected: {0}")]
    Unauthorized(String),

    #[error("Identity provider unavailable: {0}")]
    VerifierUnavailable(String),

    #[error("Upstream request failed: {0}")]
    Upstream(#[from] ForwardError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// HTTP status returned to the caller.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RouteNotFound(_) => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::MissingCredential | Self::Unauthorized(_) | Self::VerifierUnavailable(_) => {
                StatusCode::UNAUTHORIZED
            }
            Self::Upstream(ForwardError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::ConfigError(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error code placed in the response body.
    ///
    /// Rejected and unverifiable credentials share a code so callers cannot
    /// learn the identity provider's health through the gateway.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::RouteNotFound(_) => "route_not_found",
            Self::MethodNotAllowed(_) => "method_not_allowed",
            Self::MissingCredential => "missing_credential",
            Self::Unauthorized(_) | Self::VerifierUnavailable(_) => "unauthorized",
            Self::Upstream(ForwardError::Timeout(_)) => "upstream_timeout",
            Self::Upstream(_) => "upstream_unavailable",
            Self::ConfigError(_) => "config_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Short human-readable reason, safe to show to any caller.
    fn public_message(&self) -> &'static str {
        match self {
            Self::RouteNotFound(_) => "No service is registered for this path.",
            Self::MethodNotAllowed(_) => "HTTP method is not supported by the gateway.",
            Self::MissingCredential => "A bearer token is required for this resource.",
            Self::Unauthorized(_) | Self::VerifierUnavailable(_) => {
                "The provided credential could not be verified."
            }
            Self::Upstream(ForwardError::Timeout(_)) => {
                "The upstream service did not respond in time. Please try again."
            }
            Self::Upstream(_) => "The upstream service is unavailable. Please try again later.",
            Self::ConfigError(_) => "Service configuration error. Please contact support.",
            Self::Internal(_) => {
                "An internal error occurred. Please contact support if the issue persists."
            }
        }
    }
}

impl From<VerifyError> for GatewayError {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::Invalid(reason) => Self::Unauthorized(reason),
            VerifyError::Unavailable(reason) => Self::VerifierUnavailable(reason),
        }
    }
}

impl From<RouteError> for GatewayError {
    fn from(err: RouteError) -> Self {
        match err {
            RouteError::NotFound(path) => Self::RouteNotFound(path),
            RouteError::Invalid(reason) => Self::ConfigError(reason),
        }
    }
}

/// Error body for every gateway-synthesized response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Full cause stays server-side
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "Request failed");
        } else {
            tracing::warn!(error = %self, status = status.as_u16(), "Request rejected");
        }

        let body = ErrorResponse {
            error: self.error_type().to_string(),
            message: self.public_message().to_string(),
        };

        if status == StatusCode::UNAUTHORIZED {
            return (status, [(WWW_AUTHENTICATE, BEARER_CHALLENGE)], axum::Json(body))
                .into_response();
        }

        (status, axum::Json(body)).into_response()
    }
}

/// Convenience type alias for Results with GatewayError.
pub type GatewayResult<T> = Result<T, GatewayError>;
