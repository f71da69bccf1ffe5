//! Catch-all proxy handler: the request pipeline.
//!
//! ```text
//! method check ─▶ resolve ─▶ auth gate ─▶ translate ─▶ forward ─▶ relay
//!      405           404        401                     502/504
//! ```
//!
//! Each stage either hands off to the next or ends the request with a
//! [`GatewayError`]. Nothing reaches a backend before routing and the auth
//! gate have both passed.

use std::time::Instant;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, Uri};
use axum::response::{IntoResponse, Response};
use tokio::time::timeout;
use tracing::{info, instrument};

use crate::auth::{Identity, extract_bearer};
use crate::error::{GatewayError, GatewayResult};
use crate::metrics;
use crate::middleware::request_id::REQUEST_ID_HEADER;
use crate::proxy::{GatewayResponse, InboundRequest};
use crate::routing::ResolvedRoute;
use crate::state::AppState;

/// Methods the gateway relays.
pub const SUPPORTED_METHODS: [Method; 5] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::PATCH,
];

/// Metrics label for requests that matched no route.
const UNROUTED: &str = "none";

/// Whether the gateway relays `method`.
pub fn is_supported_method(method: &Method) -> bool {
    SUPPORTED_METHODS.contains(method)
}

/// Proxy any request under a registered prefix to its backend.
///
/// The backend's status, headers, and body are relayed unchanged (minus
/// hop-by-hop headers). Gateway-side failures answer with an
/// [`ErrorResponse`](crate::error::ErrorResponse) body.
#[instrument(
    name = "proxy",
    skip_all,
    fields(
        request_id = headers.get(REQUEST_ID_HEADER).and_then(|v| v.to_str().ok()).unwrap_or("-"),
        method = %method,
        path = %uri.path(),
    )
)]
pub async fn proxy(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();
    let inbound = InboundRequest::new(method.clone(), &uri, headers, body);

    let (service, result) = if !is_supported_method(&method) {
        (
            UNROUTED,
            Err(GatewayError::MethodNotAllowed(method.to_string())),
        )
    } else {
        match state.routes.resolve(&inbound.path) {
            Ok(resolved) => (
                resolved.route.prefix.as_str(),
                dispatch(&state, inbound, &resolved).await,
            ),
            Err(e) => (UNROUTED, Err(e.into())),
        }
    };

    match result {
        Ok(response) => {
            metrics::record_request(service, method.as_str(), response.status.as_str());
            info!(
                service,
                status = response.status.as_u16(),
                bytes = response.body.len(),
                elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
                "Request forwarded"
            );
            response.into_response()
        }
        Err(err) => {
            metrics::record_request(service, method.as_str(), err.error_type());
            err.into_response()
        }
    }
}

/// Run the auth gate, then translate and forward.
async fn dispatch(
    state: &AppState,
    inbound: InboundRequest,
    resolved: &ResolvedRoute<'_>,
) -> GatewayResult<GatewayResponse> {
    let identity = if resolved.requires_auth() {
        Some(authenticate(state, &inbound.headers).await?)
    } else {
        None
    };

    let outbound = state
        .translator
        .translate(inbound, resolved, identity.as_ref());

    let started = Instant::now();
    let result = state.forwarder.forward(outbound).await;
    metrics::record_upstream_duration(&resolved.route.prefix, started.elapsed().as_secs_f64());

    Ok(result?)
}

/// Verify the caller's bearer credential.
///
/// # Errors
///
/// - `MissingCredential` if the `Authorization` header is absent or empty
/// - `Unauthorized` if the header is unreadable or the token is rejected
/// - `VerifierUnavailable` if the provider fails or `AUTH_TIMEOUT_SECS` elapses
async fn authenticate(state: &AppState, headers: &HeaderMap) -> GatewayResult<Identity> {
    let result = match extract_bearer(headers) {
        Err(err) => Err(GatewayError::from(err)),
        Ok(None) => Err(GatewayError::MissingCredential),
        Ok(Some(credential)) => {
            let limit = state.config.auth_timeout;
            match timeout(limit, state.verifier.verify(credential)).await {
                Ok(verified) => verified.map_err(GatewayError::from),
                Err(_) => Err(GatewayError::VerifierUnavailable(format!(
                    "verification exceeded {limit:?}"
                ))),
            }
        }
    };

    if let Err(err) = &result {
        metrics::record_auth_failure(auth_failure_reason(err));
    }

    result
}

fn auth_failure_reason(err: &GatewayError) -> &'static str {
    match err {
        GatewayError::MissingCredential => "missing_credential",
        GatewayError::VerifierUnavailable(_) => "verifier_unavailable",
        _ => "invalid_credential",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::http::{HeaderValue, StatusCode, header};

    fn state() -> AppState {
        AppState::new(Config::default()).unwrap()
    }

    async fn call(method: Method, uri: &str, headers: HeaderMap) -> Response {
        proxy(
            State(state()),
            method,
            uri.parse().unwrap(),
            headers,
            Bytes::new(),
        )
        .await
    }

    #[test]
    fn test_supported_methods() {
        assert!(is_supported_method(&Method::PATCH));
        assert!(!is_supported_method(&Method::HEAD));
        assert!(!is_supported_method(&Method::OPTIONS));
        assert!(!is_supported_method(&Method::TRACE));
    }

    #[tokio::test]
    async fn test_unknown_prefix_is_not_found() {
        let response = call(Method::GET, "/payments/1", HeaderMap::new()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unsupported_method_rejected_before_routing() {
        let response = call(Method::HEAD, "/payments/1", HeaderMap::new()).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_protected_route_without_credential() {
        let response = call(Method::GET, "/rides/42", HeaderMap::new()).await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
    }

    #[tokio::test]
    async fn test_protected_route_with_garbage_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer not.a.token"),
        );

        let response = call(Method::GET, "/rides/42", headers).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_non_ascii_credential_is_unauthorized() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_bytes(b"Bearer \xfftoken").unwrap(),
        );

        let response = call(Method::GET, "/rides/42", headers).await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: crate::error::ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(body.error, "unauthorized");
    }

    #[tokio::test]
    async fn test_dot_segment_path_is_not_found() {
        let response = call(Method::GET, "/rides/%2e%2e/admin", HeaderMap::new()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_public_subpath_skips_auth() {
        // Backend is not running, so reaching it means the gate was skipped
        let mut config = Config::default();
        for route in &mut config.routes {
            route.backend_base_url = "http://127.0.0.1:1".to_string();
        }
        let state = AppState::new(config).unwrap();

        let response = proxy(
            State(state),
            Method::POST,
            "/users/login".parse().unwrap(),
            HeaderMap::new(),
            Bytes::from_static(b"{}"),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_auth_failure_reason() {
        assert_eq!(
            auth_failure_reason(&GatewayError::MissingCredential),
            "missing_credential"
        );
        assert_eq!(
            auth_failure_reason(&GatewayError::Unauthorized("x".into())),
            "invalid_credential"
        );
        assert_eq!(
            auth_failure_reason(&GatewayError::VerifierUnavailable("x".into())),
            "verifier_unavailable"
        );
    }
}
