//! Inbound → outbound request translation.
//!
//! Translation is synchronous and infallible: the body is carried as the
//! exact bytes received, and nothing about the payload is inspected.

use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Uri};

use super::headers::strip_hop_by_hop;
use crate::auth::Identity;
use crate::routing::ResolvedRoute;

/// A request as received by the gateway.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl InboundRequest {
    /// Assemble from the pieces axum extracts.
    pub fn new(method: Method, uri: &Uri, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            method,
            path: uri.path().to_string(),
            query: uri.query().map(str::to_string),
            headers,
            body,
        }
    }
}

/// The request the gateway will send to a backend.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Builds outbound requests, injecting the caller identity when known.
#[derive(Debug, Clone, Default)]
pub struct Translator {
    identity_header: Option<HeaderName>,
}

impl Translator {
    /// Create a translator.
    ///
    /// `identity_header` names the header that carries the verified subject
    /// to backends; `None` disables injection.
    pub fn new(identity_header: Option<HeaderName>) -> Self {
        Self { identity_header }
    }

    pub fn identity_header(&self) -> Option<&HeaderName> {
        self.identity_header.as_ref()
    }

    /// Translate an inbound request for the resolved route.
    pub fn translate(
        &self,
        inbound: InboundRequest,
        resolved: &ResolvedRoute<'_>,
        identity: Option<&Identity>,
    ) -> OutboundRequest {
        let route = resolved.route;
        let path = if route.strip_prefix {
            resolved.remainder.as_str()
        } else {
            inbound.path.as_str()
        };

        let mut url = format!("{}{}", route.backend_base_url, path);
        if let Some(query) = inbound.query.as_deref() {
            url.push('?');
            url.push_str(query);
        }

        let mut headers = strip_hop_by_hop(&inbound.headers);

        if let Some(name) = &self.identity_header {
            // Only the gateway may assert identity
            headers.remove(name);

            if let Some(identity) = identity
                && let Ok(value) = HeaderValue::from_str(&identity.subject)
            {
                headers.insert(name.clone(), value);
            }
        }

        OutboundRequest {
            method: inbound.method,
            url,
            headers,
            body: inbound.body,
        }
    }
}
