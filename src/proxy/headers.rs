//! Hop-by-hop header handling, shared by both proxy directions.
//!
//! The same deny list is applied to the outbound request and to the backend
//! response, so what crosses the gateway can be audited in one place.

use axum::http::header::{self, HeaderMap, HeaderName};

/// Headers that only describe a single network leg and are never relayed.
///
/// `host` is regenerated from the target URL and `content-length` from the
/// actual body, so both are dropped alongside the RFC 9110 connection
/// headers.
pub const HOP_BY_HOP_HEADERS: [HeaderName; 10] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::HOST,
    header::CONTENT_LENGTH,
];

/// Check if a header is on the fixed hop-by-hop list.
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(name)
}

/// Header names the sender listed in `Connection` (RFC 9110 §7.6.1).
fn connection_listed(headers: &HeaderMap) -> Vec<HeaderName> {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect()
}

/// Copy `headers`, dropping hop-by-hop entries.
///
/// Repeated headers keep every value in their original order.
pub fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let listed = connection_listed(headers);
    let mut filtered = HeaderMap::with_capacity(headers.len());

    for (name, value) in headers {
        if is_hop_by_hop(name) || listed.contains(name) {
            continue;
        }
        filtered.append(name.clone(), value.clone());
    }

    filtered
}
