//! Fuzz testing for route resolution and request translation.
//!
//! Feeds arbitrary paths, query strings, and headers through
//! `RouteTable::resolve` and `Translator::translate`, checking that they:
//!
//! - Never panic on any input
//! - Always produce a remainder starting with `/`
//! - Never let the parsed outbound URL leave the backend's base path
//! - Never let a caller-supplied identity header through
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! cargo +nightly install cargo-fuzz
//! cargo +nightly fuzz run fuzz_routing
//! cargo +nightly fuzz run fuzz_routing -- -max_total_time=60
//! ```

#![no_main]

use arbitrary::Arbitrary;
use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Uri};
use libfuzzer_sys::fuzz_target;
use reqwest::Url;
use ride_gateway::config::Config;
use ride_gateway::proxy::{InboundRequest, Translator};
use ride_gateway::routing::RouteTable;

#[derive(Debug, Arbitrary)]
struct Input<'a> {
    path: &'a str,
    query: Option<&'a str>,
    headers: Vec<(&'a [u8], &'a [u8])>,
    body: &'a [u8],
}

fuzz_target!(|input: Input<'_>| {
    // Give every backend a base path so escapes out of it are observable
    let routes = Config::default().routes.into_iter().map(|mut route| {
        route.backend_base_url =
            format!("{}/api/v1", route.backend_base_url.trim_end_matches('/'));
        route
    });
    let Ok(table) = RouteTable::new(routes) else {
        return;
    };
    let identity_header = HeaderName::from_static("x-user-id");
    let translator = Translator::new(Some(identity_header.clone()));

    let target = match input.query {
        Some(q) => format!("{}?{}", input.path, q),
        None => input.path.to_string(),
    };
    let Ok(uri) = target.parse::<Uri>() else {
        return;
    };

    let mut headers = HeaderMap::new();
    headers.insert(identity_header.clone(), HeaderValue::from_static("spoofed"));
    for (name, value) in input.headers {
        if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name), HeaderValue::from_bytes(value)) {
            headers.append(name, value);
        }
    }

    let Ok(resolved) = table.resolve(uri.path()) else {
        return;
    };
    assert!(resolved.remainder.starts_with('/'));
    let _ = resolved.requires_auth();

    let inbound = InboundRequest::new(Method::GET, &uri, headers, Bytes::copy_from_slice(input.body));
    let outbound = translator.translate(inbound, &resolved, None);

    let base = Url::parse(&resolved.route.backend_base_url).expect("validated base URL");
    let Ok(effective) = Url::parse(&outbound.url) else {
        return;
    };
    assert_eq!(effective.origin(), base.origin());
    let under_base = effective.path() == base.path()
        || effective.path().starts_with(&format!("{}/", base.path()));
    assert!(under_base, "{} escaped {}", effective.path(), base.path());
    assert!(outbound.headers.get(&identity_header).is_none());
});
