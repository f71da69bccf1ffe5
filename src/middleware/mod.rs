//! HTTP middleware.
//!
//! - **Request ID**: Generation and propagation of `x-request-id` so gateway
//!   and backend logs can be correlated
//!
//! Authentication is not a layer: the proxy handler decides per request,
//! after routing, whether a credential is needed.

pub mod request_id;

pub use request_id::{REQUEST_ID_HEADER, RequestId, RequestIdExt, RequestIdLayer};
