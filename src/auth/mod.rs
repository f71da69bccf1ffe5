//! Bearer token verification.
//!
//! # Flow
//!
//! ```text
//! Authorization: Bearer <jwt>
//!        │ extract_bearer
//!        ▼
//!  TokenVerifier::verify ──▶ KeySource (JWKS cache | shared secret)
//!        │
//!        ▼
//!  Identity { subject, claims }  or  VerifyError
//! ```
//!
//! # Error Policy
//!
//! A credential that fails any check (signature, expiry, issuer, audience,
//! algorithm, shape) is `VerifyError::Invalid`. A provider that cannot be
//! reached is `VerifyError::Unavailable`. Both reject the request; neither
//! lets it through.

pub mod jwks;
pub mod verifier;

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use serde_json::{Map, Value};
use thiserror::Error;

pub use jwks::JwksStore;
pub use verifier::{KeySource, TokenVerifier, VerifierSettings};

/// Scheme prefix stripped from the `Authorization` value (case-sensitive).
pub const BEARER_PREFIX: &str = "Bearer ";

/// Verified caller identity, valid for the lifetime of one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    /// The token's `sub` claim.
    pub subject: String,
    /// Every claim in the token payload.
    pub claims: Map<String, Value>,
}

/// Verification failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("invalid credential: {0}")]
    Invalid(String),

    #[error("verifier unavailable: {0}")]
    Unavailable(String),
}

/// Extract the raw credential from the `Authorization` header.
///
/// A leading `Bearer ` is stripped; any other value is taken verbatim as
/// the credential. Returns `Ok(None)` when the header is absent or empty.
///
/// # Errors
///
/// Returns `VerifyError::Invalid` when the header is present but not
/// visible ASCII; such a value can never be a token.
pub fn extract_bearer(headers: &HeaderMap) -> Result<Option<&str>, VerifyError> {
    let Some(raw) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let value = raw
        .to_str()
        .map_err(|_| VerifyError::Invalid("authorization header is not ASCII".to_string()))?;
    let credential = value.strip_prefix(BEARER_PREFIX).unwrap_or(value).trim();
    Ok((!credential.is_empty()).then_some(credential))
}
