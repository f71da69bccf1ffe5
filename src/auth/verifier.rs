use std::collections::HashSet;
use std::time::Duration;

use axum::http::HeaderValue;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde_json::{Map, Value};
use tracing::debug;

use super::jwks::JwksStore;
use super::{Identity, VerifyError};

/// Where token signing keys come from.
#[derive(Clone)]
pub enum KeySource {
    /// Identity provider's published key set.
    Jwks { url: String },
    /// HMAC secret shared with the identity service.
    SharedSecret(String),
}

impl KeySource {
    /// Short label for logs (never includes the secret).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Jwks { .. } => "jwks",
            Self::SharedSecret(_) => "shared_secret",
        }
    }
}

impl std::fmt::Debug for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Jwks { url } => f.debug_struct("Jwks").field("url", url).finish(),
            Self::SharedSecret(_) => f.write_str("SharedSecret(<redacted>)"),
        }
    }
}

/// Everything the verifier needs, extracted from `Config`.
#[derive(Debug, Clone)]
pub struct VerifierSettings {
    pub source: KeySource,
    pub algorithms: Vec<Algorithm>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub leeway_secs: u64,
    pub jwks_cache_ttl: Duration,
    pub jwks_min_refresh_interval: Duration,
    pub fetch_timeout: Duration,
}

enum Keys {
    Jwks(JwksStore),
    Secret(DecodingKey),
}

/// Validates bearer JWTs and produces the caller's [`Identity`].
///
/// Verification has no side effects besides key caching, so the same token
/// verifies the same way every time until it expires.
pub struct TokenVerifier {
    keys: Keys,
    algorithms: HashSet<Algorithm>,
    validation: Validation,
}

impl TokenVerifier {
    /// Build a verifier from settings.
    ///
    /// # Errors
    ///
    /// Returns `VerifyError::Unavailable` if the JWKS HTTP client cannot be
    /// built.
    pub fn new(settings: &VerifierSettings) -> Result<Self, VerifyError> {
        let keys = match &settings.source {
            KeySource::Jwks { url } => Keys::Jwks(JwksStore::new(
                url.clone(),
                settings.jwks_cache_ttl,
                settings.jwks_min_refresh_interval,
                settings.fetch_timeout,
            )?),
            KeySource::SharedSecret(secret) => {
                Keys::Secret(DecodingKey::from_secret(secret.as_bytes()))
            }
        };

        let mut validation = Validation::default();
        validation.leeway = settings.leeway_secs;
        validation.set_required_spec_claims(&["exp", "sub"]);
        if let Some(issuer) = &settings.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &settings.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        Ok(Self {
            keys,
            algorithms: settings.algorithms.iter().copied().collect(),
            validation,
        })
    }

    /// The JWKS store, when keys come from a provider.
    pub fn jwks(&self) -> Option<&JwksStore> {
        match &self.keys {
            Keys::Jwks(store) => Some(store),
            Keys::Secret(_) => None,
        }
    }

    /// Verify a raw credential.
    ///
    /// # Errors
    ///
    /// - `VerifyError::Invalid` for malformed, expired, mis-signed, or
    ///   wrong-issuer/audience tokens
    /// - `VerifyError::Unavailable` if signing keys cannot be obtained
    pub async fn verify(&self, credential: &str) -> Result<Identity, VerifyError> {
        let header = decode_header(credential)
            .map_err(|e| VerifyError::Invalid(format!("malformed token: {e}")))?;

        if !self.algorithms.contains(&header.alg) {
            return Err(VerifyError::Invalid(format!(
                "algorithm {:?} is not accepted",
                header.alg
            )));
        }

        let key = match &self.keys {
            Keys::Jwks(store) => store.key_for(header.kid.as_deref()).await?,
            Keys::Secret(key) => key.clone(),
        };

        let mut validation = self.validation.clone();
        validation.algorithms = vec![header.alg];

        let data = decode::<Map<String, Value>>(credential, &key, &validation)
            .map_err(|e| VerifyError::Invalid(e.to_string()))?;

        let subject = match data.claims.get("sub") {
            Some(Value::String(sub)) if !sub.is_empty() => sub.clone(),
            _ => return Err(VerifyError::Invalid("sub claim must be a non-empty string".into())),
        };

        // The subject is relayed to backends as a header value
        if HeaderValue::from_str(&subject).is_err() {
            return Err(VerifyError::Invalid(
                "sub claim is not a valid header value".to_string(),
            ));
        }

        debug!(subject = %subject, kid = ?header.kid, "Token verified");

        Ok(Identity {
            subject,
            claims: data.claims,
        })
    }
}

/// Whether `alg` is an HMAC algorithm (usable with a shared secret).
pub fn is_hmac(alg: Algorithm) -> bool {
    matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::json;

    const SECRET: &str = "unit-test-secret-with-enough-entropy";

    fn settings() -> VerifierSettings {
        VerifierSettings {
            source: KeySource::SharedSecret(SECRET.to_string()),
            algorithms: vec![Algorithm::HS256],
            issuer: None,
            audience: None,
            leeway_secs: 0,
            jwks_cache_ttl: Duration::from_secs(3600),
            jwks_min_refresh_interval: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(2),
        }
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn sign(claims: &Value, alg: Algorithm, secret: &str) -> String {
        encode(
            &Header::new(alg),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn valid_claims() -> Value {
        json!({ "sub": "user-42", "exp": now() + 600, "email": "a@b.com" })
    }

    #[tokio::test]
    async fn test_valid_token_yields_identity() {
        let verifier = TokenVerifier::new(&settings()).unwrap();
        let token = sign(&valid_claims(), Algorithm::HS256, SECRET);

        let identity = verifier.verify(&token).await.unwrap();

        assert_eq!(identity.subject, "user-42");
        assert_eq!(identity.claims["email"], "a@b.com");
    }

    #[tokio::test]
    async fn test_verification_is_repeatable() {
        let verifier = TokenVerifier::new(&settings()).unwrap();
        let token = sign(&valid_claims(), Algorithm::HS256, SECRET);

        let first = verifier.verify(&token).await.unwrap();
        let second = verifier.verify(&token).await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let verifier = TokenVerifier::new(&settings()).unwrap();
        let claims = json!({ "sub": "user-42", "exp": now() - 120 });
        let token = sign(&claims, Algorithm::HS256, SECRET);

        let err = verifier.verify(&token).await.unwrap_err();
        assert!(matches!(err, VerifyError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_wrong_signature_rejected() {
        let verifier = TokenVerifier::new(&settings()).unwrap();
        let token = sign(&valid_claims(), Algorithm::HS256, "some-other-secret");

        assert!(matches!(
            verifier.verify(&token).await,
            Err(VerifyError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_token_rejected() {
        let verifier = TokenVerifier::new(&settings()).unwrap();
        for token in ["", "not-a-jwt", "a.b.c", "{\"alg\":\"none\"}"] {
            assert!(
                matches!(verifier.verify(token).await, Err(VerifyError::Invalid(_))),
                "token {token:?} should be invalid"
            );
        }
    }

    #[tokio::test]
    async fn test_disallowed_algorithm_rejected() {
        let verifier = TokenVerifier::new(&settings()).unwrap();
        let token = sign(&valid_claims(), Algorithm::HS512, SECRET);

        let err = verifier.verify(&token).await.unwrap_err();
        assert!(matches!(err, VerifyError::Invalid(msg) if msg.contains("HS512")));
    }

    #[tokio::test]
    async fn test_missing_subject_rejected() {
        let verifier = TokenVerifier::new(&settings()).unwrap();
        let token = sign(&json!({ "exp": now() + 600 }), Algorithm::HS256, SECRET);

        assert!(verifier.verify(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_non_string_subject_rejected() {
        let verifier = TokenVerifier::new(&settings()).unwrap();
        let token = sign(&json!({ "sub": 42, "exp": now() + 600 }), Algorithm::HS256, SECRET);

        assert!(verifier.verify(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_issuer_checked_when_configured() {
        let verifier = TokenVerifier::new(&VerifierSettings {
            issuer: Some("https://id.example.com".to_string()),
            ..settings()
        })
        .unwrap();

        let good = json!({ "sub": "u", "exp": now() + 600, "iss": "https://id.example.com" });
        let bad = json!({ "sub": "u", "exp": now() + 600, "iss": "https://evil.example.com" });

        assert!(verifier.verify(&sign(&good, Algorithm::HS256, SECRET)).await.is_ok());
        assert!(verifier.verify(&sign(&bad, Algorithm::HS256, SECRET)).await.is_err());
    }

    #[tokio::test]
    async fn test_audience_checked_when_configured() {
        let verifier = TokenVerifier::new(&VerifierSettings {
            audience: Some("ride-app".to_string()),
            ..settings()
        })
        .unwrap();

        let good = json!({ "sub": "u", "exp": now() + 600, "aud": "ride-app" });
        let bad = json!({ "sub": "u", "exp": now() + 600, "aud": "other-app" });

        assert!(verifier.verify(&sign(&good, Algorithm::HS256, SECRET)).await.is_ok());
        assert!(verifier.verify(&sign(&bad, Algorithm::HS256, SECRET)).await.is_err());
    }

    #[tokio::test]
    async fn test_audience_ignored_when_not_configured() {
        let verifier = TokenVerifier::new(&settings()).unwrap();
        let claims = json!({ "sub": "u", "exp": now() + 600, "aud": "anything" });

        assert!(verifier.verify(&sign(&claims, Algorithm::HS256, SECRET)).await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_jwks_is_unavailable() {
        let verifier = TokenVerifier::new(&VerifierSettings {
            source: KeySource::Jwks {
                url: "http://127.0.0.1:1/jwks.json".to_string(),
            },
            ..settings()
        })
        .unwrap();
        let token = sign(&valid_claims(), Algorithm::HS256, SECRET);

        let err = verifier.verify(&token).await.unwrap_err();
        assert!(matches!(err, VerifyError::Unavailable(_)), "got {err:?}");
    }

    #[test]
    fn test_key_source_debug_redacts_secret() {
        let debug = format!("{:?}", KeySource::SharedSecret("hunter2".to_string()));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_is_hmac() {
        assert!(is_hmac(Algorithm::HS256));
        assert!(!is_hmac(Algorithm::RS256));
        assert!(!is_hmac(Algorithm::ES256));
    }
}
