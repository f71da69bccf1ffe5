//! Cached JSON Web Key Set (RFC 7517) fetched from the identity provider.
//!
//! # Caching
//!
//! - Keys live for `ttl`, after which the next lookup re-fetches.
//! - A token whose `kid` is unknown forces a re-fetch, but at most once per
//!   `min_refresh_interval`, so garbage `kid`s cannot hammer the provider.
//! - If a re-fetch fails, keys from the last good fetch keep serving.
//!
//! Concurrent re-fetches are coalesced behind a mutex; waiters reuse the
//! fresh set instead of fetching again.

use std::time::{Duration, Instant};

use jsonwebtoken::DecodingKey;
use jsonwebtoken::jwk::JwkSet;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::VerifyError;
use crate::metrics;

#[derive(Clone)]
struct CachedKey {
    kid: Option<String>,
    key: DecodingKey,
}

#[derive(Clone)]
struct KeySet {
    keys: Vec<CachedKey>,
    fetched_at: Instant,
}

impl KeySet {
    fn find(&self, kid: Option<&str>) -> Option<DecodingKey> {
        match kid {
            Some(kid) => self
                .keys
                .iter()
                .find(|k| k.kid.as_deref() == Some(kid))
                .map(|k| k.key.clone()),
            // Without a kid the choice is only unambiguous for a single key
            None if self.keys.len() == 1 => self.keys.first().map(|k| k.key.clone()),
            None => None,
        }
    }

    fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }
}

/// Provider key set with in-memory caching.
pub struct JwksStore {
    url: String,
    http: reqwest::Client,
    ttl: Duration,
    min_refresh_interval: Duration,
    keys: RwLock<Option<KeySet>>,
    refresh_lock: Mutex<()>,
}

impl std::fmt::Debug for JwksStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwksStore")
            .field("url", &self.url)
            .field("ttl", &self.ttl)
            .field("min_refresh_interval", &self.min_refresh_interval)
            .finish_non_exhaustive()
    }
}

impl JwksStore {
    /// Create an empty store; keys are fetched on first use.
    ///
    /// `fetch_timeout` bounds each HTTP fetch of the key set.
    ///
    /// # Errors
    ///
    /// Returns `VerifyError::Unavailable` if the HTTP client cannot be built.
    pub fn new(
        url: impl Into<String>,
        ttl: Duration,
        min_refresh_interval: Duration,
        fetch_timeout: Duration,
    ) -> Result<Self, VerifyError> {
        let http = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .build()
            .map_err(|e| VerifyError::Unavailable(format!("failed to build JWKS client: {e}")))?;

        Ok(Self {
            url: url.into(),
            http,
            ttl,
            min_refresh_interval,
            keys: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Find the decoding key for a token's `kid`.
    ///
    /// # Errors
    ///
    /// - `VerifyError::Invalid` if the provider has no matching key
    /// - `VerifyError::Unavailable` if the key set cannot be fetched and no
    ///   previously fetched key matches
    pub async fn key_for(&self, kid: Option<&str>) -> Result<DecodingKey, VerifyError> {
        let cached = self.keys.read().await.clone();

        if let Some(set) = &cached
            && set.age() < self.ttl
        {
            if let Some(key) = set.find(kid) {
                return Ok(key);
            }
            if set.age() < self.min_refresh_interval {
                return Err(unknown_key(kid));
            }
        }

        match self.refresh_if_older_than(self.min_refresh_interval).await {
            Ok(set) => set.find(kid).ok_or_else(|| unknown_key(kid)),
            Err(err) => {
                // Stale keys are better than rejecting every caller
                if let Some(key) = cached.as_ref().and_then(|set| set.find(kid)) {
                    warn!(error = %err, "JWKS refresh failed, serving cached key");
                    return Ok(key);
                }
                Err(err)
            }
        }
    }

    /// Unconditionally re-fetch the key set.
    ///
    /// Returns the number of usable keys.
    ///
    /// # Errors
    ///
    /// Returns `VerifyError::Unavailable` if the fetch fails; cached keys
    /// are kept in that case.
    pub async fn refresh(&self) -> Result<usize, VerifyError> {
        self.refresh_if_older_than(Duration::ZERO)
            .await
            .map(|set| set.keys.len())
    }

    async fn refresh_if_older_than(&self, min_age: Duration) -> Result<KeySet, VerifyError> {
        let _guard = self.refresh_lock.lock().await;

        // Another task may have refreshed while we waited for the lock
        if !min_age.is_zero()
            && let Some(set) = self.keys.read().await.as_ref()
            && set.age() < min_age
        {
            return Ok(set.clone());
        }

        match self.fetch().await {
            Ok(set) => {
                info!(url = %self.url, keys = set.keys.len(), "JWKS refreshed");
                metrics::record_jwks_refresh("success");
                *self.keys.write().await = Some(set.clone());
                Ok(set)
            }
            Err(err) => {
                metrics::record_jwks_refresh("failure");
                Err(err)
            }
        }
    }

    async fn fetch(&self) -> Result<KeySet, VerifyError> {
        debug!(url = %self.url, "Fetching JWKS");

        let jwks: JwkSet = self
            .http
            .get(&self.url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| VerifyError::Unavailable(format!("JWKS request failed: {e}")))?
            .json()
            .await
            .map_err(|e| VerifyError::Unavailable(format!("JWKS body invalid: {e}")))?;

        let keys: Vec<CachedKey> = jwks
            .keys
            .iter()
            .filter_map(|jwk| match DecodingKey::from_jwk(jwk) {
                Ok(key) => Some(CachedKey {
                    kid: jwk.common.key_id.clone(),
                    key,
                }),
                Err(e) => {
                    warn!(kid = ?jwk.common.key_id, error = %e, "Skipping unusable JWK");
                    None
                }
            })
            .collect();

        if keys.is_empty() {
            return Err(VerifyError::Unavailable(
                "JWKS contains no usable keys".to_string(),
            ));
        }

        Ok(KeySet {
            keys,
            fetched_at: Instant::now(),
        })
    }
}

fn unknown_key(kid: Option<&str>) -> VerifyError {
    match kid {
        Some(kid) => VerifyError::Invalid(format!("no signing key with kid '{kid}'")),
        None => VerifyError::Invalid("token has no kid and key set is ambiguous".to_string()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use axum::Router;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use serde_json::{Value, json};
    use tokio::net::TcpListener;

    /// Identity provider whose key set can be rotated or taken down.
    #[derive(Clone)]
    struct Provider {
        hits: Arc<AtomicUsize>,
        failing: Arc<AtomicBool>,
        jwks: Arc<std::sync::Mutex<Value>>,
    }

    impl Provider {
        async fn start(kids: &[&str]) -> (Self, String) {
            let provider = Self {
                hits: Arc::default(),
                failing: Arc::default(),
                jwks: Arc::new(std::sync::Mutex::new(oct_jwks(kids))),
            };
            let app = Router::new()
                .route("/jwks", get(serve_jwks))
                .with_state(provider.clone());

            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });

            (provider, format!("http://{addr}/jwks"))
        }

        fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }

        fn rotate(&self, kids: &[&str]) {
            *self.jwks.lock().unwrap() = oct_jwks(kids);
        }

        fn go_down(&self) {
            self.failing.store(true, Ordering::SeqCst);
        }
    }

    async fn serve_jwks(State(provider): State<Provider>) -> Response {
        provider.hits.fetch_add(1, Ordering::SeqCst);
        if provider.failing.load(Ordering::SeqCst) {
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        let body = provider.jwks.lock().unwrap().clone();
        axum::Json(body).into_response()
    }

    fn oct_jwks(kids: &[&str]) -> Value {
        let keys: Vec<Value> = kids
            .iter()
            .map(|kid| {
                json!({
                    "kty": "oct",
                    "kid": kid,
                    "alg": "HS256",
                    // base64url("jwks-unit-test-secret")
                    "k": "andrcy11bml0LXRlc3Qtc2VjcmV0",
                })
            })
            .collect();
        json!({ "keys": keys })
    }

    fn store(url: &str, ttl: Duration, min_refresh_interval: Duration) -> JwksStore {
        JwksStore::new(url, ttl, min_refresh_interval, Duration::from_secs(2)).unwrap()
    }

    fn key_set(kids: &[Option<&str>]) -> KeySet {
        KeySet {
            keys: kids
                .iter()
                .map(|kid| CachedKey {
                    kid: kid.map(str::to_string),
                    key: DecodingKey::from_secret(b"secret"),
                })
                .collect(),
            fetched_at: Instant::now(),
        }
    }

    #[test]
    fn test_find_by_kid() {
        let set = key_set(&[Some("a"), Some("b")]);
        assert!(set.find(Some("b")).is_some());
        assert!(set.find(Some("c")).is_none());
    }

    #[test]
    fn test_find_without_kid_requires_single_key() {
        assert!(key_set(&[Some("only")]).find(None).is_some());
        assert!(key_set(&[Some("a"), Some("b")]).find(None).is_none());
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_unavailable() {
        let store = JwksStore::new(
            "http://127.0.0.1:1/.well-known/jwks.json",
            Duration::from_secs(60),
            Duration::from_secs(1),
            Duration::from_secs(2),
        )
        .unwrap();

        let err = store.key_for(Some("kid")).await.err().unwrap();
        assert!(matches!(err, VerifyError::Unavailable(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_known_kid_served_from_cache() {
        let (provider, url) = Provider::start(&["k1"]).await;
        let store = store(&url, Duration::from_secs(60), Duration::from_secs(30));

        assert!(store.key_for(Some("k1")).await.is_ok());
        assert!(store.key_for(Some("k1")).await.is_ok());

        assert_eq!(provider.hits(), 1);
    }

    #[tokio::test]
    async fn test_unknown_kid_refetch_is_throttled() {
        let (provider, url) = Provider::start(&["k1"]).await;
        let store = store(&url, Duration::from_secs(60), Duration::from_secs(30));
        assert!(store.key_for(Some("k1")).await.is_ok());

        for kid in ["nope", "garbage", "nope"] {
            let err = store.key_for(Some(kid)).await.err().unwrap();
            assert!(matches!(err, VerifyError::Invalid(_)), "got {err:?}");
        }

        assert_eq!(provider.hits(), 1);
    }

    #[tokio::test]
    async fn test_rotated_key_picked_up_after_interval() {
        let (provider, url) = Provider::start(&["k1"]).await;
        let store = store(&url, Duration::from_secs(60), Duration::from_millis(200));
        assert!(store.key_for(Some("k1")).await.is_ok());

        provider.rotate(&["k1", "k2"]);
        assert!(store.key_for(Some("k2")).await.is_err());
        assert_eq!(provider.hits(), 1);

        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(store.key_for(Some("k2")).await.is_ok());
        assert_eq!(provider.hits(), 2);
    }

    #[tokio::test]
    async fn test_stale_keys_served_when_refresh_fails() {
        let (provider, url) = Provider::start(&["k1"]).await;
        let store = store(&url, Duration::from_millis(100), Duration::from_millis(50));
        assert!(store.key_for(Some("k1")).await.is_ok());

        provider.go_down();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(store.key_for(Some("k1")).await.is_ok());
        assert_eq!(provider.hits(), 2);

        // A kid that was never fetched cannot be served stale
        let err = store.key_for(Some("k9")).await.err().unwrap();
        assert!(matches!(err, VerifyError::Unavailable(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_refresh_counts_usable_keys() {
        let (provider, url) = Provider::start(&["k1", "k2"]).await;
        let store = store(&url, Duration::from_secs(60), Duration::from_secs(30));

        assert_eq!(store.refresh().await.unwrap(), 2);
        assert_eq!(store.refresh().await.unwrap(), 2);
        assert_eq!(provider.hits(), 2);
    }

    #[tokio::test]
    async fn test_refresh_failure_is_unavailable() {
        let store = JwksStore::new(
            "http://127.0.0.1:1/jwks",
            Duration::from_secs(60),
            Duration::from_secs(1),
            Duration::from_secs(2),
        )
        .unwrap();

        assert!(matches!(
            store.refresh().await,
            Err(VerifyError::Unavailable(_))
        ));
    }
}
