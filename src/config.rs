//! Gateway configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with sensible
//! defaults for development. In production, configure via environment
//! variables or a `.env` file. Configuration is read once at startup and is
//! immutable afterwards.
//!
//! # Backend Services
//!
//! Each service in [`SERVICE_CATALOGUE`] reads four variables named after
//! its stem, e.g. for `users` (stem `USER_SERVICE`):
//!
//! - `USER_SERVICE_URL`: backend base URL (default: `http://localhost:8001`)
//! - `USER_SERVICE_REQUIRE_AUTH`: `true`/`false` (default: `true`)
//! - `USER_SERVICE_PUBLIC_PATHS`: comma-separated sub-paths exempt from auth
//! - `USER_SERVICE_STRIP_PREFIX`: forward `/42` instead of `/users/42`
//!
//! # Identity Provider
//!
//! Exactly one key source must be configured:
//!
//! - `JWKS_URL`: provider's JSON Web Key Set endpoint (RS256 by default)
//! - `JWT_SECRET`: HMAC secret shared with the identity service (HS256)
//!
//! Optional claim checks: `JWT_ISSUER`, `JWT_AUDIENCE`.
//!
//! # Timeouts
//!
//! - `UPSTREAM_TIMEOUT_SECS`: whole backend call (default: 10)
//! - `UPSTREAM_CONNECT_TIMEOUT_SECS`: TCP/TLS connect (default: 5)
//! - `AUTH_TIMEOUT_SECS`: token verification incl. key fetch (default: 5)

use std::env;
use std::str::FromStr;
use std::time::Duration;

use axum::http::HeaderName;
use jsonwebtoken::Algorithm;

use crate::auth::verifier::is_hmac;
use crate::auth::{KeySource, VerifierSettings};
use crate::error::{GatewayError, GatewayResult};
use crate::middleware::request_id::REQUEST_ID_HEADER;
use crate::proxy::is_hop_by_hop;
use crate::routing::{Route, RouteTable};

/// A backend service known to the gateway.
#[derive(Debug, Clone, Copy)]
pub struct ServiceSpec {
    /// Path prefix (first segment).
    pub prefix: &'static str,
    /// Environment variable stem.
    pub env_stem: &'static str,
    /// Base URL used when `<STEM>_URL` is unset.
    pub default_url: &'static str,
    /// Sub-paths reachable without a credential by default.
    pub public_paths: &'static [&'static str],
}

/// Services routed by the gateway.
///
/// `users` owns identity, so its `login` and `signup` endpoints are public.
pub const SERVICE_CATALOGUE: [ServiceSpec; 5] = [
    ServiceSpec {
        prefix: "users",
        env_stem: "USER_SERVICE",
        default_url: "http://localhost:8001",
        public_paths: &["login", "signup"],
    },
    ServiceSpec {
        prefix: "rides",
        env_stem: "RIDE_SERVICE",
        default_url: "http://localhost:8002",
        public_paths: &[],
    },
    ServiceSpec {
        prefix: "notifications",
        env_stem: "NOTIFICATION_SERVICE",
        default_url: "http://localhost:8003",
        public_paths: &[],
    },
    ServiceSpec {
        prefix: "reviews",
        env_stem: "REVIEW_SERVICE",
        default_url: "http://localhost:8004",
        public_paths: &[],
    },
    ServiceSpec {
        prefix: "admin",
        env_stem: "ADMIN_SERVICE",
        default_url: "http://localhost:8005",
        public_paths: &[],
    },
];

/// Default header carrying the verified subject to backends.
pub const DEFAULT_IDENTITY_HEADER: &str = "x-user-id";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}' (expected text or json)")),
        }
    }
}

/// Gateway configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Gateway will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 8000)
    pub port: u16,

    /// Maximum inbound request body size in bytes (default: 10MB)
    pub max_request_body_size: usize,

    // =========================================================================
    // Routing Configuration
    // =========================================================================
    /// One route per backend service
    pub routes: Vec<Route>,

    /// Timeout for a whole backend call, connect through body (default: 10s)
    pub upstream_timeout: Duration,

    /// Timeout for establishing a backend connection (default: 5s)
    pub upstream_connect_timeout: Duration,

    /// Header carrying the verified subject to backends (None = disabled)
    pub identity_header: Option<HeaderName>,

    // =========================================================================
    // Authentication Configuration
    // =========================================================================
    /// Source of token signing keys
    pub key_source: KeySource,

    /// Accepted token signing algorithms
    pub jwt_algorithms: Vec<Algorithm>,

    /// Required `iss` claim, if any
    pub jwt_issuer: Option<String>,

    /// Required `aud` claim, if any
    pub jwt_audience: Option<String>,

    /// Clock skew tolerance for `exp`/`nbf` in seconds (default: 60)
    pub jwt_leeway_secs: u64,

    /// Upper bound on token verification, including key fetches (default: 5s)
    pub auth_timeout: Duration,

    /// How long fetched JWKS keys are trusted (default: 1h)
    pub jwks_cache_ttl: Duration,

    /// Minimum spacing of unknown-`kid` re-fetches (default: 30s)
    pub jwks_min_refresh_interval: Duration,

    // =========================================================================
    // Security Configuration
    // =========================================================================
    /// Comma-separated list of allowed CORS origins
    /// Use "*" to allow all origins (not recommended for production)
    pub cors_allowed_origins: Vec<String>,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,

    /// Log output format (default: text)
    pub log_format: LogFormat,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::ConfigError` if any value is unparseable or
    /// the combination is inconsistent (see [`Config::validate`]).
    pub fn from_env() -> GatewayResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let key_source = Self::parse_key_source()?;
        let default_algorithms = if matches!(key_source, KeySource::SharedSecret(_)) {
            "HS256"
        } else {
            "RS256"
        };

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 8000)?,
            max_request_body_size: Self::parse_env("MAX_REQUEST_BODY_SIZE", 10 * 1024 * 1024)?, // 10MB

            // Routing
            routes: Self::parse_routes()?,
            upstream_timeout: Duration::from_secs(Self::parse_env("UPSTREAM_TIMEOUT_SECS", 10)?),
            upstream_connect_timeout: Duration::from_secs(Self::parse_env(
                "UPSTREAM_CONNECT_TIMEOUT_SECS",
                5,
            )?),
            identity_header: parse_identity_header(
                &env::var("IDENTITY_HEADER").unwrap_or_else(|_| DEFAULT_IDENTITY_HEADER.to_string()),
            )?,

            // Authentication
            key_source,
            jwt_algorithms: parse_algorithms(
                &env::var("JWT_ALGORITHMS").unwrap_or_else(|_| default_algorithms.to_string()),
            )?,
            jwt_issuer: non_empty_env("JWT_ISSUER"),
            jwt_audience: non_empty_env("JWT_AUDIENCE"),
            jwt_leeway_secs: Self::parse_env("JWT_LEEWAY_SECS", 60)?,
            auth_timeout: Duration::from_secs(Self::parse_env("AUTH_TIMEOUT_SECS", 5)?),
            jwks_cache_ttl: Duration::from_secs(Self::parse_env("JWKS_CACHE_TTL_SECS", 3600)?),
            jwks_min_refresh_interval: Duration::from_secs(Self::parse_env(
                "JWKS_MIN_REFRESH_INTERVAL_SECS",
                30,
            )?),

            // Security
            cors_allowed_origins: parse_list(
                &env::var("CORS_ALLOWED_ORIGINS").unwrap_or_else(|_| "*".to_string()),
            ),

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_format: Self::parse_env("LOG_FORMAT", LogFormat::Text)?,
            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::ConfigError` if validation fails.
    pub fn validate(&self) -> GatewayResult<()> {
        if self.upstream_timeout.is_zero() {
            return Err(GatewayError::ConfigError(
                "UPSTREAM_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }

        if self.upstream_connect_timeout.is_zero()
            || self.upstream_connect_timeout > self.upstream_timeout
        {
            return Err(GatewayError::ConfigError(format!(
                "UPSTREAM_CONNECT_TIMEOUT_SECS ({:?}) must be > 0 and <= UPSTREAM_TIMEOUT_SECS ({:?})",
                self.upstream_connect_timeout, self.upstream_timeout
            )));
        }

        if self.auth_timeout.is_zero() {
            return Err(GatewayError::ConfigError(
                "AUTH_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }

        if self.max_request_body_size == 0 {
            return Err(GatewayError::ConfigError(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        if self.jwt_algorithms.is_empty() {
            return Err(GatewayError::ConfigError(
                "JWT_ALGORITHMS must list at least one algorithm".to_string(),
            ));
        }

        match &self.key_source {
            KeySource::SharedSecret(secret) => {
                if secret.is_empty() {
                    return Err(GatewayError::ConfigError(
                        "JWT_SECRET must not be empty".to_string(),
                    ));
                }
                if let Some(alg) = self.jwt_algorithms.iter().find(|a| !is_hmac(**a)) {
                    return Err(GatewayError::ConfigError(format!(
                        "JWT_ALGORITHMS contains {alg:?}, which cannot be used with JWT_SECRET"
                    )));
                }
            }
            KeySource::Jwks { url } => {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(GatewayError::ConfigError(format!(
                        "JWKS_URL must be an http(s) URL, got '{url}'"
                    )));
                }
                if self.jwks_min_refresh_interval > self.jwks_cache_ttl {
                    return Err(GatewayError::ConfigError(format!(
                        "JWKS_MIN_REFRESH_INTERVAL_SECS ({:?}) must be <= JWKS_CACHE_TTL_SECS ({:?})",
                        self.jwks_min_refresh_interval, self.jwks_cache_ttl
                    )));
                }
            }
        }

        if let Some(name) = &self.identity_header
            && is_reserved_identity_header(name)
        {
            return Err(GatewayError::ConfigError(format!(
                "IDENTITY_HEADER '{name}' collides with a header the gateway or client owns"
            )));
        }

        RouteTable::new(self.routes.clone())?;

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        self.metrics_enabled()
            .then(|| std::net::SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
    }

    /// Settings for the token verifier.
    pub fn verifier_settings(&self) -> VerifierSettings {
        VerifierSettings {
            source: self.key_source.clone(),
            algorithms: self.jwt_algorithms.clone(),
            issuer: self.jwt_issuer.clone(),
            audience: self.jwt_audience.clone(),
            leeway_secs: self.jwt_leeway_secs,
            jwks_cache_ttl: self.jwks_cache_ttl,
            jwks_min_refresh_interval: self.jwks_min_refresh_interval,
            fetch_timeout: self.auth_timeout,
        }
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> GatewayResult<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| GatewayError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Pick the key source from `JWKS_URL` / `JWT_SECRET`.
    fn parse_key_source() -> GatewayResult<KeySource> {
        match (non_empty_env("JWKS_URL"), non_empty_env("JWT_SECRET")) {
            (Some(url), None) => Ok(KeySource::Jwks { url }),
            (None, Some(secret)) => Ok(KeySource::SharedSecret(secret)),
            (Some(_), Some(_)) => Err(GatewayError::ConfigError(
                "Set only one of JWKS_URL or JWT_SECRET".to_string(),
            )),
            (None, None) => Err(GatewayError::ConfigError(
                "One of JWKS_URL or JWT_SECRET is required".to_string(),
            )),
        }
    }

    /// Build routes for every catalogued service.
    fn parse_routes() -> GatewayResult<Vec<Route>> {
        SERVICE_CATALOGUE
            .iter()
            .map(|svc| -> GatewayResult<Route> {
                let stem = svc.env_stem;
                let url = env::var(format!("{stem}_URL"))
                    .unwrap_or_else(|_| svc.default_url.to_string());
                let public_paths = env::var(format!("{stem}_PUBLIC_PATHS"))
                    .map(|v| parse_list(&v))
                    .unwrap_or_else(|_| svc.public_paths.iter().map(|p| (*p).to_string()).collect());

                Ok(Route::new(svc.prefix, url)
                    .with_auth(Self::parse_env(&format!("{stem}_REQUIRE_AUTH"), true)?)
                    .with_strip_prefix(Self::parse_env(&format!("{stem}_STRIP_PREFIX"), true)?)
                    .with_public_subpaths(public_paths))
            })
            .collect()
    }
}

/// Read an environment variable, treating empty as unset.
fn non_empty_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Split a comma-separated list, trimming entries and dropping empties.
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse a comma-separated list of JWT algorithm names (e.g. `RS256,ES256`).
///
/// # Errors
///
/// Returns `GatewayError::ConfigError` for an unknown algorithm name.
pub fn parse_algorithms(raw: &str) -> GatewayResult<Vec<Algorithm>> {
    parse_list(raw)
        .iter()
        .map(|name| {
            Algorithm::from_str(&name.to_ascii_uppercase()).map_err(|_| {
                GatewayError::ConfigError(format!("Invalid JWT_ALGORITHMS entry '{name}'"))
            })
        })
        .collect()
}

/// End-to-end headers that must never carry the injected identity.
const RESERVED_IDENTITY_HEADERS: [&str; 5] = [
    "authorization",
    "cookie",
    "content-type",
    "content-encoding",
    REQUEST_ID_HEADER,
];

/// Whether `name` is unusable as the identity header: either it already
/// carries something the backend relies on, or it is hop-by-hop and would
/// be stripped before forwarding.
pub fn is_reserved_identity_header(name: &HeaderName) -> bool {
    RESERVED_IDENTITY_HEADERS.contains(&name.as_str()) || is_hop_by_hop(name)
}

/// Parse the identity header name; an empty value disables injection.
///
/// # Errors
///
/// Returns `GatewayError::ConfigError` if the name is not a valid header or
/// is reserved (see [`is_reserved_identity_header`]).
pub fn parse_identity_header(raw: &str) -> GatewayResult<Option<HeaderName>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    let name = HeaderName::from_bytes(raw.to_ascii_lowercase().as_bytes())
        .map_err(|e| GatewayError::ConfigError(format!("Invalid IDENTITY_HEADER '{raw}': {e}")))?;

    if is_reserved_identity_header(&name) {
        return Err(GatewayError::ConfigError(format!(
            "IDENTITY_HEADER '{raw}' is reserved"
        )));
    }
    Ok(Some(name))
}

/// Default configuration for testing and development.
///
/// Uses a throwaway HMAC secret; production deployments should use
/// `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_request_body_size: 10 * 1024 * 1024, // 10MB
            // Routing
            routes: SERVICE_CATALOGUE
                .iter()
                .map(|svc| {
                    Route::new(svc.prefix, svc.default_url)
                        .with_public_subpaths(svc.public_paths.iter().copied())
                })
                .collect(),
            upstream_timeout: Duration::from_secs(10),
            upstream_connect_timeout: Duration::from_secs(5),
            identity_header: Some(HeaderName::from_static(DEFAULT_IDENTITY_HEADER)),
            // Authentication
            key_source: KeySource::SharedSecret("dev-only-insecure-secret".to_string()),
            jwt_algorithms: vec![Algorithm::HS256],
            jwt_issuer: None,
            jwt_audience: None,
            jwt_leeway_secs: 60,
            auth_timeout: Duration::from_secs(5),
            jwks_cache_ttl: Duration::from_secs(3600),
            jwks_min_refresh_interval: Duration::from_secs(30),
            // Security
            cors_allowed_origins: vec!["*".to_string()],
            // Observability
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            metrics_port: 9090,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8000);
        assert_eq!(config.upstream_timeout, Duration::from_secs(10));
        assert_eq!(config.routes.len(), 5);
        assert_eq!(config.identity_header.unwrap(), "x-user-id");
    }

    #[test]
    fn test_default_catalogue_routes() {
        let table = RouteTable::new(Config::default().routes).unwrap();

        assert_eq!(
            table.prefixes(),
            vec!["admin", "notifications", "reviews", "rides", "users"]
        );
        assert!(!table.resolve("/users/login").unwrap().requires_auth());
        assert!(!table.resolve("/users/signup").unwrap().requires_auth());
        assert!(table.resolve("/rides/1").unwrap().requires_auth());
    }

    #[test]
    fn test_server_addr_format() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };

        assert_eq!(config.server_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_metrics_addr() {
        assert!(Config::default().metrics_addr().is_some());

        let config = Config {
            metrics_port: 0,
            ..Config::default()
        };
        assert!(config.metrics_addr().is_none());
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_zero_upstream_timeout() {
        let config = Config {
            upstream_timeout: Duration::ZERO,
            ..Config::default()
        };

        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("UPSTREAM_TIMEOUT_SECS"));
    }

    #[test]
    fn test_validate_connect_timeout_ordering() {
        let config = Config {
            upstream_timeout: Duration::from_secs(5),
            upstream_connect_timeout: Duration::from_secs(10),
            ..Config::default()
        };

        let result = config.validate();
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("UPSTREAM_CONNECT_TIMEOUT_SECS")
        );
    }

    #[test]
    fn test_validate_secret_requires_hmac_algorithms() {
        let config = Config {
            jwt_algorithms: vec![Algorithm::HS256, Algorithm::RS256],
            ..Config::default()
        };

        assert!(config.validate().unwrap_err().to_string().contains("RS256"));
    }

    #[test]
    fn test_validate_jwks_url_scheme() {
        let config = Config {
            key_source: KeySource::Jwks {
                url: "id.example.com/jwks".to_string(),
            },
            jwt_algorithms: vec![Algorithm::RS256],
            ..Config::default()
        };

        assert!(config.validate().unwrap_err().to_string().contains("JWKS_URL"));
    }

    #[test]
    fn test_validate_jwks_refresh_ordering() {
        let config = Config {
            key_source: KeySource::Jwks {
                url: "https://id.example.com/jwks".to_string(),
            },
            jwt_algorithms: vec![Algorithm::RS256],
            jwks_cache_ttl: Duration::from_secs(10),
            jwks_min_refresh_interval: Duration::from_secs(60),
            ..Config::default()
        };

        assert!(
            config
                .validate()
                .unwrap_err()
                .to_string()
                .contains("JWKS_MIN_REFRESH_INTERVAL_SECS")
        );
    }

    #[test]
    fn test_validate_rejects_bad_route() {
        let mut config = Config::default();
        config.routes.push(Route::new("users", "http://localhost:9999"));

        assert!(config.validate().unwrap_err().to_string().contains("duplicate"));
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list(" login, signup ,,"), vec!["login", "signup"]);
        assert!(parse_list("").is_empty());
    }

    #[test]
    fn test_parse_algorithms() {
        assert_eq!(
            parse_algorithms("RS256, es256").unwrap(),
            vec![Algorithm::RS256, Algorithm::ES256]
        );
        assert!(parse_algorithms("RS256,none").is_err());
    }

    #[test]
    fn test_parse_identity_header() {
        assert_eq!(
            parse_identity_header("X-Auth-Subject").unwrap().unwrap(),
            "x-auth-subject"
        );
        assert!(parse_identity_header("").unwrap().is_none());
        assert!(parse_identity_header("bad header").is_err());
    }

    #[test]
    fn test_reserved_identity_headers_rejected() {
        for name in [
            "Authorization",
            "proxy-authorization",
            "cookie",
            "Host",
            "connection",
            "transfer-encoding",
            "x-request-id",
        ] {
            assert!(
                matches!(parse_identity_header(name), Err(GatewayError::ConfigError(_))),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn test_validate_rejects_reserved_identity_header() {
        let config = Config {
            identity_header: Some(HeaderName::from_static("authorization")),
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            identity_header: Some(HeaderName::from_static("x-auth-subject")),
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_log_format() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("TEXT".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!("yaml".parse::<LogFormat>().is_err());
    }
}
