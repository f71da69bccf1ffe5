//! Static route table mapping a path prefix to one backend service.
//!
//! # Matching
//!
//! The first path segment selects the route by exact, case-sensitive match:
//!
//! ```text
//! /users/42/profile  →  route "users", remainder "/42/profile"
//! /users             →  route "users", remainder "/"
//! /unknown/1         →  RouteNotFound
//! ```
//!
//! Prefixes are single segments, so two routes can never overlap and there
//! is no longest-prefix ambiguity to resolve.
//!
//! A path with a `.` or `..` segment anywhere after the prefix, raw or
//! percent-encoded (`%2e`, `.%2E`, ...), is `RouteNotFound`. The backend URL
//! parser would resolve those segments and let a request climb out of the
//! route's base path.
//!
//! # Auth Policy
//!
//! Whether a request must carry a credential is decided on the *remainder*
//! (the logical sub-resource), never on the backend path. A route with
//! `strip_prefix = false` still bypasses auth for `/users/login`.

use std::collections::{HashMap, HashSet};

use reqwest::Url;
use thiserror::Error;

/// Path reserved for the liveness endpoint; cannot be used as a prefix.
pub const RESERVED_PREFIXES: [&str; 1] = ["healthz"];

/// Route table errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// No configured prefix matches the request path.
    #[error("no route matches {0}")]
    NotFound(String),

    /// A route definition is unusable (raised at startup only).
    #[error("invalid route: {0}")]
    Invalid(String),
}

/// A backend service reachable under one path prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// First path segment owned by this service (e.g. `users`).
    pub prefix: String,
    /// Absolute base URL of the backend, without trailing slash.
    pub backend_base_url: String,
    /// Whether requests need a verified bearer credential.
    pub requires_auth: bool,
    /// Exact sub-paths (no leading slash) that skip auth, e.g. `login`.
    pub unauthenticated_subpaths: HashSet<String>,
    /// Forward only the remainder (`true`) or the full inbound path.
    pub strip_prefix: bool,
}

impl Route {
    /// Create a protected route with no public sub-paths.
    pub fn new(prefix: impl Into<String>, backend_base_url: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            backend_base_url: backend_base_url.into(),
            requires_auth: true,
            unauthenticated_subpaths: HashSet::new(),
            strip_prefix: true,
        }
    }

    /// Builder: mark sub-paths that bypass authentication.
    pub fn with_public_subpaths<I, S>(mut self, subpaths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unauthenticated_subpaths = subpaths.into_iter().map(Into::into).collect();
        self
    }

    /// Builder: toggle authentication for the whole route.
    pub fn with_auth(mut self, requires_auth: bool) -> Self {
        self.requires_auth = requires_auth;
        self
    }

    /// Builder: toggle prefix stripping on the forwarded path.
    pub fn with_strip_prefix(mut self, strip_prefix: bool) -> Self {
        self.strip_prefix = strip_prefix;
        self
    }

    /// Decide whether a request for `remainder` must be authenticated.
    ///
    /// `remainder` is the path after the prefix segment, with its leading
    /// slash (as produced by [`RouteTable::resolve`]).
    pub fn requires_auth_for(&self, remainder: &str) -> bool {
        if !self.requires_auth {
            return false;
        }
        let subpath = remainder.strip_prefix('/').unwrap_or(remainder);
        !self.unauthenticated_subpaths.contains(subpath)
    }

    /// Check the route definition and normalize its base URL.
    fn validated(mut self) -> Result<Self, RouteError> {
        if self.prefix.is_empty()
            || self.prefix.contains(['/', '\\'])
            || is_dot_segment(&self.prefix)
        {
            return Err(RouteError::Invalid(format!(
                "prefix '{}' must be a single non-empty path segment",
                self.prefix
            )));
        }

        if RESERVED_PREFIXES.contains(&self.prefix.as_str()) {
            return Err(RouteError::Invalid(format!(
                "prefix '{}' is reserved",
                self.prefix
            )));
        }

        let url = Url::parse(&self.backend_base_url).map_err(|e| {
            RouteError::Invalid(format!("backend URL for '{}': {e}", self.prefix))
        })?;

        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(RouteError::Invalid(format!(
                "backend URL for '{}' must be an absolute http(s) URL",
                self.prefix
            )));
        }

        if url.query().is_some() || url.fragment().is_some() {
            return Err(RouteError::Invalid(format!(
                "backend URL for '{}' must not carry a query or fragment",
                self.prefix
            )));
        }

        if let Some(bad) = self
            .unauthenticated_subpaths
            .iter()
            .find(|p| p.is_empty() || p.starts_with('/') || p.ends_with('/'))
        {
            return Err(RouteError::Invalid(format!(
                "public sub-path '{bad}' for '{}' must be a bare relative path",
                self.prefix
            )));
        }

        self.backend_base_url = self.backend_base_url.trim_end_matches('/').to_string();
        Ok(self)
    }
}

/// Result of a successful lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoute<'a> {
    pub route: &'a Route,
    /// Path after the prefix segment, always starting with `/`.
    pub remainder: String,
}

impl ResolvedRoute<'_> {
    /// Whether this particular request must present a credential.
    pub fn requires_auth(&self) -> bool {
        self.route.requires_auth_for(&self.remainder)
    }
}

/// Immutable prefix → route mapping, built once at startup.
///
/// Safe for concurrent reads without synchronization.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashMap<String, Route>,
}

impl RouteTable {
    /// Build the table, validating every route.
    ///
    /// # Errors
    ///
    /// Returns `RouteError::Invalid` for a malformed route or a duplicate
    /// prefix.
    pub fn new(routes: impl IntoIterator<Item = Route>) -> Result<Self, RouteError> {
        let mut table = HashMap::new();

        for route in routes {
            let route = route.validated()?;
            if table.contains_key(&route.prefix) {
                return Err(RouteError::Invalid(format!(
                    "duplicate prefix '{}'",
                    route.prefix
                )));
            }
            table.insert(route.prefix.clone(), route);
        }

        Ok(Self { routes: table })
    }

    /// Resolve an inbound path to its route and remainder.
    ///
    /// # Errors
    ///
    /// Returns `RouteError::NotFound` if the first segment is empty or
    /// matches no configured prefix, or if the remainder has a dot segment.
    pub fn resolve(&self, path: &str) -> Result<ResolvedRoute<'_>, RouteError> {
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        let (segment, rest) = trimmed.split_once('/').unwrap_or((trimmed, ""));

        let route = self
            .routes
            .get(segment)
            .filter(|_| !segment.is_empty())
            .ok_or_else(|| RouteError::NotFound(path.to_string()))?;

        // http(s) URL parsing treats `\` as a separator too
        if rest.split(['/', '\\']).any(is_dot_segment) {
            return Err(RouteError::NotFound(path.to_string()));
        }

        Ok(ResolvedRoute {
            route,
            remainder: format!("/{rest}"),
        })
    }

    /// Iterate over configured routes (unordered).
    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.values()
    }

    /// Configured prefixes, sorted for stable output.
    pub fn prefixes(&self) -> Vec<String> {
        let mut prefixes: Vec<String> = self.routes.keys().cloned().collect();
        prefixes.sort();
        prefixes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// `.` or `..`, with any dot possibly written as `%2e` / `%2E`.
fn is_dot_segment(segment: &str) -> bool {
    let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
    matches!(decoded.as_str(), "." | "..")
}
