//! CORS (Cross-Origin Resource Sharing) middleware.
//!
//! Answers preflight requests directly and decorates other responses with
//! the `Access-Control-*` headers of a [`CorsPolicy`]. A policy built from
//! the default configuration allows any origin, method and header.
//!
//! ## Preflight Requests
//!
//! An `OPTIONS` request carrying both `Origin` and
//! `Access-Control-Request-Method` is a preflight. It is answered with
//! `204 No Content` when the policy admits the origin, method and requested
//! headers, and with a `403` envelope otherwise. The rest of the chain does
//! not run.
//!
//! ## Example
//!
//! ```
//! use http::Method;
//! use sluice_middleware::stages::CorsMiddleware;
//! use std::time::Duration;
//!
//! let cors = CorsMiddleware::builder()
//!     .allow_origin("https://app.example.com")
//!     .allow_methods([Method::GET, Method::POST])
//!     .allow_headers(["Content-Type", "X-Request-ID"])
//!     .max_age(Duration::from_secs(600))
//!     .build();
//! assert!(cors.policy().allows_origin("https://app.example.com"));
//! ```

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{PipelineResult, Request, Response, ResponseExt};
use http::{HeaderValue, Method, StatusCode};
use sluice_config::CorsConfig;
use std::collections::BTreeSet;
use std::time::Duration;

/// CORS header names.
pub mod headers {
    /// `Access-Control-Allow-Origin` header.
    pub const ALLOW_ORIGIN: &str = "access-control-allow-origin";
    /// `Access-Control-Allow-Methods` header.
    pub const ALLOW_METHODS: &str = "access-control-allow-methods";
    /// `Access-Control-Allow-Headers` header.
    pub const ALLOW_HEADERS: &str = "access-control-allow-headers";
    /// `Access-Control-Allow-Credentials` header.
    pub const ALLOW_CREDENTIALS: &str = "access-control-allow-credentials";
    /// `Access-Control-Max-Age` header.
    pub const MAX_AGE: &str = "access-control-max-age";
    /// `Access-Control-Expose-Headers` header.
    pub const EXPOSE_HEADERS: &str = "access-control-expose-headers";
    /// `Access-Control-Request-Method` header (preflight).
    pub const REQUEST_METHOD: &str = "access-control-request-method";
    /// `Access-Control-Request-Headers` header (preflight).
    pub const REQUEST_HEADERS: &str = "access-control-request-headers";
    /// `Origin` header.
    pub const ORIGIN: &str = "origin";
    /// `Vary` header.
    pub const VARY: &str = "vary";
}

/// A set of allowed values, or any value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Allowed<T: Ord> {
    /// Any value is allowed.
    Any,
    /// Only the listed values are allowed.
    List(BTreeSet<T>),
}

impl<T: Ord> Allowed<T> {
    fn from_list(values: impl IntoIterator<Item = T>, any: impl Fn(&T) -> bool) -> Self {
        let values: BTreeSet<T> = values.into_iter().collect();
        if values.iter().any(any) {
            Self::Any
        } else {
            Self::List(values)
        }
    }

    fn contains(&self, value: &T) -> bool {
        match self {
            Self::Any => true,
            Self::List(values) => values.contains(value),
        }
    }

    fn insert(&mut self, value: T) {
        if let Self::List(values) = self {
            values.insert(value);
        }
    }
}

/// Which cross-origin requests are admitted and what they may see.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    origins: Allowed<String>,
    methods: Allowed<String>,
    headers: Allowed<String>,
    expose_headers: BTreeSet<String>,
    allow_credentials: bool,
    max_age: Option<Duration>,
}

impl CorsPolicy {
    /// Returns true if requests from `origin` are admitted.
    #[must_use]
    pub fn allows_origin(&self, origin: &str) -> bool {
        self.origins.contains(&origin.to_string())
    }

    /// Returns true if `method` may be used cross-origin.
    #[must_use]
    pub fn allows_method(&self, method: &str) -> bool {
        self.methods.contains(&method.to_ascii_uppercase())
    }

    /// Returns true if the request header may be sent cross-origin.
    #[must_use]
    pub fn allows_header(&self, header: &str) -> bool {
        self.headers.contains(&header.to_ascii_lowercase())
    }

    /// The `Access-Control-Allow-Origin` value for an admitted origin.
    ///
    /// A wildcard policy echoes the origin when credentials are allowed,
    /// since browsers reject `*` together with credentials.
    fn allow_origin_value(&self, origin: &str) -> Option<HeaderValue> {
        match &self.origins {
            Allowed::Any if !self.allow_credentials => Some(HeaderValue::from_static("*")),
            _ if self.allows_origin(origin) => HeaderValue::from_str(origin).ok(),
            _ => None,
        }
    }
}

impl Default for CorsPolicy {
    /// Allows any origin, method and header.
    fn default() -> Self {
        Self {
            origins: Allowed::Any,
            methods: Allowed::Any,
            headers: Allowed::Any,
            expose_headers: BTreeSet::new(),
            allow_credentials: false,
            max_age: None,
        }
    }
}

/// Builder for a [`CorsMiddleware`].
#[derive(Debug, Clone)]
pub struct CorsBuilder {
    policy: CorsPolicy,
}

impl CorsBuilder {
    /// Creates a builder that admits no origins, the common methods and the
    /// `Content-Type`, `Authorization` and `X-Request-ID` headers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            policy: CorsPolicy {
                origins: Allowed::List(BTreeSet::new()),
                methods: Allowed::List(
                    ["GET", "HEAD", "POST", "PUT", "DELETE", "PATCH"]
                        .into_iter()
                        .map(String::from)
                        .collect(),
                ),
                headers: Allowed::List(
                    ["content-type", "authorization", "x-request-id"]
                        .into_iter()
                        .map(String::from)
                        .collect(),
                ),
                expose_headers: BTreeSet::new(),
                allow_credentials: false,
                max_age: Some(Duration::from_secs(86_400)),
            },
        }
    }

    /// Allows any origin.
    #[must_use]
    pub fn allow_any_origin(mut self) -> Self {
        self.policy.origins = Allowed::Any;
        self
    }

    /// Adds an allowed origin.
    #[must_use]
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.policy.origins.insert(origin.into());
        self
    }

    /// Sets the allowed methods.
    #[must_use]
    pub fn allow_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.policy.methods = Allowed::List(methods.into_iter().map(|m| m.as_str().to_string()).collect());
        self
    }

    /// Allows any method.
    #[must_use]
    pub fn allow_any_method(mut self) -> Self {
        self.policy.methods = Allowed::Any;
        self
    }

    /// Sets the allowed request headers. `*` allows any header.
    #[must_use]
    pub fn allow_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.policy.headers =
            Allowed::from_list(headers.into_iter().map(|h| h.into().to_ascii_lowercase()), |h| h == "*");
        self
    }

    /// Sets the response headers exposed to scripts.
    #[must_use]
    pub fn expose_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.policy.expose_headers = headers.into_iter().map(|h| h.into().to_ascii_lowercase()).collect();
        self
    }

    /// Sets whether credentials are allowed.
    #[must_use]
    pub fn allow_credentials(mut self, allow: bool) -> Self {
        self.policy.allow_credentials = allow;
        self
    }

    /// Sets how long browsers may cache a preflight answer.
    #[must_use]
    pub fn max_age(mut self, duration: Duration) -> Self {
        self.policy.max_age = Some(duration);
        self
    }

    /// Builds the middleware.
    #[must_use]
    pub fn build(self) -> CorsMiddleware {
        CorsMiddleware {
            policy: self.policy,
        }
    }
}

impl Default for CorsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// CORS middleware that handles preflight requests and adds CORS headers.
#[derive(Debug, Clone, Default)]
pub struct CorsMiddleware {
    policy: CorsPolicy,
}

impl CorsMiddleware {
    /// Creates a new CORS builder.
    #[must_use]
    pub fn builder() -> CorsBuilder {
        CorsBuilder::new()
    }

    /// Allows any origin, method and header.
    #[must_use]
    pub fn permissive() -> Self {
        Self::default()
    }

    /// Creates the middleware from the `cors` configuration section.
    /// A `"*"` entry in a list allows any value.
    #[must_use]
    pub fn from_config(config: &CorsConfig) -> Self {
        let policy = CorsPolicy {
            origins: Allowed::from_list(
                config.allowed_origins.iter().map(|o| o.trim().to_string()),
                |o| o == "*",
            ),
            methods: Allowed::from_list(
                config.allowed_methods.iter().map(|m| m.trim().to_ascii_uppercase()),
                |m| m == "*",
            ),
            headers: Allowed::from_list(
                config.allowed_headers.iter().map(|h| h.trim().to_ascii_lowercase()),
                |h| h == "*",
            ),
            expose_headers: config
                .exposed_headers
                .iter()
                .map(|h| h.trim().to_ascii_lowercase())
                .collect(),
            allow_credentials: config.allow_credentials,
            max_age: config.max_age_secs.map(Duration::from_secs),
        };
        Self { policy }
    }

    /// Returns the policy.
    #[must_use]
    pub fn policy(&self) -> &CorsPolicy {
        &self.policy
    }

    fn is_preflight(request: &Request) -> bool {
        request.method() == Method::OPTIONS
            && request.headers().contains_key(headers::ORIGIN)
            && request.headers().contains_key(headers::REQUEST_METHOD)
    }

    fn header_str<'r>(request: &'r Request, name: &str) -> Option<&'r str> {
        request.headers().get(name).and_then(|v| v.to_str().ok())
    }

    fn handle_preflight(&self, request: &Request) -> Response {
        let origin = Self::header_str(request, headers::ORIGIN).unwrap_or_default();
        if !self.policy.allows_origin(origin) {
            return Response::error(StatusCode::FORBIDDEN, "Origin not allowed");
        }

        let method = Self::header_str(request, headers::REQUEST_METHOD).unwrap_or_default();
        if !self.policy.allows_method(method) {
            return Response::error(StatusCode::FORBIDDEN, "Method not allowed");
        }

        let requested_headers = Self::header_str(request, headers::REQUEST_HEADERS).unwrap_or_default();
        for header in requested_headers.split(',').map(str::trim).filter(|h| !h.is_empty()) {
            if !self.policy.allows_header(header) {
                return Response::error(
                    StatusCode::FORBIDDEN,
                    &format!("Header '{header}' not allowed"),
                );
            }
        }

        let mut response = Response::empty(StatusCode::NO_CONTENT);
        let out = response.headers_mut();

        if let Some(value) = self.policy.allow_origin_value(origin) {
            out.insert(headers::ALLOW_ORIGIN, value);
        }

        let methods = match &self.policy.methods {
            Allowed::Any => method.to_ascii_uppercase(),
            Allowed::List(methods) => methods.iter().cloned().collect::<Vec<_>>().join(", "),
        };
        if let Ok(value) = HeaderValue::from_str(&methods) {
            out.insert(headers::ALLOW_METHODS, value);
        }

        let allowed_headers = match &self.policy.headers {
            Allowed::Any => requested_headers.to_string(),
            Allowed::List(list) => list.iter().cloned().collect::<Vec<_>>().join(", "),
        };
        if !allowed_headers.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&allowed_headers) {
                out.insert(headers::ALLOW_HEADERS, value);
            }
        }

        if self.policy.allow_credentials {
            out.insert(headers::ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        }
        if let Some(max_age) = self.policy.max_age {
            out.insert(headers::MAX_AGE, HeaderValue::from(max_age.as_secs()));
        }
        out.insert(
            headers::VARY,
            HeaderValue::from_static("Origin, Access-Control-Request-Method, Access-Control-Request-Headers"),
        );

        response
    }

    fn add_cors_headers(&self, response: &mut Response, origin: &str) {
        let out = response.headers_mut();

        if let Some(value) = self.policy.allow_origin_value(origin) {
            out.insert(headers::ALLOW_ORIGIN, value);
        }
        if self.policy.allow_credentials {
            out.insert(headers::ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        }
        if !self.policy.expose_headers.is_empty() {
            let exposed = self.policy.expose_headers.iter().cloned().collect::<Vec<_>>().join(", ");
            if let Ok(value) = HeaderValue::from_str(&exposed) {
                out.insert(headers::EXPOSE_HEADERS, value);
            }
        }
        out.insert(headers::VARY, HeaderValue::from_static("Origin"));
    }
}

impl Middleware for CorsMiddleware {
    fn name(&self) -> &'static str {
        "cors"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, PipelineResult> {
        Box::pin(async move {
            if Self::is_preflight(&request) {
                return Ok(self.handle_preflight(&request));
            }

            let origin = Self::header_str(&request, headers::ORIGIN).map(String::from);
            let mut response = next.run(ctx, request).await?;

            if let Some(origin) = origin {
                if self.policy.allows_origin(&origin) {
                    self.add_cors_headers(&mut response, &origin);
                }
            }
            Ok(response)
        })
    }
}
