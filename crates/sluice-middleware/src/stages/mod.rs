//! Built-in middleware units.
//!
//! The standard pipeline registers them in this order:
//!
//! 1. [`exception`] - contain failures of everything after it
//! 2. [`forwarded`] - resolve the client behind trusted proxies
//! 3. [`rate_limit`] - per-client, per-endpoint quotas
//! 4. [`cors`] - preflight and CORS response headers
//! 5. [`authorization`] - policy slot, allows everything by default
//!
//! [`request_id`] and [`request_logging`] may be registered anywhere.

pub mod authorization;
pub mod cors;
pub mod exception;
pub mod forwarded;
pub mod rate_limit;
pub mod request_id;
pub mod request_logging;

pub use authorization::{AllowAll, AuthorizationMiddleware, Authorizer, DenyAll, PolicyDecision};
pub use cors::{CorsBuilder, CorsMiddleware, CorsPolicy};
pub use exception::ExceptionContainmentMiddleware;
pub use forwarded::ForwardedHeadersMiddleware;
pub use rate_limit::RateLimitMiddleware;
pub use request_id::RequestIdMiddleware;
pub use request_logging::RequestLoggingMiddleware;
