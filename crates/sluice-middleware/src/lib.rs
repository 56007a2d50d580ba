//! # Sluice Middleware
//!
//! The request pipeline at the heart of Sluice.
//!
//! A [`Pipeline`] is an ordered list of middleware units ending in a
//! terminal handler. Each unit receives the request, the per-request
//! [`MiddlewareContext`] and a [`Next`] continuation. It may act before and
//! after calling `next`, or answer on its own and skip everything after it.
//! Units run before-`next` in registration order and after-`next` in
//! reverse.
//!
//! Branch points send a request down a nested pipeline when a path prefix
//! ([`PipelineBuilder::map`]) or a predicate ([`PipelineBuilder::map_when`])
//! matches. A branch taken never returns to the parent's remaining units.
//!
//! ## Built-in units
//!
//! | Unit                                | Purpose                                   |
//! |-------------------------------------|-------------------------------------------|
//! | [`ExceptionContainmentMiddleware`]  | Turn failures into a 500 envelope         |
//! | [`ForwardedHeadersMiddleware`]      | Client identity behind trusted proxies    |
//! | [`RateLimitMiddleware`]             | Fixed-window quotas, 429 with Retry-After |
//! | [`CorsMiddleware`]                  | Preflight and CORS response headers       |
//! | [`AuthorizationMiddleware`]         | Policy slot, allow-all by default         |
//! | [`RequestIdMiddleware`]             | `X-Request-ID` propagation                |
//! | [`RequestLoggingMiddleware`]        | Before/after request log lines            |
//!
//! [`ExceptionContainmentMiddleware`]: stages::ExceptionContainmentMiddleware
//! [`ForwardedHeadersMiddleware`]: stages::ForwardedHeadersMiddleware
//! [`RateLimitMiddleware`]: stages::RateLimitMiddleware
//! [`CorsMiddleware`]: stages::CorsMiddleware
//! [`AuthorizationMiddleware`]: stages::AuthorizationMiddleware
//! [`RequestIdMiddleware`]: stages::RequestIdMiddleware
//! [`RequestLoggingMiddleware`]: stages::RequestLoggingMiddleware
//!
//! ## Example
//!
//! ```
//! use http::StatusCode;
//! use sluice_middleware::{MiddlewareContext, Pipeline, Response, ResponseExt};
//! use sluice_middleware::stages::ExceptionContainmentMiddleware;
//!
//! let pipeline = Pipeline::builder()
//!     .use_middleware(ExceptionContainmentMiddleware::new())
//!     .map("/health", |branch| {
//!         branch.run(|_ctx, _req| async { Ok(Response::text(StatusCode::OK, "ok")) })
//!     })
//!     .build();
//!
//! assert_eq!(pipeline.unit_names(), vec!["exception-containment"]);
//! assert_eq!(pipeline.branch_count(), 1);
//! ```

#![doc(html_root_url = "https://docs.rs/sluice-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod context;
pub mod middleware;
pub mod pipeline;
pub mod ratelimit;
pub mod stages;
pub mod types;

// Re-export main types at crate root
pub use context::MiddlewareContext;
pub use middleware::{BoxFuture, FnMiddleware, Handler, Middleware, Next};
pub use pipeline::{BoxedMiddleware, BranchPredicate, Pipeline, PipelineBuilder};
pub use types::{body_bytes, PipelineResult, Request, Response, ResponseExt};
