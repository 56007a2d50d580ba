//! Authorization middleware stage.
//!
//! Reserves the authorization slot of the pipeline. Enforcement itself
//! belongs to an [`Authorizer`] supplied by the application; the default
//! admits every request.
//!
//! # Example
//!
//! ```
//! use sluice_middleware::stages::{AuthorizationMiddleware, PolicyDecision};
//!
//! let open = AuthorizationMiddleware::allow_all();
//! let closed = AuthorizationMiddleware::deny_all();
//! let custom = AuthorizationMiddleware::with_policy(|_ctx, req| {
//!     if req.headers().contains_key("authorization") {
//!         PolicyDecision::Allow
//!     } else {
//!         PolicyDecision::deny("missing credentials")
//!     }
//! });
//! ```

use crate::{
    context::MiddlewareContext,
    middleware::{BoxFuture, Middleware, Next},
    types::{PipelineResult, Request, Response, ResponseExt},
};
use http::StatusCode;
use std::sync::Arc;

/// Outcome of an authorization check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    /// Request is allowed.
    Allow,
    /// Request is denied with a reason.
    Deny {
        /// The reason for denial.
        reason: String,
    },
}

impl PolicyDecision {
    /// Creates a denial.
    pub fn deny(reason: impl Into<String>) -> Self {
        Self::Deny {
            reason: reason.into(),
        }
    }
}

/// Decides whether a request may proceed.
pub trait Authorizer: Send + Sync + 'static {
    /// Evaluates the request.
    fn authorize(&self, ctx: &MiddlewareContext, request: &Request) -> PolicyDecision;
}

impl<F> Authorizer for F
where
    F: Fn(&MiddlewareContext, &Request) -> PolicyDecision + Send + Sync + 'static,
{
    fn authorize(&self, ctx: &MiddlewareContext, request: &Request) -> PolicyDecision {
        self(ctx, request)
    }
}

/// Admits every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn authorize(&self, _ctx: &MiddlewareContext, _request: &Request) -> PolicyDecision {
        PolicyDecision::Allow
    }
}

/// Refuses every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

impl Authorizer for DenyAll {
    fn authorize(&self, _ctx: &MiddlewareContext, _request: &Request) -> PolicyDecision {
        PolicyDecision::deny("Access denied")
    }
}

/// Authorization middleware.
///
/// A denied request is answered with `403 Forbidden` and the reason in the
/// `{statusCode, message}` envelope.
#[derive(Clone)]
pub struct AuthorizationMiddleware {
    authorizer: Arc<dyn Authorizer>,
}

impl AuthorizationMiddleware {
    /// Creates the stage around an authorizer.
    #[must_use]
    pub fn new(authorizer: Arc<dyn Authorizer>) -> Self {
        Self { authorizer }
    }

    /// Allows every request.
    #[must_use]
    pub fn allow_all() -> Self {
        Self::new(Arc::new(AllowAll))
    }

    /// Denies every request.
    #[must_use]
    pub fn deny_all() -> Self {
        Self::new(Arc::new(DenyAll))
    }

    /// Uses a closure as the policy.
    #[must_use]
    pub fn with_policy<F>(policy: F) -> Self
    where
        F: Fn(&MiddlewareContext, &Request) -> PolicyDecision + Send + Sync + 'static,
    {
        Self::new(Arc::new(policy))
    }
}

impl Default for AuthorizationMiddleware {
    fn default() -> Self {
        Self::allow_all()
    }
}

impl std::fmt::Debug for AuthorizationMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationMiddleware").finish_non_exhaustive()
    }
}

impl Middleware for AuthorizationMiddleware {
    fn name(&self) -> &'static str {
        "authorization"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, PipelineResult> {
        match self.authorizer.authorize(ctx, &request) {
            PolicyDecision::Allow => next.run(ctx, request),
            PolicyDecision::Deny { reason } => {
                tracing::info!(
                    request_id = %ctx.request_id(),
                    client = %ctx.identity(),
                    reason = %reason,
                    "Request denied"
                );
                Box::pin(async move { Ok(Response::error(StatusCode::FORBIDDEN, &reason)) })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Pipeline;
    use crate::types::body_bytes;
    use bytes::Bytes;
    use http::Request as HttpRequest;
    use http_body_util::Full;

    fn pipeline(stage: AuthorizationMiddleware) -> Pipeline {
        Pipeline::builder()
            .use_middleware(stage)
            .run(|_ctx, _req| async { Ok(Response::text(StatusCode::OK, "handler")) })
            .build()
    }

    fn request(auth: Option<&str>) -> Request {
        let mut builder = HttpRequest::builder().uri("/api/values");
        if let Some(auth) = auth {
            builder = builder.header("authorization", auth);
        }
        builder.body(Full::new(Bytes::new())).unwrap()
    }

    #[tokio::test]
    async fn test_default_allows() {
        let response = pipeline(AuthorizationMiddleware::default())
            .handle(&mut MiddlewareContext::new(), request(None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_deny_all_short_circuits() {
        let response = pipeline(AuthorizationMiddleware::deny_all())
            .handle(&mut MiddlewareContext::new(), request(None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body["statusCode"], 403);
        assert_eq!(body["message"], "Access denied");
    }

    #[tokio::test]
    async fn test_custom_policy() {
        let pipeline = pipeline(AuthorizationMiddleware::with_policy(|_ctx, req| {
            if req.headers().contains_key("authorization") {
                PolicyDecision::Allow
            } else {
                PolicyDecision::deny("missing credentials")
            }
        }));

        let denied = pipeline
            .handle(&mut MiddlewareContext::new(), request(None))
            .await
            .unwrap();
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);

        let allowed = pipeline
            .handle(&mut MiddlewareContext::new(), request(Some("Bearer t")))
            .await
            .unwrap();
        assert_eq!(allowed.status(), StatusCode::OK);
    }
}
