//! Rate limiting middleware.
//!
//! Evaluates each request against a [`RateLimiter`] before the rest of the
//! chain runs. A rejected request is answered here with
//! `429 Too Many Requests`, a `Retry-After` header in whole seconds (rounded
//! up) and a `{statusCode, message}` body; nothing after this unit runs.
//!
//! The request path is reconstructed from the context's path base, so the
//! unit sees the path the client sent even inside a `map` branch.
//!
//! If the counter store fails the request is let through and a warning is
//! logged.
//!
//! ## Example
//!
//! ```
//! use sluice_config::RateLimitingConfig;
//! use sluice_middleware::ratelimit::MemoryCounterStore;
//! use sluice_middleware::stages::RateLimitMiddleware;
//! use std::sync::Arc;
//!
//! let stage = RateLimitMiddleware::from_config(
//!     &RateLimitingConfig::default(),
//!     Arc::new(MemoryCounterStore::new()),
//! )
//! .unwrap();
//! assert_eq!(stage.limiter().rules().len(), 1);
//! ```

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::ratelimit::{CounterStore, Decision, Quota, RateLimiter, Rejection, RuleError};
use crate::types::{PipelineResult, Request, Response, ResponseExt};
use chrono::{SecondsFormat, Utc};
use http::header::RETRY_AFTER;
use http::{HeaderValue, StatusCode};
use sluice_config::{RateLimitingConfig, DEFAULT_QUOTA_EXCEEDED_MESSAGE};
use std::sync::Arc;
use tokio::time::Instant;

/// Rate limit header names.
pub mod headers {
    /// Requests admitted per period by the tightest rule.
    pub const LIMIT: &str = "x-rate-limit-limit";
    /// Requests left in the current window.
    pub const REMAINING: &str = "x-rate-limit-remaining";
    /// When the current window closes, as an RFC 3339 timestamp.
    pub const RESET: &str = "x-rate-limit-reset";
}

/// Rate limiting middleware.
#[derive(Debug, Clone)]
pub struct RateLimitMiddleware {
    limiter: Arc<RateLimiter>,
    quota_message: String,
    emit_headers: bool,
}

impl RateLimitMiddleware {
    /// Creates the stage around a limiter, with the default quota message
    /// and no quota headers.
    #[must_use]
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            quota_message: DEFAULT_QUOTA_EXCEEDED_MESSAGE.to_string(),
            emit_headers: false,
        }
    }

    /// Creates the stage from the `rate_limiting` configuration section.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError`] if a rule or whitelist entry is invalid.
    pub fn from_config(
        config: &RateLimitingConfig,
        store: Arc<dyn CounterStore>,
    ) -> Result<Self, RuleError> {
        let limiter = RateLimiter::from_config(config, store)?;
        Ok(Self::new(Arc::new(limiter))
            .with_quota_message(config.quota_exceeded_message.clone())
            .with_headers(config.emit_rate_limit_headers))
    }

    /// Sets the rejection message. `{limit}` and `{period}` are replaced
    /// with the exhausted rule's values.
    #[must_use]
    pub fn with_quota_message(mut self, message: impl Into<String>) -> Self {
        self.quota_message = message.into();
        self
    }

    /// Enables or disables the `X-Rate-Limit-*` headers on admitted responses.
    #[must_use]
    pub fn with_headers(mut self, emit: bool) -> Self {
        self.emit_headers = emit;
        self
    }

    /// Returns the limiter.
    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    fn quota_exceeded(&self, rejection: &Rejection) -> Response {
        let message = self
            .quota_message
            .replace("{limit}", &rejection.limit.to_string())
            .replace("{period}", &rejection.period);

        let mut response = Response::error(StatusCode::TOO_MANY_REQUESTS, &message);
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(rejection.retry_after_secs()));
        response
    }

    fn add_quota_headers(response: &mut Response, quota: &Quota) {
        let until_reset = quota.reset_at.saturating_duration_since(Instant::now());
        let reset = Utc::now()
            + chrono::Duration::from_std(until_reset).unwrap_or_else(|_| chrono::Duration::zero());

        let headers = response.headers_mut();
        headers.insert(headers::LIMIT, HeaderValue::from(quota.limit));
        headers.insert(headers::REMAINING, HeaderValue::from(quota.remaining));
        if let Ok(value) = HeaderValue::from_str(&reset.to_rfc3339_opts(SecondsFormat::Millis, true)) {
            headers.insert(headers::RESET, value);
        }
    }
}

impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &'static str {
        "rate-limit"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, PipelineResult> {
        Box::pin(async move {
            let identity = ctx.identity().key();
            let path = ctx.full_path(request.uri().path());

            let decision = match self.limiter.evaluate(&identity, request.method(), &path) {
                Ok(decision) => decision,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        client = %identity,
                        "Rate limit check failed, letting request through"
                    );
                    return next.run(ctx, request).await;
                }
            };

            match decision {
                Decision::Reject(rejection) => {
                    tracing::info!(
                        client = %identity,
                        http.method = %request.method(),
                        http.path = %path,
                        retry_after_secs = rejection.retry_after_secs(),
                        "Request rate limited"
                    );
                    Ok(self.quota_exceeded(&rejection))
                }
                Decision::Allow(quota) => {
                    let mut response = next.run(ctx, request).await?;
                    if let (true, Some(quota)) = (self.emit_headers, quota) {
                        Self::add_quota_headers(&mut response, &quota);
                    }
                    Ok(response)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Pipeline;
    use crate::ratelimit::{CounterKey, CounterLease, CounterStoreError, MemoryCounterStore, RateLimitRule};
    use crate::types::body_bytes;
    use bytes::Bytes;
    use http::Request as HttpRequest;
    use http_body_util::Full;
    use sluice_config::RateLimitRuleConfig;
    use std::time::Duration;

    fn request(uri: &str) -> Request {
        HttpRequest::builder()
            .uri(uri)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    fn ctx(ip: &str) -> MiddlewareContext {
        MiddlewareContext::new().with_peer_addr(format!("{ip}:5000").parse().unwrap())
    }

    fn pipeline(stage: RateLimitMiddleware) -> Pipeline {
        Pipeline::builder()
            .use_middleware(stage)
            .run(|_ctx, _req| async { Ok(Response::text(StatusCode::OK, "OK")) })
            .build()
    }

    fn stage(limit: u64, period: &str) -> RateLimitMiddleware {
        let config = RateLimitingConfig {
            rules: vec![RateLimitRuleConfig::new("*", limit, period)],
            ..RateLimitingConfig::default()
        };
        RateLimitMiddleware::from_config(&config, Arc::new(MemoryCounterStore::new())).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_response() {
        let pipeline = pipeline(stage(1, "1s"));

        let ok = pipeline.handle(&mut ctx("10.0.0.1"), request("/a")).await.unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        assert!(ok.headers().get(headers::LIMIT).is_none());

        tokio::time::advance(Duration::from_millis(400)).await;
        let limited = pipeline.handle(&mut ctx("10.0.0.1"), request("/a")).await.unwrap();
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(limited.headers().get(RETRY_AFTER).unwrap(), "1");

        let body: serde_json::Value = serde_json::from_slice(&body_bytes(limited).await).unwrap();
        assert_eq!(body["statusCode"], 429);
        assert_eq!(
            body["message"],
            "API calls quota exceeded! maximum admitted 1 per 1s."
        );
    }

    #[tokio::test]
    async fn test_quota_headers() {
        let pipeline = pipeline(stage(5, "1m").with_headers(true));

        let response = pipeline.handle(&mut ctx("10.0.0.2"), request("/")).await.unwrap();
        assert_eq!(response.headers().get(headers::LIMIT).unwrap(), "5");
        assert_eq!(response.headers().get(headers::REMAINING).unwrap(), "4");

        let reset = response.headers().get(headers::RESET).unwrap().to_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(reset).is_ok());
    }

    #[tokio::test]
    async fn test_custom_message() {
        let pipeline = pipeline(stage(1, "1h").with_quota_message("{limit} per {period} max"));

        pipeline.handle(&mut ctx("10.0.0.3"), request("/")).await.unwrap();
        let limited = pipeline.handle(&mut ctx("10.0.0.3"), request("/")).await.unwrap();

        let body: serde_json::Value = serde_json::from_slice(&body_bytes(limited).await).unwrap();
        assert_eq!(body["message"], "1 per 1h max");
    }

    #[tokio::test]
    async fn test_full_path_inside_branch() {
        let limiter = RateLimiter::new(
            vec![RateLimitRule::new("/usingmapbranch/x", 1, Duration::from_secs(60)).unwrap()],
            Arc::new(MemoryCounterStore::new()),
        );
        let stage = RateLimitMiddleware::new(Arc::new(limiter));
        let pipeline = Pipeline::builder()
            .map("/usingmapbranch", |b| {
                b.use_middleware(stage)
                    .run(|_ctx, _req| async { Ok(Response::text(StatusCode::OK, "branch")) })
            })
            .build();

        let first = pipeline
            .handle(&mut ctx("10.0.0.4"), request("/usingmapbranch/x"))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = pipeline
            .handle(&mut ctx("10.0.0.4"), request("/usingmapbranch/x"))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    struct BrokenStore;

    impl CounterStore for BrokenStore {
        fn acquire(&self, _key: &CounterKey, _now: Instant) -> Result<CounterLease, CounterStoreError> {
            Err(CounterStoreError::Unavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_store_failure_fails_open() {
        let limiter = RateLimiter::new(
            vec![RateLimitRule::new("*", 1, Duration::from_secs(1)).unwrap()],
            Arc::new(BrokenStore),
        );
        let pipeline = pipeline(RateLimitMiddleware::new(Arc::new(limiter)));

        for _ in 0..3 {
            let response = pipeline.handle(&mut ctx("10.0.0.5"), request("/")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }
}
