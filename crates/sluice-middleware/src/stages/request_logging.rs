//! Request logging middleware.
//!
//! Logs once before handing the request on and once after the response
//! comes back, so the two lines bracket everything registered after this
//! unit.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{PipelineResult, Request};
use sluice_telemetry::{LogSink, Severity, TracingLogSink};
use std::sync::Arc;

/// Middleware that logs around the rest of the chain.
#[derive(Clone)]
pub struct RequestLoggingMiddleware {
    sink: Arc<dyn LogSink>,
}

impl RequestLoggingMiddleware {
    /// Creates the stage logging through `tracing`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_sink(Arc::new(TracingLogSink::new("request")))
    }

    /// Creates the stage logging through `sink`.
    #[must_use]
    pub fn with_sink(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }
}

impl Default for RequestLoggingMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RequestLoggingMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestLoggingMiddleware").finish_non_exhaustive()
    }
}

impl Middleware for RequestLoggingMiddleware {
    fn name(&self) -> &'static str {
        "request-logging"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, PipelineResult> {
        Box::pin(async move {
            let method = request.method().clone();
            let path = ctx.full_path(request.uri().path());
            let request_id = ctx.request_id();

            self.sink.log(
                Severity::Info,
                &format!("--> {method} {path} request_id={request_id} client={}", ctx.identity()),
                None,
            );

            let result = next.run(ctx, request).await;

            let elapsed_ms = ctx.elapsed().as_millis();
            match &result {
                Ok(response) => self.sink.log(
                    Severity::Info,
                    &format!(
                        "<-- {method} {path} {} {elapsed_ms}ms request_id={request_id}",
                        response.status().as_u16()
                    ),
                    None,
                ),
                Err(error) => self.sink.log(
                    Severity::Warn,
                    &format!("<-- {method} {path} failed {elapsed_ms}ms request_id={request_id}"),
                    Some(&**error),
                ),
            }

            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Pipeline;
    use crate::types::{Response, ResponseExt};
    use bytes::Bytes;
    use http::{Request as HttpRequest, StatusCode};
    use http_body_util::Full;
    use sluice_telemetry::RecordingLogSink;

    fn request(uri: &str) -> Request {
        HttpRequest::builder()
            .method("POST")
            .uri(uri)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_logs_before_and_after() {
        let sink = Arc::new(RecordingLogSink::new());
        let pipeline = Pipeline::builder()
            .use_middleware(RequestLoggingMiddleware::with_sink(sink.clone()))
            .run(|_ctx, _req| async { Ok(Response::text(StatusCode::ACCEPTED, "ok")) })
            .build();

        pipeline
            .handle(&mut MiddlewareContext::new(), request("/api/values"))
            .await
            .unwrap();

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert!(records[0].message.starts_with("--> POST /api/values"));
        assert!(records[1].message.starts_with("<-- POST /api/values 202"));
    }

    #[tokio::test]
    async fn test_failure_logged_and_propagated() {
        let sink = Arc::new(RecordingLogSink::new());
        let pipeline = Pipeline::builder()
            .use_middleware(RequestLoggingMiddleware::with_sink(sink.clone()))
            .run(|_ctx, _req| async { Err(anyhow::anyhow!("nope")) })
            .build();

        let result = pipeline
            .handle(&mut MiddlewareContext::new(), request("/x"))
            .await;

        assert!(result.is_err());
        let warnings = sink.at(Severity::Warn);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].error.as_deref(), Some("nope"));
    }
}
