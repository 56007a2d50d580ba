//! Request ID middleware.
//!
//! Assigns each request its [`RequestId`] and echoes it in the
//! `X-Request-ID` response header so clients can quote it when reporting
//! problems. An incoming `X-Request-ID` is reused only when the stage is
//! configured to trust it and it parses as a UUID.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{PipelineResult, Request};
use http::HeaderValue;
use sluice_core::RequestId;

/// The header name for request ID propagation.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Middleware that generates or propagates request IDs.
#[derive(Debug, Clone, Default)]
pub struct RequestIdMiddleware {
    trust_incoming: bool,
}

impl RequestIdMiddleware {
    /// Always generates a fresh ID.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reuses a valid incoming `X-Request-ID`.
    ///
    /// Use behind a gateway that already assigns IDs.
    #[must_use]
    pub fn trust_incoming() -> Self {
        Self { trust_incoming: true }
    }

    fn incoming(&self, request: &Request) -> Option<RequestId> {
        if !self.trust_incoming {
            return None;
        }
        request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(RequestId::parse)
    }
}

impl Middleware for RequestIdMiddleware {
    fn name(&self) -> &'static str {
        "request-id"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, PipelineResult> {
        Box::pin(async move {
            if let Some(id) = self.incoming(&request) {
                ctx.set_request_id(id);
            }
            let request_id = ctx.request_id();

            let mut response = next.run(ctx, request).await?;

            if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
                response.headers_mut().insert(REQUEST_ID_HEADER, value);
            }
            Ok(response)
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

    fn pipeline(stage: RequestIdMiddleware) -> Pipeline {
        Pipeline::builder()
            .use_middleware(stage)
            .run(|_ctx, _req| async { Ok(Response::text(StatusCode::OK, "OK")) })
            .build()
    }

    fn request(id: Option<&str>) -> Request {
        let mut builder = HttpRequest::builder().uri("/test");
        if let Some(id) = id {
            builder = builder.header(REQUEST_ID_HEADER, id);
        }
        builder.body(Full::new(Bytes::new())).unwrap()
    }

    fn header(response: &Response) -> &str {
        response.headers().get(REQUEST_ID_HEADER).unwrap().to_str().unwrap()
    }

    #[tokio::test]
    async fn test_context_id_is_echoed() {
        let mut ctx = MiddlewareContext::new();
        let response = pipeline(RequestIdMiddleware::new())
            .handle(&mut ctx, request(None))
            .await
            .unwrap();

        assert_eq!(header(&response), ctx.request_id().to_string());
    }

    #[tokio::test]
    async fn test_incoming_id_ignored_unless_trusted() {
        let incoming = "01234567-89ab-7def-8123-456789abcdef";

        let response = pipeline(RequestIdMiddleware::new())
            .handle(&mut MiddlewareContext::new(), request(Some(incoming)))
            .await
            .unwrap();
        assert_ne!(header(&response), incoming);

        let mut ctx = MiddlewareContext::new();
        let response = pipeline(RequestIdMiddleware::trust_incoming())
            .handle(&mut ctx, request(Some(incoming)))
            .await
            .unwrap();
        assert_eq!(header(&response), incoming);
        assert_eq!(ctx.request_id().to_string(), incoming);
    }

    #[tokio::test]
    async fn test_invalid_incoming_id_replaced() {
        let response = pipeline(RequestIdMiddleware::trust_incoming())
            .handle(&mut MiddlewareContext::new(), request(Some("not-a-uuid")))
            .await
            .unwrap();
        assert!(RequestId::parse(header(&response)).is_some());
    }
}
