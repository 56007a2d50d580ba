//! Common types used throughout the middleware pipeline.

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use http_body_util::Full;
use sluice_core::ErrorEnvelope;

/// The HTTP request type used in the middleware pipeline.
///
/// This is a standard `http::Request` with a `Full<Bytes>` body.
pub type Request = http::Request<Full<Bytes>>;

/// The HTTP response type used in the middleware pipeline.
///
/// This is a standard `http::Response` with a `Full<Bytes>` body.
pub type Response = http::Response<Full<Bytes>>;

/// What a unit or terminal handler produces.
///
/// `Err` is an unexpected fault. It propagates outward until the exception
/// containment stage turns it into a `500` envelope.
pub type PipelineResult = anyhow::Result<Response>;

/// Extension trait for building responses without fallible builders.
pub trait ResponseExt {
    /// Creates a JSON response carrying the `{statusCode, message}` envelope.
    fn envelope(envelope: &ErrorEnvelope) -> Response;

    /// Creates an envelope response with the given status code and message.
    fn error(status: StatusCode, message: &str) -> Response;

    /// Creates a `text/plain` response.
    fn text(status: StatusCode, body: impl Into<Bytes>) -> Response;

    /// Creates a response with an empty body.
    fn empty(status: StatusCode) -> Response;
}

impl ResponseExt for Response {
    fn envelope(envelope: &ErrorEnvelope) -> Response {
        let mut response = http::Response::new(Full::new(Bytes::from(envelope.to_json())));
        *response.status_mut() = envelope.status();
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }

    fn error(status: StatusCode, message: &str) -> Response {
        Self::envelope(&ErrorEnvelope::new(status, message))
    }

    fn text(status: StatusCode, body: impl Into<Bytes>) -> Response {
        let mut response = http::Response::new(Full::new(body.into()));
        *response.status_mut() = status;
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }

    fn empty(status: StatusCode) -> Response {
        let mut response = http::Response::new(Full::new(Bytes::new()));
        *response.status_mut() = status;
        response
    }
}

/// Collects a response body into bytes.
///
/// `Full` bodies are already in memory, so this only fails if the body type
/// were ever changed to a streaming one.
pub async fn body_bytes(response: Response) -> Bytes {
    use http_body_util::BodyExt;

    match response.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(never) => match never {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_error_response_is_envelope() {
        let response = Response::error(StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );

        let body = body_bytes(response).await;
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["statusCode"], 429);
        assert_eq!(value["message"], "slow down");
    }

    #[tokio::test]
    async fn test_text_response() {
        let response = Response::text(StatusCode::OK, "hello");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
        assert_eq!(body_bytes(response).await, Bytes::from("hello"));
    }

    #[test]
    fn test_empty_response() {
        let response = Response::empty(StatusCode::NO_CONTENT);
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(response.headers().get(CONTENT_TYPE).is_none());
    }
}
