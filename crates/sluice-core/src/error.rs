//! The structured error body.
//!
//! Every response the pipeline generates on its own behalf (rate-limit
//! rejections, contained failures, the default not-found terminal) carries
//! the same JSON body:
//!
//! ```json
//! { "statusCode": 429, "message": "API calls quota exceeded!" }
//! ```
//!
//! The message is always a human-readable summary. Stack traces and error
//! chains are logged server side and never serialized into the envelope.

use http::StatusCode;
use serde::{Deserialize, Serialize};

/// Serializable `{statusCode, message}` error body.
///
/// # Example
///
/// ```
/// use http::StatusCode;
/// use sluice_core::ErrorEnvelope;
///
/// let envelope = ErrorEnvelope::new(StatusCode::TOO_MANY_REQUESTS, "slow down");
/// assert_eq!(envelope.to_json(), r#"{"statusCode":429,"message":"slow down"}"#);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    /// The HTTP status code, repeated in the body for clients that only see it.
    pub status_code: u16,
    /// Human-readable error message.
    pub message: String,
}

impl ErrorEnvelope {
    /// Creates an envelope for the given status.
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status_code: status.as_u16(),
            message: message.into(),
        }
    }

    /// Creates a `500 Internal Server Error` envelope.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// Returns the status code as a [`StatusCode`].
    ///
    /// Falls back to `500` if the stored code is out of range, which can only
    /// happen for envelopes deserialized from untrusted input.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Serializes the envelope to compact JSON.
    #[must_use]
    pub fn to_json(&self) -> String {
        // Two plain fields cannot fail to serialize.
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"statusCode":{},"message":""}}"#, self.status_code)
        })
    }
}
