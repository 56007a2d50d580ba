//! Exception containment middleware.
//!
//! Register this unit first. It runs the whole remaining chain, branches
//! included, and turns any failure that escapes it (an `Err` or a panic)
//! into a `500 Internal Server Error` carrying the `{statusCode, message}`
//! envelope. The failure is reported to a [`LogSink`]; a sink that fails
//! while reporting is ignored. Nothing is re-raised.
//!
//! The envelope message is the failure's own message. Stack traces and
//! error chains go to the log only.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{PipelineResult, Request, Response, ResponseExt};
use futures_util::FutureExt;
use sluice_core::ErrorEnvelope;
use sluice_telemetry::{LogSink, Severity, TracingLogSink};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Message used when a panic payload is not a string.
const UNKNOWN_PANIC: &str = "Internal Server Error";

/// Middleware that contains failures of the rest of the pipeline.
#[derive(Clone)]
pub struct ExceptionContainmentMiddleware {
    sink: Arc<dyn LogSink>,
}

impl ExceptionContainmentMiddleware {
    /// Creates the stage logging through `tracing`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_sink(Arc::new(TracingLogSink::new("exception")))
    }

    /// Creates the stage logging through `sink`.
    #[must_use]
    pub fn with_sink(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }

    fn report(&self, ctx: &MiddlewareContext, failure: &Failure) {
        let message = format!(
            "Unhandled failure for request {} from {}: {}",
            ctx.request_id(),
            ctx.identity(),
            failure.message()
        );
        let sink = &self.sink;
        let logged = std::panic::catch_unwind(AssertUnwindSafe(|| match failure {
            Failure::Error(error) => sink.log(Severity::Error, &message, Some(&**error)),
            Failure::Panic(_) => sink.log(Severity::Error, &message, None),
        }));
        if logged.is_err() {
            tracing::debug!("log sink failed while reporting a contained failure");
        }
    }
}

impl Default for ExceptionContainmentMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExceptionContainmentMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExceptionContainmentMiddleware").finish_non_exhaustive()
    }
}

enum Failure {
    Error(anyhow::Error),
    Panic(String),
}

impl Failure {
    fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| UNKNOWN_PANIC.to_string());
        Self::Panic(message)
    }

    fn message(&self) -> String {
        match self {
            Self::Error(error) => error.to_string(),
            Self::Panic(message) => message.clone(),
        }
    }
}

impl Middleware for ExceptionContainmentMiddleware {
    fn name(&self) -> &'static str {
        "exception-containment"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, PipelineResult> {
        Box::pin(async move {
            let outcome = AssertUnwindSafe(next.run(ctx, request)).catch_unwind().await;

            let failure = match outcome {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(error)) => Failure::Error(error),
                Err(payload) => Failure::from_panic(payload.as_ref()),
            };

            self.report(ctx, &failure);
            Ok(Response::envelope(&ErrorEnvelope::internal(failure.message())))
        })
    }
}
