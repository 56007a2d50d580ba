//! Core middleware trait and types.
//!
//! This module defines the [`Middleware`] trait that every pipeline unit
//! implements, the [`Next`] continuation a unit calls to run the rest of the
//! chain, and the [`Handler`] trait for terminal handlers.
//!
//! # Example
//!
//! ```
//! use sluice_middleware::{BoxFuture, Middleware, Next, PipelineResult, Request};
//! use sluice_middleware::context::MiddlewareContext;
//!
//! struct Timing;
//!
//! impl Middleware for Timing {
//!     fn name(&self) -> &'static str {
//!         "timing"
//!     }
//!
//!     fn process<'a>(
//!         &'a self,
//!         ctx: &'a mut MiddlewareContext,
//!         request: Request,
//!         next: Next<'a>,
//!     ) -> BoxFuture<'a, PipelineResult> {
//!         Box::pin(async move {
//!             let response = next.run(ctx, request).await?;
//!             tracing::debug!(elapsed_ms = ctx.elapsed().as_millis() as u64, "done");
//!             Ok(response)
//!         })
//!     }
//! }
//! ```

use crate::context::MiddlewareContext;
use crate::pipeline::Link;
use crate::types::{PipelineResult, Request};
use std::future::Future;
use std::pin::Pin;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One unit of the pipeline.
///
/// A unit receives the request context, the request, and a [`Next`]
/// continuation. Code before `next.run(..)` runs on the way in; code after it
/// runs on the way out, in reverse registration order. A unit that returns
/// without calling `next` short-circuits: nothing after it runs.
///
/// Units are shared by every request for the lifetime of the pipeline, so
/// they hold no per-request state; collaborators they close over must be
/// thread-safe.
pub trait Middleware: Send + Sync + 'static {
    /// Returns the name of this unit, used in logs and introspection.
    fn name(&self) -> &'static str;

    /// Processes the request.
    ///
    /// Returning `Err` reports an unexpected fault; it propagates to the
    /// exception containment stage.
    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, PipelineResult>;
}

/// The terminal handler at the end of a pipeline.
///
/// Stands in for controller dispatch. Closures of the form
/// `|ctx, request| async move { .. }` implement it through
/// [`PipelineBuilder::run`](crate::PipelineBuilder::run).
pub trait Handler: Send + Sync + 'static {
    /// Produces the response for a request that reached the end of the chain.
    fn call<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
    ) -> BoxFuture<'a, PipelineResult>;
}

/// Continuation that runs the remainder of the pipeline.
///
/// `Next` is a cursor over the pipeline's links: running it hands the
/// request to the next unit (or branch dispatch point, or the terminal
/// handler) together with a `Next` for the position after that. It is
/// consumed by [`run`](Self::run), so a unit can continue at most once.
pub struct Next<'a> {
    links: &'a [Link],
    terminal: &'a dyn Handler,
}

impl<'a> Next<'a> {
    pub(crate) fn new(links: &'a [Link], terminal: &'a dyn Handler) -> Self {
        Self { links, terminal }
    }

    /// Runs the rest of the pipeline.
    ///
    /// At a branch dispatch point the branches are tried once, in
    /// registration order; the first match replaces the remainder of this
    /// chain, otherwise the chain continues past the dispatch point.
    pub fn run<'c>(
        self,
        ctx: &'c mut MiddlewareContext,
        request: Request,
    ) -> BoxFuture<'c, PipelineResult>
    where
        'a: 'c,
    {
        let Some((link, rest)) = self.links.split_first() else {
            return self.terminal.call(ctx, request);
        };
        let next = Next::new(rest, self.terminal);

        match link {
            Link::Unit(unit) => unit.process(ctx, request, next),
            Link::Dispatch(branches) => {
                for branch in branches {
                    if let Some(selected) = branch.select(ctx, &request) {
                        return branch.enter(selected, ctx, request);
                    }
                }
                next.run(ctx, request)
            }
        }
    }

    /// Returns the number of links left before the terminal handler.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.links.len()
    }
}

impl std::fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.links.len())
            .finish_non_exhaustive()
    }
}

/// A unit defined inline by a closure.
///
/// The closure receives the same arguments as
/// [`Middleware::process`] and returns a boxed future.
///
/// # Example
///
/// ```
/// use sluice_middleware::FnMiddleware;
///
/// let unit = FnMiddleware::new("before-after", |ctx, req, next| {
///     Box::pin(async move {
///         tracing::info!("Logic before executing the next delegate");
///         let response = next.run(ctx, req).await;
///         tracing::info!("Logic after executing the next delegate");
///         response
///     })
/// });
/// ```
pub struct FnMiddleware<F> {
    name: &'static str,
    func: F,
}

impl<F> FnMiddleware<F>
where
    F: for<'a> Fn(&'a mut MiddlewareContext, Request, Next<'a>) -> BoxFuture<'a, PipelineResult>
        + Send
        + Sync
        + 'static,
{
    /// Creates a new function-based unit.
    pub const fn new(name: &'static str, func: F) -> Self {
        Self { name, func }
    }
}

impl<F> Middleware for FnMiddleware<F>
where
    F: for<'a> Fn(&'a mut MiddlewareContext, Request, Next<'a>) -> BoxFuture<'a, PipelineResult>
        + Send
        + Sync
        + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, PipelineResult> {
        (self.func)(ctx, request, next)
    }
}

/// Adapts a closure returning a `'static` future into a [`Handler`].
pub(crate) struct FnHandler<F>(pub(crate) F);

impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(&mut MiddlewareContext, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PipelineResult> + Send + 'static,
{
    fn call<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
    ) -> BoxFuture<'a, PipelineResult> {
        Box::pin((self.0)(ctx, request))
    }
}
