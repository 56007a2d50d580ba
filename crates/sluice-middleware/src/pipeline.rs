//! Ordered middleware pipeline with branch dispatch.
//!
//! A [`Pipeline`] is an ordered list of links followed by a terminal
//! handler. A link is either a single unit or a dispatch point holding one
//! or more branches. Registration order is execution order: there is no
//! priority system and nothing reorders the chain after [`build`].
//!
//! ## Branches
//!
//! - [`PipelineBuilder::map`] selects a branch when the request path starts
//!   with a prefix at a segment boundary. The prefix moves from the path into
//!   [`MiddlewareContext::path_base`] while the branch runs.
//! - [`PipelineBuilder::map_when`] selects a branch with an arbitrary
//!   predicate and leaves the path alone.
//!
//! Consecutive `map`/`map_when` calls share one dispatch point. Its branches
//! are tried once, in registration order; the first match runs its own
//! pipeline in place of the rest of the primary chain. With no match the
//! request continues past the dispatch point.
//!
//! [`build`]: PipelineBuilder::build
//!
//! # Example
//!
//! ```
//! use http::StatusCode;
//! use sluice_middleware::{Pipeline, Response, ResponseExt};
//!
//! let pipeline = Pipeline::builder()
//!     .use_fn("noop", |ctx, req, next| next.run(ctx, req))
//!     .map("/usingmapbranch", |branch| {
//!         branch.run(|_ctx, _req| async { Ok(Response::text(StatusCode::OK, "mapped")) })
//!     })
//!     .run(|_ctx, _req| async { Ok(Response::text(StatusCode::OK, "main")) })
//!     .build();
//!
//! assert_eq!(pipeline.unit_names(), ["noop"]);
//! assert_eq!(pipeline.branch_count(), 1);
//! ```

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, FnHandler, FnMiddleware, Handler, Middleware, Next};
use crate::types::{PipelineResult, Request, Response, ResponseExt};
use http::uri::{PathAndQuery, Uri};
use http::StatusCode;
use std::future::Future;
use std::sync::Arc;

/// A type-erased middleware that can be stored in a vector.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// Predicate selecting a `map_when` branch.
pub type BranchPredicate = Arc<dyn Fn(&MiddlewareContext, &Request) -> bool + Send + Sync>;

/// One position in a pipeline.
pub(crate) enum Link {
    /// A single unit.
    Unit(BoxedMiddleware),
    /// A dispatch point; branches in registration order.
    Dispatch(Vec<Branch>),
}

enum BranchMatcher {
    /// Normalised: leading `/`, no trailing `/`.
    Prefix(String),
    Predicate(BranchPredicate),
}

/// How a branch matched a request.
pub(crate) enum BranchMatch {
    Predicate,
    Prefix { matched: String, remainder: String },
}

/// A nested pipeline and the rule that selects it.
pub(crate) struct Branch {
    matcher: BranchMatcher,
    pipeline: Pipeline,
}

impl Branch {
    /// Tests the branch against a request.
    pub(crate) fn select(&self, ctx: &MiddlewareContext, request: &Request) -> Option<BranchMatch> {
        match &self.matcher {
            BranchMatcher::Predicate(predicate) => {
                predicate(ctx, request).then_some(BranchMatch::Predicate)
            }
            BranchMatcher::Prefix(prefix) => {
                let path = request.uri().path();
                let remainder = strip_segment_prefix(path, prefix)?;
                Some(BranchMatch::Prefix {
                    matched: path[..path.len() - remainder.len()].to_string(),
                    remainder: if remainder.is_empty() {
                        "/".to_string()
                    } else {
                        remainder.to_string()
                    },
                })
            }
        }
    }

    /// Runs the branch pipeline for a request it matched.
    pub(crate) fn enter<'c>(
        &'c self,
        selected: BranchMatch,
        ctx: &'c mut MiddlewareContext,
        request: Request,
    ) -> BoxFuture<'c, PipelineResult> {
        match selected {
            BranchMatch::Predicate => self.pipeline.entry().run(ctx, request),
            BranchMatch::Prefix { matched, remainder } => Box::pin(async move {
                let request = rewrite_path(request, &remainder)?;
                let base = format!("{}{matched}", ctx.path_base());
                let previous = ctx.replace_path_base(base);

                let result = self.pipeline.entry().run(ctx, request).await;

                ctx.replace_path_base(previous);
                result
            }),
        }
    }
}

/// Returns the rest of `path` if it starts with `prefix` at a segment
/// boundary, comparing ASCII case-insensitively.
fn strip_segment_prefix<'p>(path: &'p str, prefix: &str) -> Option<&'p str> {
    let head = path.get(..prefix.len())?;
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    let rest = &path[prefix.len()..];
    (rest.is_empty() || rest.starts_with('/')).then_some(rest)
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_end_matches('/');
    if trimmed.is_empty() || trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Replaces the request path, keeping the query string.
fn rewrite_path(request: Request, path: &str) -> anyhow::Result<Request> {
    let (mut parts, body) = request.into_parts();

    let path_and_query = match parts.uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    };

    let mut uri_parts = parts.uri.into_parts();
    uri_parts.path_and_query = Some(PathAndQuery::try_from(path_and_query)?);
    parts.uri = Uri::from_parts(uri_parts)?;

    Ok(Request::from_parts(parts, body))
}

/// Terminal handler used when none is configured.
struct NotFound;

impl Handler for NotFound {
    fn call<'a>(
        &'a self,
        _ctx: &'a mut MiddlewareContext,
        _request: Request,
    ) -> BoxFuture<'a, PipelineResult> {
        Box::pin(async { Ok(Response::error(StatusCode::NOT_FOUND, "Not Found")) })
    }
}

/// An immutable, reusable middleware pipeline.
///
/// Built once at startup and shared by every request, typically behind an
/// `Arc`. Each request supplies its own [`MiddlewareContext`].
pub struct Pipeline {
    links: Vec<Link>,
    terminal: Option<Box<dyn Handler>>,
}

impl Pipeline {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Processes a request through the pipeline.
    ///
    /// # Errors
    ///
    /// Returns the failure of any unit or the terminal handler that was not
    /// contained inside the chain.
    pub async fn handle(&self, ctx: &mut MiddlewareContext, request: Request) -> PipelineResult {
        self.entry().run(ctx, request).await
    }

    /// Returns a continuation positioned at the start of the pipeline.
    #[must_use]
    pub fn entry(&self) -> Next<'_> {
        let terminal: &dyn Handler = match &self.terminal {
            Some(handler) => handler.as_ref(),
            None => &NotFound,
        };
        Next::new(&self.links, terminal)
    }

    /// Returns the names of the primary chain's units in order.
    #[must_use]
    pub fn unit_names(&self) -> Vec<&'static str> {
        self.links
            .iter()
            .filter_map(|link| match link {
                Link::Unit(unit) => Some(unit.name()),
                Link::Dispatch(_) => None,
            })
            .collect()
    }

    /// Returns the number of branches registered on the primary chain.
    #[must_use]
    pub fn branch_count(&self) -> usize {
        self.links
            .iter()
            .map(|link| match link {
                Link::Unit(_) => 0,
                Link::Dispatch(branches) => branches.len(),
            })
            .sum()
    }

    /// Returns true if a terminal handler was configured.
    #[must_use]
    pub fn has_terminal(&self) -> bool {
        self.terminal.is_some()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("units", &self.unit_names())
            .field("branches", &self.branch_count())
            .field("has_terminal", &self.has_terminal())
            .finish()
    }
}

/// Builder for constructing a [`Pipeline`].
pub struct PipelineBuilder {
    links: Vec<Link>,
    terminal: Option<Box<dyn Handler>>,
}

impl PipelineBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            links: Vec::new(),
            terminal: None,
        }
    }

    /// Appends a unit to the chain.
    #[must_use]
    pub fn use_middleware<M: Middleware>(self, middleware: M) -> Self {
        self.use_shared(Arc::new(middleware))
    }

    /// Appends an already shared unit to the chain.
    #[must_use]
    pub fn use_shared(mut self, middleware: BoxedMiddleware) -> Self {
        self.links.push(Link::Unit(middleware));
        self
    }

    /// Appends an inline unit defined by a closure.
    #[must_use]
    pub fn use_fn<F>(self, name: &'static str, func: F) -> Self
    where
        F: for<'a> Fn(&'a mut MiddlewareContext, Request, Next<'a>) -> BoxFuture<'a, PipelineResult>
            + Send
            + Sync
            + 'static,
    {
        self.use_middleware(FnMiddleware::new(name, func))
    }

    /// Registers a branch taken when the path starts with `prefix`.
    ///
    /// Matching is ASCII case-insensitive and stops at segment boundaries:
    /// `/api` matches `/api` and `/api/x` but not `/apix`.
    #[must_use]
    pub fn map<C>(self, prefix: &str, configure: C) -> Self
    where
        C: FnOnce(PipelineBuilder) -> PipelineBuilder,
    {
        let matcher = BranchMatcher::Prefix(normalize_prefix(prefix));
        self.branch(matcher, configure)
    }

    /// Registers a branch taken when `predicate` returns true.
    #[must_use]
    pub fn map_when<P, C>(self, predicate: P, configure: C) -> Self
    where
        P: Fn(&MiddlewareContext, &Request) -> bool + Send + Sync + 'static,
        C: FnOnce(PipelineBuilder) -> PipelineBuilder,
    {
        self.branch(BranchMatcher::Predicate(Arc::new(predicate)), configure)
    }

    fn branch<C>(mut self, matcher: BranchMatcher, configure: C) -> Self
    where
        C: FnOnce(PipelineBuilder) -> PipelineBuilder,
    {
        let branch = Branch {
            matcher,
            pipeline: configure(PipelineBuilder::new()).build(),
        };

        match self.links.last_mut() {
            Some(Link::Dispatch(branches)) => branches.push(branch),
            _ => self.links.push(Link::Dispatch(vec![branch])),
        }
        self
    }

    /// Sets the terminal handler from a closure.
    ///
    /// The returned future must not borrow the context; copy out what it
    /// needs first.
    #[must_use]
    pub fn run<F, Fut>(self, handler: F) -> Self
    where
        F: Fn(&mut MiddlewareContext, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PipelineResult> + Send + 'static,
    {
        self.run_handler(FnHandler(handler))
    }

    /// Sets the terminal handler.
    #[must_use]
    pub fn run_handler<H: Handler>(mut self, handler: H) -> Self {
        self.terminal = Some(Box::new(handler));
        self
    }

    /// Builds the pipeline.
    #[must_use]
    pub fn build(self) -> Pipeline {
        Pipeline {
            links: self.links,
            terminal: self.terminal,
        }
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
