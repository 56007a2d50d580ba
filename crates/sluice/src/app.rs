//! Standard application wiring.
//!
//! [`App`] turns a validated [`SluiceConfig`] into the standard pipeline and
//! runs it behind the HTTP server, together with the background sweep that
//! evicts idle rate-limit counters.
//!
//! The standard pipeline, outermost first:
//!
//! ```text
//! exception containment → request id → forwarded headers → rate limit
//!   → CORS → authorization → request logging
//!   → map("/usingmapbranch") | map_when(?testquerystring) | terminal
//! ```
//!
//! Forwarded headers, rate limiting and CORS are skipped when disabled in
//! their configuration sections.

use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use sluice_config::SluiceConfig;
use sluice_middleware::ratelimit::{CounterStore, MemoryCounterStore};
use sluice_middleware::stages::{
    AllowAll, AuthorizationMiddleware, Authorizer, CorsMiddleware,
    ExceptionContainmentMiddleware, ForwardedHeadersMiddleware, RateLimitMiddleware,
    RequestIdMiddleware, RequestLoggingMiddleware,
};
use sluice_middleware::{Pipeline, Request, Response, ResponseExt};
use sluice_server::{Server, ServerConfig, ShutdownSignal};
use tokio::task::JoinHandle;

use crate::error::AppError;

/// Path prefix of the demonstration `map` branch.
pub const MAP_BRANCH_PREFIX: &str = "/usingmapbranch";

/// Query key that selects the demonstration `map_when` branch.
pub const QUERY_BRANCH_KEY: &str = "testquerystring";

/// A configured application: pipeline, counter store and server settings.
pub struct App {
    config: SluiceConfig,
    store: Arc<MemoryCounterStore>,
    pipeline: Pipeline,
}

impl App {
    /// Builds the application with the allow-all authorization policy.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Rule`] if a rate-limit rule is invalid.
    pub fn from_config(config: SluiceConfig) -> Result<Self, AppError> {
        Self::with_authorizer(config, Arc::new(AllowAll))
    }

    /// Builds the application with a custom authorization policy.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Rule`] if a rate-limit rule is invalid.
    pub fn with_authorizer(
        config: SluiceConfig,
        authorizer: Arc<dyn Authorizer>,
    ) -> Result<Self, AppError> {
        let store = Arc::new(MemoryCounterStore::with_eviction_multiplier(
            config.rate_limiting.eviction_multiplier,
        ));
        let pipeline = standard_pipeline(&config, store.clone(), authorizer)?;
        Ok(Self {
            config,
            store,
            pipeline,
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &SluiceConfig {
        &self.config
    }

    /// Returns the pipeline.
    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Returns the rate-limit counter store.
    #[must_use]
    pub fn store(&self) -> &Arc<MemoryCounterStore> {
        &self.store
    }

    /// Runs until SIGTERM or SIGINT.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Server`] if the server cannot start.
    pub async fn run(self) -> Result<(), AppError> {
        self.run_with_shutdown(ShutdownSignal::with_os_signals()).await
    }

    /// Runs until `shutdown` is triggered.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Server`] if the server cannot start.
    pub async fn run_with_shutdown(self, shutdown: ShutdownSignal) -> Result<(), AppError> {
        let sweeper = self.sweep_interval().map(|every| {
            spawn_sweeper(self.store.clone(), every, shutdown.clone())
        });

        let server = Server::new(ServerConfig::from(&self.config.server), self.pipeline);
        let result = server.run_with_shutdown(shutdown.clone()).await;

        // Stops the sweeper when the server failed to start.
        shutdown.trigger();
        if let Some(sweeper) = sweeper {
            join_sweeper(sweeper).await;
        }

        result.map_err(AppError::from)
    }

    fn sweep_interval(&self) -> Option<Duration> {
        let section = &self.config.rate_limiting;
        (section.enabled && section.sweep_interval_secs > 0)
            .then(|| Duration::from_secs(section.sweep_interval_secs))
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("pipeline", &self.pipeline)
            .field("counters", &self.store.len())
            .finish_non_exhaustive()
    }
}

/// Builds the standard pipeline from configuration.
///
/// # Errors
///
/// Returns [`AppError::Rule`] if a rate-limit rule is invalid.
pub fn standard_pipeline(
    config: &SluiceConfig,
    store: Arc<dyn CounterStore>,
    authorizer: Arc<dyn Authorizer>,
) -> Result<Pipeline, AppError> {
    let mut builder = Pipeline::builder()
        .use_middleware(ExceptionContainmentMiddleware::new())
        .use_middleware(RequestIdMiddleware::new());

    if config.forwarded_headers.enabled {
        builder = builder.use_middleware(ForwardedHeadersMiddleware::from_config(
            &config.forwarded_headers,
        ));
    }
    if config.rate_limiting.enabled {
        builder =
            builder.use_middleware(RateLimitMiddleware::from_config(&config.rate_limiting, store)?);
    }
    if config.cors.enabled {
        builder = builder.use_middleware(CorsMiddleware::from_config(&config.cors));
    }

    let pipeline = builder
        .use_middleware(AuthorizationMiddleware::new(authorizer))
        .use_middleware(RequestLoggingMiddleware::new())
        .map(MAP_BRANCH_PREFIX, |branch| {
            branch
                .use_fn("map-branch-logging", |ctx, req, next| {
                    Box::pin(async move {
                        tracing::info!("Map branch logic before the next unit");
                        let response = next.run(ctx, req).await;
                        tracing::info!("Map branch logic after the next unit");
                        response
                    })
                })
                .run(|_ctx, _req| async {
                    tracing::info!("Map branch response to the client");
                    Ok(Response::text(StatusCode::OK, "Hello from the map branch."))
                })
        })
        .map_when(
            |_ctx, req| has_query_key(req, QUERY_BRANCH_KEY),
            |branch| {
                branch.run(|_ctx, _req| async {
                    Ok(Response::text(StatusCode::OK, "Hello from the MapWhen branch."))
                })
            },
        )
        .run(|_ctx, _req| async {
            Ok(Response::text(StatusCode::OK, "Hello from the middleware component."))
        })
        .build();

    Ok(pipeline)
}

/// Whether the query string has `key`, compared case-insensitively.
fn has_query_key(request: &Request, key: &str) -> bool {
    request.uri().query().map_or(false, |query| {
        query
            .split('&')
            .map(|pair| pair.split_once('=').map_or(pair, |(name, _)| name))
            .any(|name| name.eq_ignore_ascii_case(key))
    })
}

/// Periodically evicts idle counters until `shutdown` fires.
pub fn spawn_sweeper(
    store: Arc<MemoryCounterStore>,
    every: Duration,
    shutdown: ShutdownSignal,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                now = ticker.tick() => {
                    let evicted = store.sweep(now);
                    if evicted > 0 {
                        tracing::debug!(evicted, remaining = store.len(), "Swept idle rate-limit counters");
                    }
                }
                () = shutdown.recv() => break,
            }
        }
    })
}

/// Waits for the sweeper to stop. Returns `false`, after logging, if it
/// panicked or was cancelled.
async fn join_sweeper(sweeper: JoinHandle<()>) -> bool {
    match sweeper.await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, panicked = e.is_panic(), "Counter sweeper ended abnormally");
            false
        }
    }
}
