//! # Sluice
//!
//! A composable HTTP request pipeline with per-client, per-endpoint rate
//! limiting.
//!
//! This facade re-exports the workspace crates and provides [`App`], which
//! assembles the standard pipeline from a [`SluiceConfig`] and serves it.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sluice::{App, ConfigLoader};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), sluice::AppError> {
//!     let config = ConfigLoader::new()
//!         .with_optional_file("sluice.toml")?
//!         .with_env_prefix("SLUICE")
//!         .load()?;
//!
//!     App::from_config(config)?.run().await
//! }
//! ```
//!
//! ## Crates
//!
//! | Re-export      | Crate               | Concern                                  |
//! |----------------|---------------------|------------------------------------------|
//! | [`core`]       | `sluice-core`       | Request IDs, client identity, envelopes  |
//! | [`config`]     | `sluice-config`     | Layered configuration and validation     |
//! | [`telemetry`]  | `sluice-telemetry`  | Logging setup and the log sink trait     |
//! | [`middleware`] | `sluice-middleware` | Pipeline, rate limiter, built-in units   |
//! | [`server`]     | `sluice-server`     | Hyper server and graceful shutdown       |

#![doc(html_root_url = "https://docs.rs/sluice/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod app;
pub mod error;

pub use sluice_config as config;
pub use sluice_core as core;
pub use sluice_middleware as middleware;
pub use sluice_server as server;
pub use sluice_telemetry as telemetry;

pub use app::{standard_pipeline, App};
pub use error::AppError;
pub use sluice_config::{ConfigLoader, SluiceConfig};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports.
///
/// ```rust
/// use sluice::prelude::*;
///
/// let pipeline = Pipeline::builder()
///     .use_middleware(ExceptionContainmentMiddleware::new())
///     .build();
/// assert_eq!(pipeline.unit_names(), ["exception-containment"]);
/// ```
pub mod prelude {
    pub use crate::{App, AppError, ConfigLoader, SluiceConfig};
    pub use sluice_core::{ClientIdentity, ErrorEnvelope, RequestId};
    pub use sluice_middleware::stages::{
        AuthorizationMiddleware, CorsMiddleware, ExceptionContainmentMiddleware,
        ForwardedHeadersMiddleware, RateLimitMiddleware, RequestIdMiddleware,
        RequestLoggingMiddleware,
    };
    pub use sluice_middleware::{
        Middleware, MiddlewareContext, Next, Pipeline, PipelineBuilder, PipelineResult, Request,
        Response, ResponseExt,
    };
    pub use sluice_server::{Server, ServerConfig, ShutdownSignal};
}
