//! Typed configuration for Sluice.
//!
//! This crate provides a strongly-typed configuration system with support for:
//! - TOML and JSON configuration files
//! - Environment variable overrides
//! - Strict validation (fails on unknown fields)
//! - Layered configuration (defaults → file → env)
//!
//! Rate-limit rules are loaded once at startup. A malformed rule is a
//! startup error, never a per-request one.
//!
//! # Example
//!
//! ```no_run
//! use sluice_config::{ConfigLoader, SluiceConfig};
//!
//! # fn main() -> Result<(), sluice_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_defaults()
//!     .with_file("sluice.toml")?
//!     .with_env_prefix("SLUICE")
//!     .load()?;
//!
//! println!("Listening on: {}", config.server.http_addr);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! http_addr = "0.0.0.0:8080"
//! shutdown_timeout_secs = 30
//!
//! [logging]
//! level = "info"
//! format = "json"
//!
//! [rate_limiting]
//! enabled = true
//! ip_whitelist = ["127.0.0.1"]
//!
//! [[rate_limiting.rules]]
//! endpoint = "*"
//! limit = 1000
//! period = "1m"
//!
//! [forwarded_headers]
//! forward_limit = 1
//!
//! [cors]
//! allowed_origins = ["*"]
//! ```
//!
//! # Environment Variable Overrides
//!
//! Values can be overridden via environment variables using the format
//! `PREFIX__SECTION__KEY`. For example:
//!
//! - `SLUICE__SERVER__HTTP_ADDR=0.0.0.0:9000`
//! - `SLUICE__LOGGING__LEVEL=debug`
//! - `SLUICE__RATE_LIMITING__RULES=[{"endpoint":"*","limit":10,"period":"1s"}]`

#![doc(html_root_url = "https://docs.rs/sluice-config/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod loader;
mod period;
mod schema;

pub use config::*;
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use period::parse_period;
pub use schema::*;
pub use sluice_telemetry::LogFormat;
