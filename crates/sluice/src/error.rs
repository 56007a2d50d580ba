//! Application error type.

use sluice_config::ConfigError;
use sluice_middleware::ratelimit::RuleError;
use sluice_server::ServerError;
use sluice_telemetry::TelemetryError;
use thiserror::Error;

/// Errors raised while assembling or running an [`App`](crate::App).
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration could not be loaded or failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A rate-limit rule or whitelist entry is invalid.
    #[error(transparent)]
    Rule(#[from] RuleError),

    /// Logging could not be initialized.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    /// The server failed to start.
    #[error(transparent)]
    Server(#[from] ServerError),
}
