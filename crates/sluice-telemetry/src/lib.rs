//! Logging for the Sluice request pipeline.
//!
//! Two concerns live here:
//!
//! - [`logging`] installs the process-wide `tracing` subscriber (JSON in
//!   production, pretty output in development).
//! - [`sink`] defines the [`LogSink`] collaborator that pipeline stages log
//!   through, so tests can observe what a stage reported without touching
//!   the global subscriber.
//!
//! # Example
//!
//! ```rust,ignore
//! use sluice_telemetry::{init_logging, LogConfig, LogSink, Severity, TracingLogSink};
//!
//! init_logging(&LogConfig::production())?;
//!
//! let sink = TracingLogSink::new("sluice::exception");
//! sink.log(Severity::Error, "Something went wrong", None);
//! ```

#![doc(html_root_url = "https://docs.rs/sluice-telemetry/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod logging;
pub mod sink;

pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig, LogFormat};
pub use sink::{error_chain, LogRecord, LogSink, RecordingLogSink, Severity, TracingLogSink};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
