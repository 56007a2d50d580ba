//! Log sinks.
//!
//! Pipeline stages that must report something (the exception containment
//! stage above all) log through a [`LogSink`] rather than calling `tracing`
//! directly. Production code uses [`TracingLogSink`]; tests swap in a
//! [`RecordingLogSink`] and assert on what was recorded.

use parking_lot::Mutex;
use std::error::Error;
use std::fmt;

/// Severity of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Very fine-grained diagnostics.
    Trace,
    /// Debugging information.
    Debug,
    /// Normal operational messages.
    Info,
    /// Something unexpected that did not fail the request.
    Warn,
    /// A failure.
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Destination for log records emitted by pipeline stages.
///
/// Implementations may fail (including by panicking); callers that must not
/// be disturbed by a broken sink are expected to guard the call.
pub trait LogSink: Send + Sync {
    /// Records a message with an optional error attached.
    fn log(&self, severity: Severity, message: &str, error: Option<&(dyn Error + 'static)>);
}

/// Renders an error and its `source()` chain as `outer: inner: root`.
#[must_use]
pub fn error_chain(error: &(dyn Error + 'static)) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

/// A [`LogSink`] that forwards to the `tracing` facade.
#[derive(Debug, Clone, Copy)]
pub struct TracingLogSink {
    name: &'static str,
}

impl TracingLogSink {
    /// Creates a sink whose records carry `sink = name`.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }

    /// Returns the sink name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl Default for TracingLogSink {
    fn default() -> Self {
        Self::new("sluice")
    }
}

impl LogSink for TracingLogSink {
    fn log(&self, severity: Severity, message: &str, error: Option<&(dyn Error + 'static)>) {
        let error = error.map(error_chain);
        let error = error.as_deref().unwrap_or("");
        match severity {
            Severity::Trace => tracing::trace!(sink = self.name, error, "{message}"),
            Severity::Debug => tracing::debug!(sink = self.name, error, "{message}"),
            Severity::Info => tracing::info!(sink = self.name, error, "{message}"),
            Severity::Warn => tracing::warn!(sink = self.name, error, "{message}"),
            Severity::Error => tracing::error!(sink = self.name, error, "{message}"),
        }
    }
}

/// A record captured by [`RecordingLogSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Severity the record was logged at.
    pub severity: Severity,
    /// The message.
    pub message: String,
    /// The rendered error chain, if an error was attached.
    pub error: Option<String>,
}

/// A [`LogSink`] that keeps every record in memory.
#[derive(Debug, Default)]
pub struct RecordingLogSink {
    records: Mutex<Vec<LogRecord>>,
}

impl RecordingLogSink {
    /// Creates an empty recording sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of the records so far.
    #[must_use]
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// Returns the records logged at `severity`.
    #[must_use]
    pub fn at(&self, severity: Severity) -> Vec<LogRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.severity == severity)
            .cloned()
            .collect()
    }

    /// Number of records so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl LogSink for RecordingLogSink {
    fn log(&self, severity: Severity, message: &str, error: Option<&(dyn Error + 'static)>) {
        self.records.lock().push(LogRecord {
            severity,
            message: message.to_string(),
            error: error.map(error_chain),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Outer(std::io::Error);

    impl fmt::Display for Outer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("handler failed")
        }
    }

    impl Error for Outer {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_error_chain_includes_sources() {
        let err = Outer(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"));
        assert_eq!(error_chain(&err), "handler failed: disk gone");
    }

    #[test]
    fn test_recording_sink_captures_records() {
        let sink = RecordingLogSink::new();
        assert!(sink.is_empty());

        sink.log(Severity::Info, "started", None);
        let err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        sink.log(Severity::Error, "request failed", Some(&err));

        assert_eq!(sink.len(), 2);
        let errors = sink.at(Severity::Error);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "request failed");
        assert_eq!(errors[0].error.as_deref(), Some("boom"));
        assert_eq!(sink.records()[0].error, None);
    }

    #[test]
    fn test_tracing_sink_does_not_require_subscriber() {
        let sink = TracingLogSink::new("test");
        assert_eq!(sink.name(), "test");
        sink.log(Severity::Warn, "no subscriber installed", None);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Error > Severity::Warn);
        assert!(Severity::Trace < Severity::Info);
        assert_eq!(Severity::Warn.to_string(), "warn");
    }
}
