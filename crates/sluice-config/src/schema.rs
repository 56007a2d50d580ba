//! Configuration schema types.
//!
//! This module defines the structure of all configuration sections.

use serde::{Deserialize, Serialize};
use sluice_telemetry::{LogConfig, LogFormat};

/// Server configuration section.
///
/// Controls the HTTP listener: bind address, timeouts and connection limits.
///
/// # Example
///
/// ```
/// use sluice_config::ServerConfig;
///
/// let config = ServerConfig {
///     http_addr: "0.0.0.0:8080".to_string(),
///     shutdown_timeout_secs: 30,
///     max_connections: 10000,
///     keep_alive_secs: Some(60),
/// };
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// HTTP server bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_http_addr")]
    pub http_addr: String,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Maximum number of concurrent connections. 0 means unlimited.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Keep-alive timeout in seconds. None disables keep-alive.
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            max_connections: default_max_connections(),
            keep_alive_secs: default_keep_alive(),
        }
    }
}

fn default_http_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_max_connections() -> u32 {
    10000
}

#[allow(clippy::unnecessary_wraps)]
fn default_keep_alive() -> Option<u64> {
    Some(60)
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Enable logging.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Filter directive (trace, debug, info, warn, error, or per-target).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include source file and line in logs.
    #[serde(default)]
    pub include_location: bool,

    /// Include thread IDs in logs.
    #[serde(default)]
    pub thread_ids: bool,

    /// Service name reported at startup.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: LogFormat::default(),
            include_location: false,
            thread_ids: false,
            service_name: default_service_name(),
        }
    }
}

impl LoggingConfig {
    /// Converts this section into the telemetry crate's [`LogConfig`].
    #[must_use]
    pub fn to_log_config(&self) -> LogConfig {
        LogConfig {
            enabled: self.enabled,
            level: self.level.clone(),
            format: self.format,
            span_events: self.format == LogFormat::Pretty,
            file_line_info: self.include_location,
            thread_ids: self.thread_ids,
            include_target: true,
            service_name: self.service_name.clone(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "sluice".to_string()
}

/// One rate-limit rule as written in configuration.
///
/// The endpoint grammar is `*`, `<path>` or `<verb>:<path>`, where the verb is
/// an HTTP method or `*` and the path may contain `*` wildcards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RateLimitRuleConfig {
    /// Endpoint pattern, e.g. `"*"`, `"get:/api/values"`, `"*:/api/*"`.
    pub endpoint: String,

    /// Maximum admitted requests per window. Must be positive.
    pub limit: u64,

    /// Window length, e.g. `"1s"`, `"15m"`, `"1h"`, `"1d"`.
    pub period: String,
}

impl RateLimitRuleConfig {
    /// Creates a rule record.
    pub fn new(endpoint: impl Into<String>, limit: u64, period: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            limit,
            period: period.into(),
        }
    }
}

/// Rate limiting configuration section.
///
/// Defaults to a single global rule of 1000 requests per minute per client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RateLimitingConfig {
    /// Enable the rate limiting stage.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Rules, evaluated in this order.
    #[serde(default = "default_rules")]
    pub rules: Vec<RateLimitRuleConfig>,

    /// Client IPs that are never limited.
    #[serde(default)]
    pub ip_whitelist: Vec<String>,

    /// Endpoint patterns (same grammar as rules) that are never limited.
    #[serde(default)]
    pub endpoint_whitelist: Vec<String>,

    /// Rejection message. `{limit}` and `{period}` are substituted.
    #[serde(default = "default_quota_exceeded_message")]
    pub quota_exceeded_message: String,

    /// Add `X-Rate-Limit-*` headers to allowed responses.
    #[serde(default = "default_true")]
    pub emit_rate_limit_headers: bool,

    /// Idle counters older than this many periods are evicted.
    #[serde(default = "default_eviction_multiplier")]
    pub eviction_multiplier: u32,

    /// Interval of the background counter sweep, in seconds. 0 disables it.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rules: default_rules(),
            ip_whitelist: Vec::new(),
            endpoint_whitelist: Vec::new(),
            quota_exceeded_message: default_quota_exceeded_message(),
            emit_rate_limit_headers: true,
            eviction_multiplier: default_eviction_multiplier(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_rules() -> Vec<RateLimitRuleConfig> {
    vec![RateLimitRuleConfig::new("*", 1000, "1m")]
}

/// Default rejection message template.
pub const DEFAULT_QUOTA_EXCEEDED_MESSAGE: &str =
    "API calls quota exceeded! maximum admitted {limit} per {period}.";

fn default_quota_exceeded_message() -> String {
    DEFAULT_QUOTA_EXCEEDED_MESSAGE.to_string()
}

fn default_eviction_multiplier() -> u32 {
    2
}

fn default_sweep_interval() -> u64 {
    60
}

/// Forwarded headers configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ForwardedHeadersConfig {
    /// Enable `X-Forwarded-*` processing.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Peers whose forwarded headers are trusted. Loopback is always trusted.
    #[serde(default)]
    pub known_proxies: Vec<String>,

    /// Maximum number of `X-Forwarded-For` entries consumed from the right.
    #[serde(default = "default_forward_limit")]
    pub forward_limit: usize,
}

impl Default for ForwardedHeadersConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            known_proxies: Vec::new(),
            forward_limit: default_forward_limit(),
        }
    }
}

fn default_forward_limit() -> usize {
    1
}

/// CORS configuration section.
///
/// The defaults allow any origin, method and header, without credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CorsConfig {
    /// Enable the CORS stage.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Allowed origins. `"*"` allows any origin.
    #[serde(default = "default_any")]
    pub allowed_origins: Vec<String>,

    /// Allowed methods. `"*"` allows any method.
    #[serde(default = "default_any")]
    pub allowed_methods: Vec<String>,

    /// Allowed request headers. `"*"` allows any header.
    #[serde(default = "default_any")]
    pub allowed_headers: Vec<String>,

    /// Response headers exposed to the browser.
    #[serde(default)]
    pub exposed_headers: Vec<String>,

    /// Send `Access-Control-Allow-Credentials: true`.
    #[serde(default)]
    pub allow_credentials: bool,

    /// Preflight cache lifetime in seconds.
    #[serde(default)]
    pub max_age_secs: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_origins: default_any(),
            allowed_methods: default_any(),
            allowed_headers: default_any(),
            exposed_headers: Vec::new(),
            allow_credentials: false,
            max_age_secs: None,
        }
    }
}

fn default_any() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_true() -> bool {
    true
}
