//! Main configuration types.
//!
//! This module provides the top-level [`SluiceConfig`] struct and its builder.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::{
    parse_period, ConfigError, CorsConfig, ForwardedHeadersConfig, LoggingConfig,
    RateLimitingConfig, ServerConfig,
};
use sluice_telemetry::LogFormat;

/// Complete Sluice configuration.
///
/// This is the root configuration type that contains all configuration sections.
/// Use [`ConfigLoader`](crate::ConfigLoader) to load configuration from files
/// and environment variables.
///
/// # Example
///
/// ```
/// use sluice_config::SluiceConfig;
///
/// let config = SluiceConfig::default();
/// assert_eq!(config.server.http_addr, "0.0.0.0:8080");
/// assert_eq!(config.rate_limiting.rules[0].limit, 1000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct SluiceConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Rate limiting configuration.
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Forwarded headers configuration.
    #[serde(default)]
    pub forwarded_headers: ForwardedHeadersConfig,

    /// CORS configuration.
    #[serde(default)]
    pub cors: CorsConfig,
}

impl SluiceConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> SluiceConfigBuilder {
        SluiceConfigBuilder::new()
    }

    /// Validate the configuration.
    ///
    /// Malformed configuration is fatal at startup, so this is called by
    /// [`ConfigLoader::load`](crate::ConfigLoader::load).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if:
    /// - Server address is invalid
    /// - A rule has an empty endpoint, an invalid verb prefix, a zero limit,
    ///   or a malformed or zero period
    /// - Two rules share the same endpoint and period
    /// - A whitelisted IP or known proxy does not parse
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.http_addr.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::invalid_value(
                "server.http_addr",
                format!("invalid socket address: {}", self.server.http_addr),
            ));
        }

        let mut seen = HashSet::new();
        for (index, rule) in self.rate_limiting.rules.iter().enumerate() {
            let field = |name: &str| format!("rate_limiting.rules[{index}].{name}");

            validate_endpoint(&rule.endpoint).map_err(|reason| {
                ConfigError::invalid_value(field("endpoint"), reason)
            })?;

            if rule.limit == 0 {
                return Err(ConfigError::invalid_value(
                    field("limit"),
                    "limit must be greater than zero",
                ));
            }

            let period = parse_period(&rule.period).map_err(|e| match e {
                ConfigError::InvalidValue { reason, .. } => {
                    ConfigError::invalid_value(field("period"), reason)
                }
                other => other,
            })?;

            let key = (rule.endpoint.to_ascii_lowercase(), period);
            if !seen.insert(key) {
                return Err(ConfigError::invalid_value(
                    field("endpoint"),
                    format!(
                        "duplicate rule for endpoint {:?} with period {:?}",
                        rule.endpoint, rule.period
                    ),
                ));
            }
        }

        for (index, endpoint) in self.rate_limiting.endpoint_whitelist.iter().enumerate() {
            validate_endpoint(endpoint).map_err(|reason| {
                ConfigError::invalid_value(
                    format!("rate_limiting.endpoint_whitelist[{index}]"),
                    reason,
                )
            })?;
        }

        validate_ips("rate_limiting.ip_whitelist", &self.rate_limiting.ip_whitelist)?;
        validate_ips(
            "forwarded_headers.known_proxies",
            &self.forwarded_headers.known_proxies,
        )?;

        if self.rate_limiting.eviction_multiplier == 0 {
            return Err(ConfigError::invalid_value(
                "rate_limiting.eviction_multiplier",
                "must be at least 1",
            ));
        }

        Ok(())
    }

    /// Create a development configuration preset.
    ///
    /// Pretty debug logging with source locations, listening on loopback.
    ///
    /// # Example
    ///
    /// ```
    /// use sluice_config::SluiceConfig;
    ///
    /// let config = SluiceConfig::development();
    /// assert_eq!(config.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();

        config.server.http_addr = "127.0.0.1:8080".to_string();
        config.logging.level = "debug".to_string();
        config.logging.format = LogFormat::Pretty;
        config.logging.include_location = true;

        config
    }

    /// Create a production configuration preset.
    ///
    /// JSON logging at `info`.
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();

        config.logging.level = "info".to_string();
        config.logging.format = LogFormat::Json;
        config.logging.include_location = false;

        config
    }
}

/// Checks the `*` | `<path>` | `<verb>:<path>` endpoint grammar.
fn validate_endpoint(endpoint: &str) -> Result<(), String> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return Err("endpoint must not be empty".to_string());
    }
    if let Some((verb, path)) = endpoint.split_once(':') {
        let verb_ok = verb == "*" || (!verb.is_empty() && verb.bytes().all(|b| b.is_ascii_alphabetic()));
        if !verb_ok {
            return Err(format!("invalid method prefix {verb:?}"));
        }
        if path.is_empty() {
            return Err("endpoint path must not be empty".to_string());
        }
    }
    Ok(())
}

fn validate_ips(field: &str, ips: &[String]) -> Result<(), ConfigError> {
    for (index, ip) in ips.iter().enumerate() {
        if ip.trim().parse::<IpAddr>().is_err() {
            return Err(ConfigError::invalid_value(
                format!("{field}[{index}]"),
                format!("invalid IP address: {ip}"),
            ));
        }
    }
    Ok(())
}

/// Builder for [`SluiceConfig`].
#[derive(Debug, Default)]
pub struct SluiceConfigBuilder {
    server: Option<ServerConfig>,
    logging: Option<LoggingConfig>,
    rate_limiting: Option<RateLimitingConfig>,
    forwarded_headers: Option<ForwardedHeadersConfig>,
    cors: Option<CorsConfig>,
}

impl SluiceConfigBuilder {
    /// Create a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server configuration.
    #[must_use]
    pub fn server(mut self, server: ServerConfig) -> Self {
        self.server = Some(server);
        self
    }

    /// Set the logging configuration.
    #[must_use]
    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = Some(logging);
        self
    }

    /// Set the rate limiting configuration.
    #[must_use]
    pub fn rate_limiting(mut self, rate_limiting: RateLimitingConfig) -> Self {
        self.rate_limiting = Some(rate_limiting);
        self
    }

    /// Set the forwarded headers configuration.
    #[must_use]
    pub fn forwarded_headers(mut self, forwarded_headers: ForwardedHeadersConfig) -> Self {
        self.forwarded_headers = Some(forwarded_headers);
        self
    }

    /// Set the CORS configuration.
    #[must_use]
    pub fn cors(mut self, cors: CorsConfig) -> Self {
        self.cors = Some(cors);
        self
    }

    /// Build the configuration.
    ///
    /// Any unset sections will use their default values.
    #[must_use]
    pub fn build(self) -> SluiceConfig {
        SluiceConfig {
            server: self.server.unwrap_or_default(),
            logging: self.logging.unwrap_or_default(),
            rate_limiting: self.rate_limiting.unwrap_or_default(),
            forwarded_headers: self.forwarded_headers.unwrap_or_default(),
            cors: self.cors.unwrap_or_default(),
        }
    }

    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if validation fails.
    pub fn build_validated(self) -> Result<SluiceConfig, ConfigError> {
        let config = self.build();
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RateLimitRuleConfig;

    fn with_rules(rules: Vec<RateLimitRuleConfig>) -> SluiceConfig {
        SluiceConfig::builder()
            .rate_limiting(RateLimitingConfig {
                rules,
                ..Default::default()
            })
            .build()
    }

    fn error_text(config: &SluiceConfig) -> String {
        config.validate().unwrap_err().to_string()
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = SluiceConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.rate_limiting.enabled);
        assert!(config.cors.enabled);
    }

    #[test]
    fn test_builder_keeps_unset_sections_default() {
        let config = SluiceConfig::builder()
            .server(ServerConfig {
                http_addr: "127.0.0.1:3000".to_string(),
                ..Default::default()
            })
            .build();

        assert_eq!(config.server.http_addr, "127.0.0.1:3000");
        assert_eq!(config.rate_limiting, RateLimitingConfig::default());
    }

    #[test]
    fn test_validate_invalid_server_addr() {
        let config = SluiceConfig::builder()
            .server(ServerConfig {
                http_addr: "not-an-address".to_string(),
                ..Default::default()
            })
            .build();

        assert!(error_text(&config).contains("http_addr"));
    }

    #[test]
    fn test_validate_zero_limit() {
        let config = with_rules(vec![RateLimitRuleConfig::new("*", 0, "1s")]);
        let text = error_text(&config);
        assert!(text.contains("rules[0].limit"));
    }

    #[test]
    fn test_validate_bad_period() {
        let config = with_rules(vec![
            RateLimitRuleConfig::new("*", 10, "1s"),
            RateLimitRuleConfig::new("/a", 10, "soon"),
        ]);
        assert!(error_text(&config).contains("rules[1].period"));

        let config = with_rules(vec![RateLimitRuleConfig::new("*", 10, "0h")]);
        assert!(error_text(&config).contains("positive"));
    }

    #[test]
    fn test_validate_empty_endpoint() {
        let config = with_rules(vec![RateLimitRuleConfig::new("  ", 10, "1s")]);
        assert!(error_text(&config).contains("must not be empty"));
    }

    #[test]
    fn test_validate_bad_verb_prefix() {
        let config = with_rules(vec![RateLimitRuleConfig::new("g3t:/api", 10, "1s")]);
        assert!(error_text(&config).contains("method prefix"));

        let ok = with_rules(vec![
            RateLimitRuleConfig::new("get:/api/values", 10, "1s"),
            RateLimitRuleConfig::new("*:/api/*", 10, "1s"),
        ]);
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_validate_duplicate_rule() {
        let config = with_rules(vec![
            RateLimitRuleConfig::new("/a", 10, "1m"),
            RateLimitRuleConfig::new("/A", 20, "60s"),
        ]);
        assert!(error_text(&config).contains("duplicate"));

        let distinct_periods = with_rules(vec![
            RateLimitRuleConfig::new("/a", 10, "1s"),
            RateLimitRuleConfig::new("/a", 100, "1m"),
        ]);
        assert!(distinct_periods.validate().is_ok());
    }

    #[test]
    fn test_validate_whitelist_ip() {
        let config = SluiceConfig::builder()
            .rate_limiting(RateLimitingConfig {
                ip_whitelist: vec!["127.0.0.1".to_string(), "::1".to_string(), "nope".to_string()],
                ..Default::default()
            })
            .build();
        assert!(error_text(&config).contains("ip_whitelist[2]"));
    }

    #[test]
    fn test_validate_known_proxy_ip() {
        let config = SluiceConfig::builder()
            .forwarded_headers(ForwardedHeadersConfig {
                known_proxies: vec!["10.0.0.300".to_string()],
                ..Default::default()
            })
            .build();
        assert!(error_text(&config).contains("known_proxies"));
    }

    #[test]
    fn test_development_preset() {
        let config = SluiceConfig::development();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_production_preset() {
        let config = SluiceConfig::production();
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(!config.logging.include_location);
    }

    #[test]
    fn test_build_validated_failure() {
        let result = SluiceConfig::builder()
            .server(ServerConfig {
                http_addr: "invalid".to_string(),
                ..Default::default()
            })
            .build_validated();
        assert!(result.is_err());
    }

    #[test]
    fn test_toml_serialization() {
        let toml_str = toml::to_string_pretty(&SluiceConfig::default()).unwrap();
        assert!(toml_str.contains("[server]"));
        assert!(toml_str.contains("[rate_limiting]"));
        assert!(toml_str.contains("[[rate_limiting.rules]]"));
    }

    #[test]
    fn test_unknown_section_rejected() {
        let toml_str = r#"
            [server]
            http_addr = "127.0.0.1:8000"

            [telemetry]
            service_name = "x"
        "#;
        let result: Result<SluiceConfig, _> = toml::from_str(toml_str);
        assert!(result.is_err());
    }
}
