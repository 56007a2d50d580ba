//! Configuration loader with layered approach.
//!
//! This module provides the [`ConfigLoader`] for loading configuration from
//! multiple sources: defaults, files, and environment variables.

use std::env;
use std::fs;
use std::path::Path;

use crate::{ConfigError, RateLimitRuleConfig, SluiceConfig};
use sluice_telemetry::LogFormat;

/// Configuration loader with layered approach.
///
/// The loader applies configuration in layers, with later layers overriding
/// earlier ones:
/// 1. Default values (built into the code)
/// 2. Configuration file (TOML or JSON)
/// 3. Environment variables
///
/// The result is validated once in [`load`](Self::load); rules are read-only
/// from then on.
///
/// # Example
///
/// ```no_run
/// use sluice_config::ConfigLoader;
///
/// # fn main() -> Result<(), sluice_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_defaults()
///     .with_file("sluice.toml")?
///     .with_env_prefix("SLUICE")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: SluiceConfig,
    env_prefix: Option<String>,
    file_loaded: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new configuration loader.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: SluiceConfig::default(),
            env_prefix: None,
            file_loaded: false,
        }
    }

    /// Start with default configuration values.
    ///
    /// This is called automatically by `new()`, but can be chained for clarity.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.config = SluiceConfig::default();
        self
    }

    /// Start with development preset configuration.
    ///
    /// # Example
    ///
    /// ```
    /// use sluice_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_development()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = SluiceConfig::development();
        self
    }

    /// Start with production preset configuration.
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.config = SluiceConfig::production();
        self
    }

    /// Load configuration from a file.
    ///
    /// Supports TOML (.toml) and JSON (.json) formats.
    /// The file format is determined by the file extension.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - The file does not exist
    /// - The file cannot be read
    /// - The file contains invalid TOML/JSON
    /// - The file contains unknown fields (strict mode)
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read(path, e))?;

        let file_config = Self::parse_file(&content, path)?;
        self.merge_config(file_config);
        self.file_loaded = true;

        Ok(self)
    }

    /// Load configuration from an optional file.
    ///
    /// If the file exists, loads it. If not, silently continues.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be read or parsed.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Load configuration from a string.
    ///
    /// `format` is `"toml"` or `"json"`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if parsing fails.
    ///
    /// # Example
    ///
    /// ```
    /// use sluice_config::ConfigLoader;
    ///
    /// let toml = r#"
    ///     [[rate_limiting.rules]]
    ///     endpoint = "get:/api/values"
    ///     limit = 2
    ///     period = "1s"
    /// "#;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string(toml, "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.rate_limiting.rules.len(), 1);
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        let file_config = match format.to_lowercase().as_str() {
            "toml" => toml::from_str(content)?,
            "json" => serde_json::from_str(content)?,
            _ => {
                return Err(ConfigError::UnsupportedFormat(format.to_string()))
            }
        };

        self.merge_config(file_config);
        Ok(self)
    }

    /// Set environment variable prefix for overrides.
    ///
    /// Environment variables use the format `PREFIX__SECTION__KEY`.
    /// For example, with prefix "SLUICE":
    /// - `SLUICE__SERVER__HTTP_ADDR=0.0.0.0:9000`
    /// - `SLUICE__RATE_LIMITING__RULES=[{"endpoint":"*","limit":10,"period":"1s"}]`
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Load a `.env` file for environment variables.
    ///
    /// Uses the `dotenvy` crate; a missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a `.env` file exists but cannot be parsed.
    pub fn with_dotenv(self) -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) => Ok(self),
            Err(e) if e.not_found() => Ok(self),
            Err(e) => Err(ConfigError::Dotenv(e)),
        }
    }

    /// Returns true if a configuration file has been loaded.
    #[must_use]
    pub fn file_loaded(&self) -> bool {
        self.file_loaded
    }

    /// Finalize and return the loaded configuration.
    ///
    /// Applies environment variable overrides (if a prefix was set) and
    /// validates the final configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Environment variable parsing fails
    /// - Configuration validation fails
    pub fn load(mut self) -> Result<SluiceConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            self.apply_env_overrides(&prefix)?;
        }

        self.config.validate()?;

        Ok(self.config)
    }

    /// Finalize without validation.
    #[must_use]
    pub fn load_unvalidated(self) -> SluiceConfig {
        self.config
    }

    // Parse configuration file based on extension
    fn parse_file(content: &str, path: &Path) -> Result<SluiceConfig, ConfigError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        match extension.as_deref() {
            Some("toml") => Ok(toml::from_str(content)?),
            Some("json") => Ok(serde_json::from_str(content)?),
            _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }

    // Later sources replace earlier ones wholesale; unset fields in a file
    // fall back to serde defaults, not to the previous layer.
    fn merge_config(&mut self, file_config: SluiceConfig) {
        self.config = file_config;
    }

    fn apply_env_overrides(&mut self, prefix: &str) -> Result<(), ConfigError> {
        let marker = format!("{prefix}__");
        let mut env_vars: Vec<(String, String)> =
            env::vars().filter(|(k, _)| k.starts_with(&marker)).collect();
        env_vars.sort();

        for (key, value) in env_vars {
            self.apply_env_var(&key, &value, prefix)?;
        }

        Ok(())
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let key_without_prefix = key
            .strip_prefix(prefix)
            .and_then(|k| k.strip_prefix("__"))
            .ok_or_else(|| ConfigError::env_override(key, "invalid key format"))?;

        let parts: Vec<&str> = key_without_prefix.split("__").collect();
        let boolean = || {
            parse_bool(value).ok_or_else(|| ConfigError::env_override(key, "expected boolean"))
        };

        match parts.as_slice() {
            // Server section
            ["SERVER", "HTTP_ADDR"] => {
                self.config.server.http_addr = value.to_string();
            }
            ["SERVER", "SHUTDOWN_TIMEOUT_SECS"] => {
                self.config.server.shutdown_timeout_secs = parse_number(key, value)?;
            }
            ["SERVER", "MAX_CONNECTIONS"] => {
                self.config.server.max_connections = parse_number(key, value)?;
            }
            ["SERVER", "KEEP_ALIVE_SECS"] => {
                self.config.server.keep_alive_secs = if value.eq_ignore_ascii_case("none") {
                    None
                } else {
                    Some(value.parse().map_err(|_| {
                        ConfigError::env_override(key, "expected integer or 'none'")
                    })?)
                };
            }

            // Logging section
            ["LOGGING", "ENABLED"] => {
                self.config.logging.enabled = boolean()?;
            }
            ["LOGGING", "LEVEL"] => {
                self.config.logging.level = value.to_string();
            }
            ["LOGGING", "FORMAT"] => {
                self.config.logging.format = match value.to_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    "pretty" => LogFormat::Pretty,
                    "compact" => LogFormat::Compact,
                    _ => {
                        return Err(ConfigError::env_override(
                            key,
                            "expected 'json', 'pretty' or 'compact'",
                        ))
                    }
                };
            }
            ["LOGGING", "INCLUDE_LOCATION"] => {
                self.config.logging.include_location = boolean()?;
            }
            ["LOGGING", "SERVICE_NAME"] => {
                self.config.logging.service_name = value.to_string();
            }

            // Rate limiting section
            ["RATE_LIMITING", "ENABLED"] => {
                self.config.rate_limiting.enabled = boolean()?;
            }
            ["RATE_LIMITING", "RULES"] => {
                self.config.rate_limiting.rules =
                    serde_json::from_str::<Vec<RateLimitRuleConfig>>(value).map_err(|e| {
                        ConfigError::env_override(key, format!("expected JSON array of rules: {e}"))
                    })?;
            }
            ["RATE_LIMITING", "IP_WHITELIST"] => {
                self.config.rate_limiting.ip_whitelist = parse_list(value);
            }
            ["RATE_LIMITING", "ENDPOINT_WHITELIST"] => {
                self.config.rate_limiting.endpoint_whitelist = parse_list(value);
            }
            ["RATE_LIMITING", "QUOTA_EXCEEDED_MESSAGE"] => {
                self.config.rate_limiting.quota_exceeded_message = value.to_string();
            }
            ["RATE_LIMITING", "EMIT_RATE_LIMIT_HEADERS"] => {
                self.config.rate_limiting.emit_rate_limit_headers = boolean()?;
            }
            ["RATE_LIMITING", "SWEEP_INTERVAL_SECS"] => {
                self.config.rate_limiting.sweep_interval_secs = parse_number(key, value)?;
            }

            // Forwarded headers section
            ["FORWARDED_HEADERS", "ENABLED"] => {
                self.config.forwarded_headers.enabled = boolean()?;
            }
            ["FORWARDED_HEADERS", "KNOWN_PROXIES"] => {
                self.config.forwarded_headers.known_proxies = parse_list(value);
            }
            ["FORWARDED_HEADERS", "FORWARD_LIMIT"] => {
                self.config.forwarded_headers.forward_limit = parse_number(key, value)?;
            }

            // CORS section
            ["CORS", "ENABLED"] => {
                self.config.cors.enabled = boolean()?;
            }
            ["CORS", "ALLOWED_ORIGINS"] => {
                self.config.cors.allowed_origins = parse_list(value);
            }
            ["CORS", "ALLOW_CREDENTIALS"] => {
                self.config.cors.allow_credentials = boolean()?;
            }

            // Unknown key - ignore
            _ => {}
        }

        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::env_override(key, "expected integer"))
}

/// Splits a comma-separated list, dropping empty entries.
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a boolean from a string.
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
