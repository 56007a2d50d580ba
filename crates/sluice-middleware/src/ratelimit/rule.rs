//! Rate-limit rules and endpoint patterns.
//!
//! An endpoint pattern is one of:
//!
//! - `*`, matching every request;
//! - `<path>`, matching the path under any method;
//! - `<verb>:<path>`, where `verb` is an HTTP method or `*`.
//!
//! A path may contain `*` wildcards (`/api/*`). Matching ignores ASCII case
//! and a trailing `/`.

use http::Method;
use regex::Regex;
use sluice_config::{parse_period, RateLimitRuleConfig};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while compiling rate-limit rules.
#[derive(Debug, Error)]
pub enum RuleError {
    /// The endpoint pattern does not follow the grammar.
    #[error("invalid endpoint pattern {endpoint:?}: {reason}")]
    InvalidEndpoint {
        /// The offending pattern.
        endpoint: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The period string could not be parsed.
    #[error("invalid period {period:?} for endpoint {endpoint:?}: {reason}")]
    InvalidPeriod {
        /// Endpoint of the rule.
        endpoint: String,
        /// The offending period.
        period: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The rule admits no requests at all.
    #[error("limit for endpoint {endpoint:?} must be greater than zero")]
    ZeroLimit {
        /// Endpoint of the rule.
        endpoint: String,
    },

    /// An IP whitelist entry is not an address.
    #[error("invalid whitelisted IP {0:?}")]
    InvalidIp(String),
}

#[derive(Debug, Clone)]
enum PathMatcher {
    Any,
    Exact(String),
    Glob(Regex),
}

/// A compiled endpoint pattern.
#[derive(Debug, Clone)]
pub struct EndpointPattern {
    raw: String,
    method: Option<Method>,
    path: PathMatcher,
}

impl EndpointPattern {
    /// Parses an endpoint pattern.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::InvalidEndpoint`] if the pattern is empty, the
    /// verb is not alphabetic, or the path is empty.
    ///
    /// # Example
    ///
    /// ```
    /// use http::Method;
    /// use sluice_middleware::ratelimit::EndpointPattern;
    ///
    /// let pattern = EndpointPattern::parse("get:/api/*").unwrap();
    /// assert!(pattern.matches(&Method::GET, "/API/values"));
    /// assert!(!pattern.matches(&Method::POST, "/api/values"));
    /// ```
    pub fn parse(pattern: &str) -> Result<Self, RuleError> {
        let raw = pattern.trim();
        let invalid = |reason: &str| RuleError::InvalidEndpoint {
            endpoint: pattern.to_string(),
            reason: reason.to_string(),
        };

        if raw.is_empty() {
            return Err(invalid("pattern must not be empty"));
        }
        if raw == "*" {
            return Ok(Self {
                raw: raw.to_string(),
                method: None,
                path: PathMatcher::Any,
            });
        }

        let (method, path) = match raw.split_once(':') {
            Some(("*", path)) => (None, path),
            Some((verb, path)) => {
                if verb.is_empty() || !verb.bytes().all(|b| b.is_ascii_alphabetic()) {
                    return Err(invalid("method prefix must be alphabetic or *"));
                }
                let method = Method::from_bytes(verb.to_ascii_uppercase().as_bytes())
                    .map_err(|_| invalid("method prefix is not a valid method"))?;
                (Some(method), path)
            }
            None => (None, raw),
        };

        if path.is_empty() {
            return Err(invalid("path must not be empty"));
        }

        let path = if path == "*" {
            PathMatcher::Any
        } else if path.contains('*') {
            PathMatcher::Glob(compile_glob(path).map_err(|e| invalid(&e.to_string()))?)
        } else {
            PathMatcher::Exact(trim_trailing_slash(path).to_ascii_lowercase())
        };

        Ok(Self {
            raw: raw.to_string(),
            method,
            path,
        })
    }

    /// Returns the pattern as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns true if the pattern contains a wildcard.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.raw.contains('*')
    }

    /// Tests the pattern against a request method and path.
    #[must_use]
    pub fn matches(&self, method: &Method, path: &str) -> bool {
        if self.method.as_ref().is_some_and(|m| m != method) {
            return false;
        }
        match &self.path {
            PathMatcher::Any => true,
            PathMatcher::Exact(expected) => trim_trailing_slash(path).eq_ignore_ascii_case(expected),
            PathMatcher::Glob(regex) => regex.is_match(trim_trailing_slash(path)),
        }
    }
}

impl std::fmt::Display for EndpointPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

fn trim_trailing_slash(path: &str) -> &str {
    match path.strip_suffix('/') {
        Some(trimmed) if !trimmed.is_empty() => trimmed,
        _ => path,
    }
}

fn compile_glob(path: &str) -> Result<Regex, regex::Error> {
    let body = trim_trailing_slash(path)
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("(?i)^{body}/?$"))
}

/// One rate-limit rule: at most `limit` requests per `period` for each
/// client on the endpoints the pattern matches.
#[derive(Debug, Clone)]
pub struct RateLimitRule {
    pattern: EndpointPattern,
    limit: u64,
    period: Duration,
    period_label: String,
}

impl RateLimitRule {
    /// Creates a rule.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern is invalid or `limit` is zero.
    pub fn new(endpoint: &str, limit: u64, period: Duration) -> Result<Self, RuleError> {
        if limit == 0 {
            return Err(RuleError::ZeroLimit {
                endpoint: endpoint.to_string(),
            });
        }
        Ok(Self {
            pattern: EndpointPattern::parse(endpoint)?,
            limit,
            period,
            period_label: format_period(period),
        })
    }

    /// Compiles a rule from its configuration record.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint, limit or period is invalid.
    pub fn from_config(config: &RateLimitRuleConfig) -> Result<Self, RuleError> {
        let period = parse_period(&config.period).map_err(|e| RuleError::InvalidPeriod {
            endpoint: config.endpoint.clone(),
            period: config.period.clone(),
            reason: e.to_string(),
        })?;

        let mut rule = Self::new(&config.endpoint, config.limit, period)?;
        rule.period_label = config.period.trim().to_string();
        Ok(rule)
    }

    /// Returns the endpoint pattern.
    #[must_use]
    pub fn pattern(&self) -> &EndpointPattern {
        &self.pattern
    }

    /// Returns the number of requests admitted per period.
    #[must_use]
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Returns the window length.
    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Returns the period as configured, e.g. `"1m"`.
    #[must_use]
    pub fn period_label(&self) -> &str {
        &self.period_label
    }
}

/// Formats a duration in the largest whole unit of the period grammar.
///
/// ```
/// use sluice_middleware::ratelimit::format_period;
/// use std::time::Duration;
///
/// assert_eq!(format_period(Duration::from_secs(3600)), "1h");
/// assert_eq!(format_period(Duration::from_secs(90)), "90s");
/// ```
#[must_use]
pub fn format_period(period: Duration) -> String {
    let secs = period.as_secs();
    match secs {
        0 => format!("{}ms", period.as_millis()),
        s if s % 86_400 == 0 => format!("{}d", s / 86_400),
        s if s % 3600 == 0 => format!("{}h", s / 3600),
        s if s % 60 == 0 => format!("{}m", s / 60),
        s => format!("{s}s"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_star_matches_everything() {
        let pattern = EndpointPattern::parse("*").unwrap();
        assert!(pattern.is_wildcard());
        assert!(pattern.matches(&Method::GET, "/"));
        assert!(pattern.matches(&Method::DELETE, "/a/b/c"));
    }

    #[test]
    fn test_exact_path_any_method() {
        let pattern = EndpointPattern::parse("/api/values").unwrap();
        assert!(!pattern.is_wildcard());
        assert!(pattern.matches(&Method::GET, "/api/values"));
        assert!(pattern.matches(&Method::POST, "/API/Values/"));
        assert!(!pattern.matches(&Method::GET, "/api/values/1"));
    }

    #[test]
    fn test_verb_prefix() {
        let pattern = EndpointPattern::parse("post:/api/values").unwrap();
        assert!(pattern.matches(&Method::POST, "/api/values"));
        assert!(!pattern.matches(&Method::GET, "/api/values"));

        let any_verb = EndpointPattern::parse("*:/api/values").unwrap();
        assert!(any_verb.is_wildcard());
        assert!(any_verb.matches(&Method::PUT, "/api/values"));
    }

    #[test]
    fn test_glob_path() {
        let pattern = EndpointPattern::parse("*:/api/*").unwrap();
        assert!(pattern.matches(&Method::GET, "/api/values"));
        assert!(pattern.matches(&Method::GET, "/Api/values/7"));
        assert!(!pattern.matches(&Method::GET, "/other"));

        let middle = EndpointPattern::parse("get:/api/*/items").unwrap();
        assert!(middle.matches(&Method::GET, "/api/7/items"));
        assert!(!middle.matches(&Method::GET, "/api/7/orders"));
    }

    #[test]
    fn test_glob_escapes_regex_metacharacters() {
        let pattern = EndpointPattern::parse("/v1.0/*").unwrap();
        assert!(pattern.matches(&Method::GET, "/v1.0/x"));
        assert!(!pattern.matches(&Method::GET, "/v1x0/x"));
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(EndpointPattern::parse("").is_err());
        assert!(EndpointPattern::parse("g3t:/x").is_err());
        assert!(EndpointPattern::parse("get:").is_err());
        assert!(EndpointPattern::parse(":/x").is_err());
    }

    #[test]
    fn test_rule_from_config() {
        let rule = RateLimitRule::from_config(&RateLimitRuleConfig::new("*", 2, "1s")).unwrap();
        assert_eq!(rule.limit(), 2);
        assert_eq!(rule.period(), Duration::from_secs(1));
        assert_eq!(rule.period_label(), "1s");
        assert_eq!(rule.pattern().as_str(), "*");
    }

    #[test]
    fn test_rule_from_config_rejects_bad_input() {
        let err = RateLimitRule::from_config(&RateLimitRuleConfig::new("*", 2, "soon")).unwrap_err();
        assert!(matches!(err, RuleError::InvalidPeriod { .. }));

        let err = RateLimitRule::from_config(&RateLimitRuleConfig::new("*", 0, "1s")).unwrap_err();
        assert!(matches!(err, RuleError::ZeroLimit { .. }));
    }

    #[test]
    fn test_format_period() {
        assert_eq!(format_period(Duration::from_secs(1)), "1s");
        assert_eq!(format_period(Duration::from_secs(120)), "2m");
        assert_eq!(format_period(Duration::from_secs(86_400 * 2)), "2d");
        assert_eq!(format_period(Duration::from_millis(250)), "250ms");
    }
}
