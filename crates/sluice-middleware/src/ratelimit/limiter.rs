//! Fixed-window rate limiter.

use super::rule::{EndpointPattern, RateLimitRule, RuleError};
use super::store::{CounterKey, CounterStore, CounterStoreError};
use http::Method;
use sluice_config::RateLimitingConfig;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Quota left under the most constrained rule that admitted a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    /// Requests admitted per period.
    pub limit: u64,
    /// Requests left in the current window.
    pub remaining: u64,
    /// When the current window closes.
    pub reset_at: Instant,
}

/// Why a request was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Time until the exhausted window closes.
    pub retry_after: Duration,
    /// Limit of the exhausted rule.
    pub limit: u64,
    /// Period of the exhausted rule, as configured.
    pub period: String,
}

impl Rejection {
    /// Returns `retry_after` rounded up to whole seconds.
    #[must_use]
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.retry_after.as_secs();
        if self.retry_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }
}

/// Outcome of evaluating a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The request may proceed. Carries the tightest quota, if any rule
    /// applied.
    Allow(Option<Quota>),
    /// The request exceeded a rule.
    Reject(Rejection),
}

impl Decision {
    /// Returns true for [`Decision::Allow`].
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow(_))
    }
}

/// Evaluates requests against a rule set using a shared counter store.
///
/// Rules and whitelists are read-only after construction; the counter store
/// is the only shared mutable state and is locked per key.
pub struct RateLimiter {
    rules: Vec<RateLimitRule>,
    store: Arc<dyn CounterStore>,
    ip_whitelist: HashSet<IpAddr>,
    endpoint_whitelist: Vec<EndpointPattern>,
}

impl RateLimiter {
    /// Creates a limiter with no whitelists.
    pub fn new(rules: Vec<RateLimitRule>, store: Arc<dyn CounterStore>) -> Self {
        Self {
            rules,
            store,
            ip_whitelist: HashSet::new(),
            endpoint_whitelist: Vec::new(),
        }
    }

    /// Creates a limiter from the `rate_limiting` configuration section.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError`] if a rule or whitelist entry is invalid.
    pub fn from_config(
        config: &RateLimitingConfig,
        store: Arc<dyn CounterStore>,
    ) -> Result<Self, RuleError> {
        let rules = config
            .rules
            .iter()
            .map(RateLimitRule::from_config)
            .collect::<Result<Vec<_>, _>>()?;

        let ip_whitelist = config
            .ip_whitelist
            .iter()
            .map(|ip| {
                ip.trim()
                    .parse::<IpAddr>()
                    .map_err(|_| RuleError::InvalidIp(ip.clone()))
            })
            .collect::<Result<HashSet<_>, _>>()?;

        let endpoint_whitelist = config
            .endpoint_whitelist
            .iter()
            .map(|endpoint| EndpointPattern::parse(endpoint))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            rules,
            store,
            ip_whitelist,
            endpoint_whitelist,
        })
    }

    /// Exempts client addresses from limiting.
    #[must_use]
    pub fn with_ip_whitelist(mut self, ips: impl IntoIterator<Item = IpAddr>) -> Self {
        self.ip_whitelist.extend(ips);
        self
    }

    /// Exempts endpoints from limiting.
    #[must_use]
    pub fn with_endpoint_whitelist(
        mut self,
        endpoints: impl IntoIterator<Item = EndpointPattern>,
    ) -> Self {
        self.endpoint_whitelist.extend(endpoints);
        self
    }

    /// Returns the configured rules in order.
    #[must_use]
    pub fn rules(&self) -> &[RateLimitRule] {
        &self.rules
    }

    /// Evaluates a request at the current time.
    ///
    /// # Errors
    ///
    /// Returns [`CounterStoreError`] if the counter store fails.
    pub fn evaluate(
        &self,
        identity: &str,
        method: &Method,
        path: &str,
    ) -> Result<Decision, CounterStoreError> {
        self.evaluate_at(identity, method, path, Instant::now())
    }

    /// Evaluates a request at `now`.
    ///
    /// Applicable rules are charged in configuration order. A rule whose
    /// window is exhausted rejects without incrementing, and later rules are
    /// left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`CounterStoreError`] if the counter store fails.
    pub fn evaluate_at(
        &self,
        identity: &str,
        method: &Method,
        path: &str,
        now: Instant,
    ) -> Result<Decision, CounterStoreError> {
        if self.is_whitelisted(identity, method, path) {
            return Ok(Decision::Allow(None));
        }

        let mut tightest: Option<Quota> = None;

        for rule in self.applicable_rules(method, path) {
            let key = CounterKey::new(identity, rule.pattern().as_str(), rule.period());
            let mut entry = self.store.acquire(&key, now)?;
            // A request that read the clock later may have opened the window first.
            let now = now.max(entry.window_start);

            entry.roll(now, rule.period());
            let reset_at = entry.window_start + rule.period();

            if entry.count >= rule.limit() {
                let rejection = Rejection {
                    retry_after: reset_at.saturating_duration_since(now),
                    limit: rule.limit(),
                    period: rule.period_label().to_string(),
                };
                entry.release();
                return Ok(Decision::Reject(rejection));
            }

            entry.count += 1;
            let quota = Quota {
                limit: rule.limit(),
                remaining: rule.limit() - entry.count,
                reset_at,
            };
            entry.release();

            if tightest.map_or(true, |current| quota.remaining < current.remaining) {
                tightest = Some(quota);
            }
        }

        Ok(Decision::Allow(tightest))
    }

    fn is_whitelisted(&self, identity: &str, method: &Method, path: &str) -> bool {
        let ip_listed = identity
            .parse::<IpAddr>()
            .is_ok_and(|ip| self.ip_whitelist.contains(&ip));

        ip_listed
            || self
                .endpoint_whitelist
                .iter()
                .any(|pattern| pattern.matches(method, path))
    }

    /// Rules matching the request; exact patterns shadow wildcard ones.
    fn applicable_rules<'r>(
        &'r self,
        method: &'r Method,
        path: &'r str,
    ) -> impl Iterator<Item = &'r RateLimitRule> + 'r {
        let exact_matches = self
            .rules
            .iter()
            .any(|rule| !rule.pattern().is_wildcard() && rule.pattern().matches(method, path));

        self.rules.iter().filter(move |rule| {
            rule.pattern().matches(method, path) && (!exact_matches || !rule.pattern().is_wildcard())
        })
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("rules", &self.rules)
            .field("ip_whitelist", &self.ip_whitelist)
            .field("endpoint_whitelist", &self.endpoint_whitelist)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::MemoryCounterStore;
    use sluice_config::RateLimitRuleConfig;

    fn limiter(rules: &[(&str, u64, &str)]) -> RateLimiter {
        let config = RateLimitingConfig {
            rules: rules
                .iter()
                .map(|(endpoint, limit, period)| RateLimitRuleConfig::new(*endpoint, *limit, *period))
                .collect(),
            ..RateLimitingConfig::default()
        };
        RateLimiter::from_config(&config, Arc::new(MemoryCounterStore::new())).unwrap()
    }

    fn eval(limiter: &RateLimiter, identity: &str, path: &str, now: Instant) -> Decision {
        limiter.evaluate_at(identity, &Method::GET, path, now).unwrap()
    }

    #[test]
    fn test_limit_per_window() {
        let limiter = limiter(&[("*", 2, "1s")]);
        let start = Instant::now();

        assert!(eval(&limiter, "1.1.1.1", "/a", start).is_allowed());
        assert!(eval(&limiter, "1.1.1.1", "/a", start).is_allowed());

        let at = start + Duration::from_millis(300);
        let Decision::Reject(rejection) = eval(&limiter, "1.1.1.1", "/b", at) else {
            panic!("third request should be rejected");
        };
        assert_eq!(rejection.retry_after, Duration::from_millis(700));
        assert_eq!(rejection.retry_after_secs(), 1);
        assert_eq!(rejection.limit, 2);
        assert_eq!(rejection.period, "1s");

        // A new window admits again.
        assert!(eval(&limiter, "1.1.1.1", "/a", start + Duration::from_millis(1100)).is_allowed());
    }

    #[test]
    fn test_rejection_does_not_consume_quota() {
        let limiter = limiter(&[("*", 1, "1s")]);
        let start = Instant::now();

        assert!(eval(&limiter, "c", "/", start).is_allowed());
        for _ in 0..5 {
            assert!(!eval(&limiter, "c", "/", start).is_allowed());
        }
        // The window still opens on schedule.
        assert!(eval(&limiter, "c", "/", start + Duration::from_secs(1)).is_allowed());
    }

    #[test]
    fn test_stale_clock_never_extends_retry_after() {
        let limiter = limiter(&[("*", 1, "1s")]);
        let start = Instant::now();

        // The later reading wins the lock and opens the window.
        assert!(eval(&limiter, "c", "/", start + Duration::from_millis(500)).is_allowed());

        let Decision::Reject(rejection) = eval(&limiter, "c", "/", start) else {
            panic!("second request should be rejected");
        };
        assert!(rejection.retry_after <= Duration::from_secs(1));
        assert_eq!(rejection.retry_after_secs(), 1);
    }

    #[test]
    fn test_identities_are_independent() {
        let limiter = limiter(&[("*", 1, "1m")]);
        let now = Instant::now();

        assert!(eval(&limiter, "a", "/", now).is_allowed());
        assert!(eval(&limiter, "b", "/", now).is_allowed());
        assert!(!eval(&limiter, "a", "/", now).is_allowed());
    }

    #[test]
    fn test_exact_rule_shadows_wildcard() {
        let limiter = limiter(&[("*", 1, "1m"), ("get:/api/values", 3, "1m")]);
        let now = Instant::now();

        for _ in 0..3 {
            assert!(eval(&limiter, "a", "/api/values", now).is_allowed());
        }
        assert!(!eval(&limiter, "a", "/api/values", now).is_allowed());

        // Other paths still fall under the wildcard rule.
        assert!(eval(&limiter, "a", "/other", now).is_allowed());
        assert!(!eval(&limiter, "a", "/other", now).is_allowed());
    }

    #[test]
    fn test_all_wildcard_rules_apply() {
        let limiter = limiter(&[("*", 10, "1s"), ("*:/api/*", 2, "1m")]);
        let now = Instant::now();

        let Decision::Allow(Some(quota)) = eval(&limiter, "a", "/api/x", now) else {
            panic!("expected an allowed request with quota");
        };
        assert_eq!(quota.limit, 2);
        assert_eq!(quota.remaining, 1);
        assert_eq!(quota.reset_at, now + Duration::from_secs(60));

        assert!(eval(&limiter, "a", "/api/x", now).is_allowed());
        let Decision::Reject(rejection) = eval(&limiter, "a", "/api/x", now) else {
            panic!("expected rejection by the /api rule");
        };
        assert_eq!(rejection.period, "1m");
    }

    #[test]
    fn test_unmatched_path_is_allowed_without_quota() {
        let limiter = limiter(&[("get:/api/values", 1, "1s")]);
        assert_eq!(
            eval(&limiter, "a", "/elsewhere", Instant::now()),
            Decision::Allow(None)
        );
    }

    #[test]
    fn test_whitelists_bypass() {
        let config = RateLimitingConfig {
            rules: vec![RateLimitRuleConfig::new("*", 1, "1m")],
            ip_whitelist: vec!["127.0.0.1".to_string()],
            endpoint_whitelist: vec!["get:/health".to_string()],
            ..RateLimitingConfig::default()
        };
        let limiter =
            RateLimiter::from_config(&config, Arc::new(MemoryCounterStore::new())).unwrap();
        let now = Instant::now();

        for _ in 0..3 {
            assert_eq!(eval(&limiter, "127.0.0.1", "/x", now), Decision::Allow(None));
            assert_eq!(eval(&limiter, "10.0.0.1", "/health", now), Decision::Allow(None));
        }
    }

    #[test]
    fn test_invalid_whitelist_ip_rejected() {
        let config = RateLimitingConfig {
            ip_whitelist: vec!["localhost".to_string()],
            ..RateLimitingConfig::default()
        };
        let err = RateLimiter::from_config(&config, Arc::new(MemoryCounterStore::new())).unwrap_err();
        assert!(matches!(err, RuleError::InvalidIp(_)));
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let rejection = Rejection {
            retry_after: Duration::from_millis(1001),
            limit: 1,
            period: "2s".to_string(),
        };
        assert_eq!(rejection.retry_after_secs(), 2);

        let exact = Rejection {
            retry_after: Duration::from_secs(3),
            ..rejection
        };
        assert_eq!(exact.retry_after_secs(), 3);
    }
}
