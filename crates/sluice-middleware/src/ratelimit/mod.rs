//! Fixed-window rate limiting.
//!
//! - [`rule`]: endpoint patterns and rules compiled from configuration.
//! - [`store`]: the per-key locked counter store.
//! - [`limiter`]: the evaluation algorithm.
//!
//! The HTTP side lives in [`RateLimitMiddleware`](crate::stages::RateLimitMiddleware).
//!
//! # Example
//!
//! ```
//! use http::Method;
//! use sluice_middleware::ratelimit::{MemoryCounterStore, RateLimitRule, RateLimiter};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let rule = RateLimitRule::new("*", 1, Duration::from_secs(1)).unwrap();
//! let limiter = RateLimiter::new(vec![rule], Arc::new(MemoryCounterStore::new()));
//!
//! assert!(limiter.evaluate("10.0.0.1", &Method::GET, "/").unwrap().is_allowed());
//! assert!(!limiter.evaluate("10.0.0.1", &Method::GET, "/").unwrap().is_allowed());
//! ```

pub mod limiter;
pub mod rule;
pub mod store;

pub use limiter::{Decision, Quota, RateLimiter, Rejection};
pub use rule::{format_period, EndpointPattern, RateLimitRule, RuleError};
pub use store::{
    CounterEntry, CounterKey, CounterLease, CounterStore, CounterStoreError, MemoryCounterStore,
};
