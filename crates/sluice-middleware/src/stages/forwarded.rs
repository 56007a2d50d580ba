//! Forwarded headers middleware.
//!
//! Resolves the client behind trusted reverse proxies. When the immediate
//! peer is trusted (loopback, or listed in `known_proxies`), up to
//! `forward_limit` entries are consumed from the right of
//! `X-Forwarded-For`, each step requiring the previous hop to be trusted.
//! The last consumed address becomes the client identity used by later
//! stages, and the matching `X-Forwarded-Proto` / `X-Forwarded-Host` values
//! are recorded on the context.
//!
//! Consumed entries are removed from the request headers; the peer address
//! is kept in `X-Original-For`.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{PipelineResult, Request};
use http::{HeaderMap, HeaderValue};
use sluice_config::ForwardedHeadersConfig;
use sluice_core::ClientIdentity;
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};

/// Forwarded header names.
pub mod headers {
    /// Client address chain, left to right.
    pub const FORWARDED_FOR: &str = "x-forwarded-for";
    /// Scheme used by the client.
    pub const FORWARDED_PROTO: &str = "x-forwarded-proto";
    /// Host requested by the client.
    pub const FORWARDED_HOST: &str = "x-forwarded-host";
    /// Peer address before forwarding was applied.
    pub const ORIGINAL_FOR: &str = "x-original-for";
}

/// Middleware that applies `X-Forwarded-*` headers from trusted proxies.
#[derive(Debug, Clone)]
pub struct ForwardedHeadersMiddleware {
    known_proxies: HashSet<IpAddr>,
    forward_limit: usize,
}

impl ForwardedHeadersMiddleware {
    /// Trusts loopback peers only and consumes one forwarded entry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            known_proxies: HashSet::new(),
            forward_limit: 1,
        }
    }

    /// Creates the middleware from the `forwarded_headers` section.
    /// Entries of `known_proxies` that are not addresses are skipped.
    #[must_use]
    pub fn from_config(config: &ForwardedHeadersConfig) -> Self {
        let known_proxies = config
            .known_proxies
            .iter()
            .filter_map(|proxy| match proxy.trim().parse() {
                Ok(ip) => Some(ip),
                Err(_) => {
                    tracing::warn!(proxy = %proxy, "Ignoring known proxy that is not an IP address");
                    None
                }
            })
            .collect();
        Self {
            known_proxies,
            forward_limit: config.forward_limit,
        }
    }

    /// Adds a trusted proxy.
    #[must_use]
    pub fn known_proxy(mut self, ip: IpAddr) -> Self {
        self.known_proxies.insert(ip);
        self
    }

    /// Sets how many forwarded entries may be consumed.
    #[must_use]
    pub fn forward_limit(mut self, limit: usize) -> Self {
        self.forward_limit = limit;
        self
    }

    fn is_trusted(&self, ip: IpAddr) -> bool {
        ip.is_loopback() || self.known_proxies.contains(&ip)
    }

    /// Walks the forwarded chain from the right. Returns the resolved client
    /// address and how many entries were consumed.
    fn resolve(&self, peer: IpAddr, chain: &[&str]) -> (IpAddr, usize) {
        let mut current = peer;
        let mut consumed = 0;

        for entry in chain.iter().rev().take(self.forward_limit) {
            if !self.is_trusted(current) {
                break;
            }
            let Some(ip) = parse_forwarded_ip(entry) else {
                break;
            };
            current = ip;
            consumed += 1;
        }

        (current, consumed)
    }

    fn apply(&self, ctx: &mut MiddlewareContext, request: &mut Request) {
        let Some(peer) = ctx.peer_addr() else {
            return;
        };

        let chain = header_list(request.headers(), headers::FORWARDED_FOR);
        if chain.is_empty() {
            return;
        }
        let chain: Vec<&str> = chain.iter().map(String::as_str).collect();

        let (client, consumed) = self.resolve(peer.ip(), &chain);
        if consumed == 0 {
            return;
        }

        let protos = header_list(request.headers(), headers::FORWARDED_PROTO);
        if let Some(proto) = nth_from_right(&protos, consumed) {
            ctx.set_scheme(proto.to_ascii_lowercase());
        }
        let hosts = header_list(request.headers(), headers::FORWARDED_HOST);
        if let Some(host) = nth_from_right(&hosts, consumed) {
            ctx.set_host(host.clone());
        }

        tracing::trace!(peer = %peer, client = %client, consumed, "Applied forwarded headers");
        ctx.set_identity(ClientIdentity::Ip(client));

        let remaining = chain[..chain.len() - consumed].join(", ");
        let out = request.headers_mut();
        if let Ok(original) = HeaderValue::from_str(&peer.to_string()) {
            out.insert(headers::ORIGINAL_FOR, original);
        }
        match HeaderValue::from_str(&remaining) {
            Ok(value) if !remaining.is_empty() => {
                out.insert(headers::FORWARDED_FOR, value);
            }
            _ => {
                out.remove(headers::FORWARDED_FOR);
            }
        }
    }
}

impl Default for ForwardedHeadersMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

/// Comma-separated values of every occurrence of a header, in order.
fn header_list(headers: &HeaderMap, name: &str) -> Vec<String> {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .collect()
}

/// The value matching the `n`th consumed entry, or the leftmost when the
/// list is shorter.
fn nth_from_right(values: &[String], n: usize) -> Option<&String> {
    if values.is_empty() {
        return None;
    }
    let index = values.len().saturating_sub(n);
    values.get(index)
}

/// Parses `1.2.3.4`, `1.2.3.4:80`, `::1` or `[::1]:80`.
fn parse_forwarded_ip(entry: &str) -> Option<IpAddr> {
    entry
        .parse::<IpAddr>()
        .ok()
        .or_else(|| entry.parse::<SocketAddr>().ok().map(|addr| addr.ip()))
        .or_else(|| {
            entry
                .strip_prefix('[')
                .and_then(|e| e.strip_suffix(']'))
                .and_then(|e| e.parse().ok())
        })
}

impl Middleware for ForwardedHeadersMiddleware {
    fn name(&self) -> &'static str {
        "forwarded-headers"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        mut request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, PipelineResult> {
        self.apply(ctx, &mut request);
        next.run(ctx, request)
    }
}
