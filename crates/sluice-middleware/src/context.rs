//! Middleware context types.
//!
//! The [`MiddlewareContext`] carries request-scoped state through the
//! pipeline. The server creates one per request and hands it to
//! [`Pipeline::handle`](crate::Pipeline::handle) by mutable reference; it is
//! never shared between requests.

use sluice_core::{ClientIdentity, RequestId};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Context that flows through the middleware pipeline.
///
/// Units enrich it as the request passes (the forwarded-headers stage
/// resolves the client identity, a `map` branch records the matched path
/// base) and can exchange arbitrary typed values through its extensions.
///
/// # Example
///
/// ```
/// use sluice_middleware::context::MiddlewareContext;
///
/// let ctx = MiddlewareContext::new().with_peer_addr("10.0.0.7:52100".parse().unwrap());
///
/// assert_eq!(ctx.identity().key(), "10.0.0.7");
/// ```
#[derive(Debug)]
pub struct MiddlewareContext {
    /// Unique identifier for this request.
    request_id: RequestId,

    /// Who the request is attributed to.
    identity: ClientIdentity,

    /// Address of the immediate TCP peer.
    peer_addr: Option<SocketAddr>,

    /// Path prefix consumed by `map` branches.
    path_base: String,

    /// Scheme reported by a trusted proxy.
    scheme: Option<String>,

    /// Host reported by a trusted proxy.
    host: Option<String>,

    /// When the request started processing.
    started_at: Instant,

    /// Type-erased extension data.
    extensions: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl MiddlewareContext {
    /// Creates a new middleware context with a fresh request ID.
    #[must_use]
    pub fn new() -> Self {
        Self::with_request_id(RequestId::new())
    }

    /// Creates a context with a specific request ID.
    #[must_use]
    pub fn with_request_id(request_id: RequestId) -> Self {
        Self {
            request_id,
            identity: ClientIdentity::Unknown,
            peer_addr: None,
            path_base: String::new(),
            scheme: None,
            host: None,
            started_at: Instant::now(),
            extensions: HashMap::new(),
        }
    }

    /// Records the TCP peer and attributes the request to its IP.
    #[must_use]
    pub fn with_peer_addr(mut self, peer_addr: SocketAddr) -> Self {
        self.peer_addr = Some(peer_addr);
        self.identity = ClientIdentity::Ip(peer_addr.ip());
        self
    }

    /// Returns the request ID.
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Sets the request ID.
    pub fn set_request_id(&mut self, request_id: RequestId) {
        self.request_id = request_id;
    }

    /// Returns the client identity.
    #[must_use]
    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    /// Sets the client identity.
    pub fn set_identity(&mut self, identity: ClientIdentity) {
        self.identity = identity;
    }

    /// Returns the address of the immediate peer, if known.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Returns the path prefix consumed by enclosing `map` branches.
    ///
    /// Empty outside any branch.
    #[must_use]
    pub fn path_base(&self) -> &str {
        &self.path_base
    }

    /// Replaces the path base, returning the previous one.
    pub(crate) fn replace_path_base(&mut self, path_base: String) -> String {
        std::mem::replace(&mut self.path_base, path_base)
    }

    /// Reconstructs the path the client sent from the path base and the
    /// (possibly branch-relative) path the current unit sees.
    #[must_use]
    pub fn full_path(&self, path: &str) -> String {
        if self.path_base.is_empty() {
            path.to_string()
        } else if path == "/" {
            self.path_base.clone()
        } else {
            format!("{}{path}", self.path_base)
        }
    }

    /// Returns the scheme reported by a trusted proxy.
    #[must_use]
    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    /// Sets the scheme.
    pub fn set_scheme(&mut self, scheme: impl Into<String>) {
        self.scheme = Some(scheme.into());
    }

    /// Returns the host reported by a trusted proxy.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Sets the host.
    pub fn set_host(&mut self, host: impl Into<String>) {
        self.host = Some(host.into());
    }

    /// Returns when the request started processing.
    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Returns the elapsed time since the request started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Stores a typed extension value.
    ///
    /// # Example
    ///
    /// ```
    /// use sluice_middleware::context::MiddlewareContext;
    ///
    /// struct ExecutionOrder(Vec<&'static str>);
    ///
    /// let mut ctx = MiddlewareContext::new();
    /// ctx.set_extension(ExecutionOrder(vec!["before"]));
    ///
    /// assert_eq!(ctx.get_extension::<ExecutionOrder>().unwrap().0, ["before"]);
    /// ```
    pub fn set_extension<T: Send + Sync + 'static>(&mut self, value: T) {
        self.extensions.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Retrieves a typed extension value.
    #[must_use]
    pub fn get_extension<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref())
    }

    /// Retrieves a typed extension value mutably.
    pub fn get_extension_mut<T: Send + Sync + 'static>(&mut self) -> Option<&mut T> {
        self.extensions
            .get_mut(&TypeId::of::<T>())
            .and_then(|v| v.downcast_mut())
    }

    /// Removes and returns a typed extension value.
    pub fn remove_extension<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.extensions
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast().ok())
            .map(|b| *b)
    }

    /// Checks if an extension of the given type exists.
    #[must_use]
    pub fn has_extension<T: Send + Sync + 'static>(&self) -> bool {
        self.extensions.contains_key(&TypeId::of::<T>())
    }
}

impl Default for MiddlewareContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_new_context_has_unknown_identity() {
        let ctx = MiddlewareContext::new();
        assert_eq!(ctx.identity(), &ClientIdentity::Unknown);
        assert!(ctx.peer_addr().is_none());
        assert_eq!(ctx.path_base(), "");
    }

    #[test]
    fn test_peer_addr_sets_identity() {
        let addr: SocketAddr = "192.168.1.20:40000".parse().unwrap();
        let ctx = MiddlewareContext::new().with_peer_addr(addr);
        assert_eq!(ctx.peer_addr(), Some(addr));
        assert_eq!(
            ctx.identity(),
            &ClientIdentity::Ip(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)))
        );
    }

    #[test]
    fn test_full_path() {
        let mut ctx = MiddlewareContext::new();
        assert_eq!(ctx.full_path("/a/b"), "/a/b");

        ctx.replace_path_base("/usingmapbranch".to_string());
        assert_eq!(ctx.full_path("/"), "/usingmapbranch");
        assert_eq!(ctx.full_path("/x"), "/usingmapbranch/x");
    }

    #[test]
    fn test_forwarded_scheme_and_host() {
        let mut ctx = MiddlewareContext::new();
        ctx.set_scheme("https");
        ctx.set_host("api.example.com");
        assert_eq!(ctx.scheme(), Some("https"));
        assert_eq!(ctx.host(), Some("api.example.com"));
    }

    #[test]
    fn test_extensions() {
        #[derive(Debug, Clone, PartialEq)]
        struct Visits(u32);

        let mut ctx = MiddlewareContext::new();
        assert!(!ctx.has_extension::<Visits>());

        ctx.set_extension(Visits(1));
        if let Some(visits) = ctx.get_extension_mut::<Visits>() {
            visits.0 += 1;
        }
        assert_eq!(ctx.get_extension::<Visits>(), Some(&Visits(2)));

        assert_eq!(ctx.remove_extension::<Visits>(), Some(Visits(2)));
        assert!(!ctx.has_extension::<Visits>());
    }

    #[test]
    fn test_request_id_override() {
        let mut ctx = MiddlewareContext::new();
        let id = RequestId::new();
        ctx.set_request_id(id);
        assert_eq!(ctx.request_id(), id);
    }
}
