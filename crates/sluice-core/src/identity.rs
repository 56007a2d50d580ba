//! Client identity.
//!
//! The identity is what the rate limiter counts against. It is derived from
//! the network origin of the request: the peer address of the TCP connection,
//! or the client address recovered from a trusted `X-Forwarded-For` chain.

use std::fmt;
use std::net::IpAddr;

/// Who sent a request, as far as the pipeline can tell.
///
/// # Example
///
/// ```
/// use sluice_core::ClientIdentity;
/// use std::net::{IpAddr, Ipv4Addr};
///
/// let identity = ClientIdentity::Ip(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)));
/// assert_eq!(identity.key(), "10.0.0.7");
/// assert_eq!(ClientIdentity::Unknown.key(), "unknown");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum ClientIdentity {
    /// A client IP address.
    Ip(IpAddr),
    /// An opaque client identifier, e.g. an API client id header.
    Client(String),
    /// No origin could be determined.
    #[default]
    Unknown,
}

impl ClientIdentity {
    /// Returns the string used as the identity part of a counter key.
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::Ip(ip) => ip.to_string(),
            Self::Client(id) => id.clone(),
            Self::Unknown => "unknown".to_string(),
        }
    }

    /// Returns the IP address, if this identity is address based.
    #[must_use]
    pub const fn ip(&self) -> Option<IpAddr> {
        match self {
            Self::Ip(ip) => Some(*ip),
            _ => None,
        }
    }
}

impl From<IpAddr> for ClientIdentity {
    fn from(ip: IpAddr) -> Self {
        Self::Ip(ip)
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(ip) => write!(f, "{ip}"),
            Self::Client(id) => write!(f, "client:{id}"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_ip_key() {
        let identity = ClientIdentity::from(IpAddr::V6(Ipv6Addr::LOCALHOST));
        assert_eq!(identity.key(), "::1");
        assert_eq!(identity.ip(), Some(IpAddr::V6(Ipv6Addr::LOCALHOST)));
    }

    #[test]
    fn test_client_key_and_display() {
        let identity = ClientIdentity::Client("mobile-app".to_string());
        assert_eq!(identity.key(), "mobile-app");
        assert_eq!(identity.to_string(), "client:mobile-app");
        assert!(identity.ip().is_none());
    }

    #[test]
    fn test_default_is_unknown() {
        assert_eq!(ClientIdentity::default(), ClientIdentity::Unknown);
        assert_eq!(ClientIdentity::Unknown.key(), "unknown");
    }

    #[test]
    fn test_distinct_ips_have_distinct_keys() {
        let a = ClientIdentity::Ip(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        let b = ClientIdentity::Ip(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)));
        assert_ne!(a.key(), b.key());
    }
}
