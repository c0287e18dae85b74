//! Reachable address computation.
//!
//! The loopback URL always comes first. The LAN URL is added when the
//! machine's primary IPv4 address can be determined.
use std::io;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::sync::Arc;

/// Source of the machine's primary non-loopback IPv4 address.
#[cfg_attr(test, mockall::automock)]
pub trait LanAddressSource: Send + Sync {
    fn primary_ipv4(&self) -> io::Result<Ipv4Addr>;
}

/// Determines the primary address from the route the OS would use to reach
/// a public address. Connecting a UDP socket sends no packets.
pub struct RouteProbeSource;

const ROUTE_PROBE_TARGET: &str = "8.8.8.8:80";

impl LanAddressSource for RouteProbeSource {
    fn primary_ipv4(&self) -> io::Result<Ipv4Addr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect(ROUTE_PROBE_TARGET)?;
        match socket.local_addr()?.ip() {
            IpAddr::V4(ip) => Ok(ip),
            IpAddr::V6(ip) => Err(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("primary address {} is not IPv4", ip),
            )),
        }
    }
}

/// Outcome of [`AddressResolver::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Loopback URL first, then the LAN URL if one was found
    pub urls: Vec<String>,
    /// Why the LAN URL is missing, when resolution failed
    pub diagnostic: Option<String>,
}

/// Computes the base URLs a server on a given port is reachable at.
#[derive(Clone)]
pub struct AddressResolver {
    source: Arc<dyn LanAddressSource>,
    include_lan: bool,
}

impl AddressResolver {
    pub fn new() -> Self {
        Self::with_source(Arc::new(RouteProbeSource))
    }

    pub fn with_source(source: Arc<dyn LanAddressSource>) -> Self {
        Self {
            source,
            include_lan: true,
        }
    }

    /// Restricts output to the loopback URL, for servers bound to loopback only.
    pub fn loopback_only(mut self) -> Self {
        self.include_lan = false;
        self
    }

    /// Resolve the URLs for `port`. Never fails; a failed LAN lookup yields
    /// the loopback URL plus a diagnostic.
    pub fn resolve(&self, port: u16) -> Resolution {
        let mut urls = vec![format!("http://{}:{}", Ipv4Addr::LOCALHOST, port)];
        let mut diagnostic = None;

        if self.include_lan {
            match self.source.primary_ipv4() {
                Ok(ip) if ip.is_loopback() || ip.is_unspecified() => {
                    tracing::debug!(%ip, "No distinct LAN address");
                }
                Ok(ip) => urls.push(format!("http://{}:{}", ip, port)),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to resolve LAN address");
                    diagnostic = Some(format!("Error getting network addresses: {}", e));
                }
            }
        }

        Resolution { urls, diagnostic }
    }
}

impl Default for AddressResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lan_address_is_appended() {
        let mut source = MockLanAddressSource::new();
        source
            .expect_primary_ipv4()
            .returning(|| Ok(Ipv4Addr::new(192, 168, 1, 20)));

        let resolution = AddressResolver::with_source(Arc::new(source)).resolve(8010);

        assert_eq!(
            resolution.urls,
            vec!["http://127.0.0.1:8010", "http://192.168.1.20:8010"]
        );
        assert!(resolution.diagnostic.is_none());
    }

    #[test]
    fn test_failed_lookup_keeps_loopback() {
        let mut source = MockLanAddressSource::new();
        source
            .expect_primary_ipv4()
            .returning(|| Err(io::Error::new(io::ErrorKind::NetworkUnreachable, "no route")));

        let resolution = AddressResolver::with_source(Arc::new(source)).resolve(8000);

        assert_eq!(resolution.urls, vec!["http://127.0.0.1:8000"]);
        assert!(resolution.diagnostic.unwrap().contains("no route"));
    }

    #[test]
    fn test_loopback_lan_address_is_not_duplicated() {
        let mut source = MockLanAddressSource::new();
        source
            .expect_primary_ipv4()
            .returning(|| Ok(Ipv4Addr::LOCALHOST));

        let resolution = AddressResolver::with_source(Arc::new(source)).resolve(9000);

        assert_eq!(resolution.urls, vec!["http://127.0.0.1:9000"]);
    }

    #[test]
    fn test_loopback_only_skips_lookup() {
        let mut source = MockLanAddressSource::new();
        source.expect_primary_ipv4().never();

        let resolution = AddressResolver::with_source(Arc::new(source))
            .loopback_only()
            .resolve(9000);

        assert_eq!(resolution.urls, vec!["http://127.0.0.1:9000"]);
    }
}
