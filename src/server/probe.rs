use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{Instant, sleep, timeout};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const CONNECT_TIMEOUT: Duration = Duration::from_millis(250);

/// Port availability checks.
///
/// Probing is inherently racy: a port reported free may be taken before the
/// server binds it, so a bind failure at launch time stays authoritative.
pub struct PortProbe;

impl PortProbe {
    /// Check if `port` can be bound on all interfaces.
    ///
    /// The throwaway listener is dropped, and the socket released, before
    /// this returns.
    pub fn is_available(port: u16) -> bool {
        Self::is_available_on(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)
    }

    /// Check if `port` can be bound on `host`.
    pub fn is_available_on(host: IpAddr, port: u16) -> bool {
        TcpListener::bind(SocketAddr::new(host, port)).is_ok()
    }

    /// Check if something accepts TCP connections on `host:port`. A wildcard
    /// host is probed through loopback.
    pub async fn is_listening(host: IpAddr, port: u16) -> bool {
        let host = match host {
            IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(std::net::Ipv6Addr::LOCALHOST),
            other => other,
        };
        let addr = SocketAddr::new(host, port);
        matches!(timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await, Ok(Ok(_)))
    }

    /// Poll until `port` can be bound again on `host`, for at most `limit`.
    ///
    /// Returns whether the port was released in time.
    pub async fn wait_until_released(host: IpAddr, port: u16, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            if Self::is_available_on(host, port) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound_port_is_unavailable() {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();

        assert!(!PortProbe::is_available(port));

        drop(listener);
        assert!(PortProbe::is_available(port));
    }

    #[tokio::test]
    async fn test_is_listening() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();

        let wildcard = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

        assert!(PortProbe::is_listening(wildcard, port).await);

        drop(listener);
        assert!(!PortProbe::is_listening(wildcard, port).await);
    }

    #[tokio::test]
    async fn test_wait_until_released_times_out_while_held() {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let host = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

        assert!(!PortProbe::wait_until_released(host, port, Duration::from_millis(120)).await);

        drop(listener);
        assert!(PortProbe::wait_until_released(host, port, Duration::from_millis(120)).await);
    }
}
