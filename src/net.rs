//! Network helpers: outbound address discovery and listener setup.

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use tokio::net::TcpListener;
use tracing::debug;

/// Public address used only to make the OS pick an outbound interface.
/// No packet is sent to it.
const PROBE_ADDR: SocketAddr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(8, 8, 8, 8), 80));

/// Listen backlog for accepted-but-not-yet-dispatched connections
const LISTEN_BACKLOG: i32 = 128;

/// Discover the machine's LAN address for display purposes.
///
/// Falls back to `127.0.0.1` when no route is available.
pub fn local_ip() -> IpAddr {
    local_ip_via(PROBE_ADDR)
}

/// Same as [`local_ip`], routing toward `probe` instead of the default.
pub fn local_ip_via(probe: SocketAddr) -> IpAddr {
    match outbound_ip(probe) {
        Ok(ip) if !ip.is_unspecified() => ip,
        Ok(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        Err(e) => {
            debug!(error = %e, "No outbound route, using loopback");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

fn outbound_ip(probe: SocketAddr) -> io::Result<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect(probe)?;
    Ok(socket.local_addr()?.ip())
}

/// Create a TCP listener with SO_REUSEADDR so a restarted process can
/// rebind the same port immediately.
///
/// Must be called from within a tokio runtime.
pub fn create_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    socket.set_reuse_address(true)?;
    socket.bind(&SockAddr::from(addr))?;
    socket.listen(LISTEN_BACKLOG)?;

    // Convert to non-blocking for tokio
    socket.set_nonblocking(true)?;
    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    #[test]
    fn test_local_ip_is_ipv4() {
        assert!(local_ip().is_ipv4());
    }

    #[test]
    fn test_local_ip_falls_back_to_loopback() {
        // An IPv4 socket cannot route toward an IPv6 address
        let probe = SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 80);
        assert_eq!(local_ip_via(probe), IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn test_local_ip_via_loopback() {
        let probe = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9);
        assert_eq!(local_ip_via(probe), IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[tokio::test]
    async fn test_create_listener_ephemeral_port() {
        let listener = create_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn test_rebind_after_close() {
        let listener = create_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();

        // Leave a connection behind so the port has lingering state
        let client = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (accepted, _) = listener.accept().await.unwrap();
        drop(accepted);
        drop(client);
        drop(listener);

        let rebound = create_listener(addr).unwrap();
        assert_eq!(rebound.local_addr().unwrap(), addr);
    }
}
