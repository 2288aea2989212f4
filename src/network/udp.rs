//! UDP socket setup

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use crate::constants::L4S_ECT1_TOS;
use crate::error::NetworkError;

/// Open the unconnected socket audio datagrams are sent from.
///
/// With `low_latency_marking` every datagram carries the L4S ECT(1)
/// codepoint for the lifetime of the socket. A host that refuses the option
/// still gets a working, unmarked socket.
pub fn create_send_socket(low_latency_marking: bool) -> Result<UdpSocket, NetworkError> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
    let bind_failed = |source: std::io::Error| NetworkError::BindFailed {
        addr: addr.to_string(),
        source,
    };

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_failed)?;

    if low_latency_marking {
        if let Err(e) = socket.set_tos(L4S_ECT1_TOS) {
            tracing::warn!("Could not mark audio socket for low latency: {}", e);
        }
    }

    socket.bind(&addr.into()).map_err(bind_failed)?;
    Ok(socket.into())
}

/// Bind the discovery socket on `port` (0 = ephemeral) with a read timeout
pub fn bind_discovery_socket(port: u16, read_timeout: Duration) -> Result<UdpSocket, NetworkError> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let socket = UdpSocket::bind(addr).map_err(|source| NetworkError::BindFailed {
        addr: addr.to_string(),
        source,
    })?;

    socket
        .set_read_timeout(Some(read_timeout))
        .map_err(|e| NetworkError::SocketOption(e.to_string()))?;

    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_socket_is_bound() {
        let socket = create_send_socket(false).unwrap();
        assert_ne!(socket.local_addr().unwrap().port(), 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_marking_sets_ect1() {
        let marked = create_send_socket(true).unwrap();
        assert_eq!(socket2::SockRef::from(&marked).tos().unwrap(), L4S_ECT1_TOS);

        let plain = create_send_socket(false).unwrap();
        assert_eq!(socket2::SockRef::from(&plain).tos().unwrap(), 0);
    }

    #[test]
    fn test_discovery_port_conflict_is_bind_error() {
        let first = bind_discovery_socket(0, Duration::from_millis(10)).unwrap();
        let port = first.local_addr().unwrap().port();

        assert!(matches!(
            bind_discovery_socket(port, Duration::from_millis(10)),
            Err(NetworkError::BindFailed { .. })
        ));
    }

    #[test]
    fn test_discovery_socket_times_out() {
        let socket = bind_discovery_socket(0, Duration::from_millis(20)).unwrap();
        let mut buf = [0u8; 16];
        let err = socket.recv_from(&mut buf).unwrap_err();
        assert!(matches!(
            err.kind(),
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
        ));
    }
}
