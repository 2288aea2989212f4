//! The single mutable send target
//!
//! Written by the discovery listener (or the presentation layer), read by
//! the transmitter before every send. The whole address is swapped under one
//! lock, so a reader never sees the host of one update with the port of
//! another.

use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;

/// How the current target was set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerOrigin {
    /// Placeholder from configuration; no HELLO seen yet
    Default,
    /// Sender address of the latest HELLO datagram
    Discovered,
    /// Set explicitly through [`PeerRegistry::set_override`]
    Override,
}

/// Current target plus where it came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerTarget {
    pub addr: SocketAddr,
    pub origin: PeerOrigin,
}

/// Shared handle to the send target
#[derive(Debug, Clone)]
pub struct PeerRegistry {
    target: Arc<RwLock<PeerTarget>>,
}

impl PeerRegistry {
    pub fn new(default: SocketAddr) -> Self {
        Self {
            target: Arc::new(RwLock::new(PeerTarget {
                addr: default,
                origin: PeerOrigin::Default,
            })),
        }
    }

    /// Address to send the next datagram to
    pub fn get(&self) -> SocketAddr {
        self.target.read().addr
    }

    pub fn target(&self) -> PeerTarget {
        *self.target.read()
    }

    /// Whether any HELLO or override has replaced the default
    pub fn is_known(&self) -> bool {
        self.target.read().origin != PeerOrigin::Default
    }

    /// Record the source of a HELLO; returns the previous target
    pub fn set_discovered(&self, addr: SocketAddr) -> PeerTarget {
        self.replace(PeerTarget {
            addr,
            origin: PeerOrigin::Discovered,
        })
    }

    /// Point the sender somewhere explicitly; a later HELLO still wins
    pub fn set_override(&self, addr: SocketAddr) -> PeerTarget {
        self.replace(PeerTarget {
            addr,
            origin: PeerOrigin::Override,
        })
    }

    /// Go back to the waiting-for-HELLO state
    pub fn reset(&self, default: SocketAddr) {
        self.replace(PeerTarget {
            addr: default,
            origin: PeerOrigin::Default,
        });
    }

    fn replace(&self, next: PeerTarget) -> PeerTarget {
        std::mem::replace(&mut *self.target.write(), next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_default_until_discovered() {
        let peer = PeerRegistry::new(addr("127.0.0.1:5000"));
        assert_eq!(peer.get(), addr("127.0.0.1:5000"));
        assert!(!peer.is_known());

        let previous = peer.set_discovered(addr("192.168.1.20:40000"));
        assert_eq!(previous.origin, PeerOrigin::Default);
        assert_eq!(peer.get(), addr("192.168.1.20:40000"));
        assert!(peer.is_known());
    }

    #[test]
    fn test_later_hello_overwrites_override() {
        let peer = PeerRegistry::new(addr("127.0.0.1:5000"));
        peer.set_override(addr("10.0.0.2:6000"));
        assert_eq!(peer.target().origin, PeerOrigin::Override);

        peer.set_discovered(addr("10.0.0.3:7000"));
        assert_eq!(
            peer.target(),
            PeerTarget {
                addr: addr("10.0.0.3:7000"),
                origin: PeerOrigin::Discovered
            }
        );

        peer.reset(addr("127.0.0.1:5000"));
        assert!(!peer.is_known());
    }

    #[test]
    fn test_reader_never_sees_torn_address() {
        let a = addr("10.0.0.1:1111");
        let b = addr("[fe80::1]:2222");
        let peer = PeerRegistry::new(a);

        let writer = {
            let peer = peer.clone();
            thread::spawn(move || {
                for i in 0..20_000 {
                    peer.set_discovered(if i % 2 == 0 { b } else { a });
                }
            })
        };

        for _ in 0..20_000 {
            let seen = peer.get();
            assert!(seen == a || seen == b, "torn read: {}", seen);
        }
        writer.join().unwrap();
    }
}
