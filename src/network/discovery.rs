//! Discovery listener: learns the receiver address from HELLO datagrams
//!
//! The receiver sends a datagram starting with `HELLO` to the discovery
//! port; its source address becomes the send target. There is no expiry and
//! no reply; every later HELLO simply replaces the target.

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::constants::{DISCOVERY_RECV_TIMEOUT, HELLO_MARKER, MAX_DATAGRAM_SIZE};
use crate::error::{NetworkError, Result};
use crate::network::peer::PeerRegistry;

/// Whether `payload` is a discovery datagram
pub fn is_hello(payload: &[u8]) -> bool {
    payload.starts_with(HELLO_MARKER)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    WaitingForHello,
    PeerKnown,
}

#[derive(Debug, Default)]
pub struct DiscoveryStats {
    hellos: AtomicU64,
    ignored: AtomicU64,
}

impl DiscoveryStats {
    /// HELLO datagrams accepted
    pub fn hellos(&self) -> u64 {
        self.hellos.load(Ordering::Relaxed)
    }

    /// Datagrams that were not HELLO
    pub fn ignored(&self) -> u64 {
        self.ignored.load(Ordering::Relaxed)
    }
}

pub struct DiscoveryListener {
    socket: UdpSocket,
    peer: PeerRegistry,
    state: DiscoveryState,
    stats: Arc<DiscoveryStats>,
}

impl DiscoveryListener {
    /// `socket` must already be bound and carry a read timeout
    pub fn new(socket: UdpSocket, peer: PeerRegistry) -> Self {
        Self {
            socket,
            peer,
            state: DiscoveryState::WaitingForHello,
            stats: Arc::new(DiscoveryStats::default()),
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr().ok()
    }

    pub fn state(&self) -> DiscoveryState {
        self.state
    }

    pub fn stats(&self) -> Arc<DiscoveryStats> {
        self.stats.clone()
    }

    /// Apply one inbound datagram; returns true if it was a HELLO
    pub fn handle_datagram(&mut self, payload: &[u8], from: SocketAddr) -> bool {
        if !is_hello(payload) {
            self.stats.ignored.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        self.stats.hellos.fetch_add(1, Ordering::Relaxed);
        let previous = self.peer.set_discovered(from);
        if previous.addr != from || self.state == DiscoveryState::WaitingForHello {
            tracing::info!("Receiver announced itself at {}", from);
        }
        self.state = DiscoveryState::PeerKnown;
        true
    }

    /// Run until `running` is cleared
    pub fn run(mut self, running: Arc<AtomicBool>) {
        tracing::info!("Listening for HELLO on {:?}", self.local_addr());
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        while running.load(Ordering::Acquire) {
            match self.socket.recv_from(&mut buf) {
                Ok((len, from)) => {
                    self.handle_datagram(&buf[..len], from);
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                Err(e) => {
                    // e.g. ICMP-triggered resets on some hosts; keep listening
                    tracing::debug!("Discovery receive failed: {}", e);
                    thread::sleep(DISCOVERY_RECV_TIMEOUT);
                }
            }
        }

        tracing::debug!(
            "Discovery listener stopped after {} HELLO, {} ignored",
            self.stats.hellos(),
            self.stats.ignored()
        );
    }

    /// Move the listener onto its own thread
    pub fn spawn(self, running: Arc<AtomicBool>) -> Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("hello-discovery".to_string())
            .spawn(move || self.run(running))
            .map_err(|e| NetworkError::SpawnFailed(e).into())
    }
}
