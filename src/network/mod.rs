//! Network subsystem: UDP audio out, HELLO discovery in

pub mod discovery;
pub mod peer;
pub mod sender;
pub mod udp;

pub use discovery::{is_hello, DiscoveryListener, DiscoveryState, DiscoveryStats};
pub use peer::{PeerOrigin, PeerRegistry, PeerTarget};
pub use sender::{SenderStats, SenderStatsSnapshot, Transmitter};
pub use udp::{bind_discovery_socket, create_send_socket};
