//! # Hello Caster
//!
//! Low-latency live audio streaming over UDP to a receiver that announces
//! itself with `HELLO` datagrams.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                               SENDER                                 │
//! │                                                                      │
//! │  ┌───────────────────┐                                               │
//! │  │ Microphone /      │  driver real-time thread                      │
//! │  │ Loopback (cpal)   │                                               │
//! │  └─────────┬─────────┘                                               │
//! │            ▼                                                         │
//! │  ┌───────────────────┐   normalize: f32→i16, mono→stereo, >2ch→2ch   │
//! │  │  CaptureSource    │   (audio::capture)                            │
//! │  └─────────┬─────────┘                                               │
//! │            ▼                                                         │
//! │  ┌───────────────────┐   bounded, drop-oldest (audio::buffer)        │
//! │  │    FrameQueue     │                                               │
//! │  └─────────┬─────────┘                                               │
//! │            ▼                                                         │
//! │  ┌───────────────────┐   ┌───────────────┐                           │
//! │  │   Transmitter     │──▶│ Opus Encoder  │   (network::sender,       │
//! │  │   thread          │◀──│               │    codec::encoder)        │
//! │  └─────────┬─────────┘   └───────────────┘                           │
//! │            │ send_to(peer.get())                                     │
//! │            │                  ┌───────────────────┐                  │
//! │            │                  │   PeerRegistry    │◀─┐               │
//! │            │                  └───────────────────┘  │               │
//! │            │                  ┌───────────────────┐  │               │
//! │            │                  │ Discovery thread  │──┘               │
//! │            │                  │ (network::discov.)│                  │
//! │            │                  └─────────▲─────────┘                  │
//! └────────────┼────────────────────────────┼────────────────────────────┘
//!              │ one Opus packet / datagram │ "HELLO..."
//!              ▼                            │
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                              RECEIVER                              │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`session::Session`] owns the lifecycle of all of the above.

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod session;

pub use config::{AppConfig, NetworkConfig, SessionConfig, SignalHint};
pub use error::{Error, Result};
pub use session::{Session, SessionStats};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Default sample rate for audio processing
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Channel count on the wire (always stereo)
    pub const CHANNELS: u16 = 2;

    /// Default Opus bitrate in bits per second
    pub const DEFAULT_BITRATE: u32 = 128_000;

    /// Default frame size in samples per channel (10 ms at 48 kHz)
    pub const DEFAULT_FRAME_SIZE: usize = 480;

    /// Default Opus complexity (maximum)
    pub const DEFAULT_COMPLEXITY: u8 = 10;

    /// Default UDP port the receiver listens on for audio
    pub const DEFAULT_AUDIO_PORT: u16 = 5000;

    /// Default UDP port the sender listens on for HELLO datagrams
    pub const DEFAULT_DISCOVERY_PORT: u16 = 5001;

    /// Marker every discovery datagram starts with
    pub const HELLO_MARKER: &[u8] = b"HELLO";

    /// Maximum packet size for UDP
    pub const MAX_PACKET_SIZE: usize = 1472; // MTU - IP/UDP headers

    /// Frame queue capacity (in frames)
    pub const FRAME_QUEUE_CAPACITY: usize = 256;

    /// How long the transmitter waits for a frame before re-checking the stop flag
    pub const TRANSMIT_POLL_TIMEOUT: Duration = Duration::from_millis(50);

    /// Read timeout on the discovery socket
    pub const DISCOVERY_RECV_TIMEOUT: Duration = Duration::from_millis(100);

    /// Largest UDP payload; HELLO datagrams of any size are read whole
    pub const MAX_DATAGRAM_SIZE: usize = 65_536;

    /// Bound on joining a worker thread during stop
    pub const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

    /// IP TOS byte carrying ECT(1), the L4S low-latency low-loss codepoint
    pub const L4S_ECT1_TOS: u32 = 0x01;
}
