//! Transmitter: drains the frame queue, encodes, sends
//!
//! Each frame becomes one datagram addressed to whatever the
//! [`PeerRegistry`] holds at that moment. Encode and send failures are
//! returned from [`Transmitter::transmit`], counted, and dropped by the
//! loop; only the stop flag ends it.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::buffer::{AudioFrame, SharedFrameQueue};
use crate::codec::OpusEncoder;
use crate::constants::TRANSMIT_POLL_TIMEOUT;
use crate::error::{Error, NetworkError, Result};
use crate::network::peer::PeerRegistry;

/// Live counters, shared with the session
#[derive(Debug, Default)]
pub struct SenderStats {
    frames_encoded: AtomicU64,
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    encode_errors: AtomicU64,
    send_errors: AtomicU64,
}

impl SenderStats {
    pub fn snapshot(&self) -> SenderStatsSnapshot {
        SenderStatsSnapshot {
            frames_encoded: self.frames_encoded.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            encode_errors: self.encode_errors.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`SenderStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderStatsSnapshot {
    pub frames_encoded: u64,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub encode_errors: u64,
    pub send_errors: u64,
}

/// Encode-and-send worker
pub struct Transmitter {
    queue: SharedFrameQueue,
    encoder: OpusEncoder,
    socket: UdpSocket,
    peer: PeerRegistry,
    stats: Arc<SenderStats>,
}

impl Transmitter {
    pub fn new(
        queue: SharedFrameQueue,
        encoder: OpusEncoder,
        socket: UdpSocket,
        peer: PeerRegistry,
    ) -> Self {
        Self {
            queue,
            encoder,
            socket,
            peer,
            stats: Arc::new(SenderStats::default()),
        }
    }

    /// Counters that stay readable after the worker is spawned
    pub fn stats(&self) -> Arc<SenderStats> {
        self.stats.clone()
    }

    /// Encode one frame and send it to the current peer.
    ///
    /// Returns the datagram size on success.
    pub fn transmit(&mut self, frame: &AudioFrame) -> Result<usize> {
        let packet = match self.encoder.encode(frame) {
            Ok(packet) => packet,
            Err(e) => {
                self.stats.encode_errors.fetch_add(1, Ordering::Relaxed);
                return Err(e.into());
            }
        };
        self.stats.frames_encoded.fetch_add(1, Ordering::Relaxed);

        let target = self.peer.get();
        match self.socket.send_to(&packet, target) {
            Ok(sent) => {
                self.stats.packets_sent.fetch_add(1, Ordering::Relaxed);
                self.stats.bytes_sent.fetch_add(sent as u64, Ordering::Relaxed);
                Ok(sent)
            }
            Err(e) => {
                self.stats.send_errors.fetch_add(1, Ordering::Relaxed);
                Err(NetworkError::SendFailed(e).into())
            }
        }
    }

    /// Run until `running` is cleared
    pub fn run(mut self, running: Arc<AtomicBool>) {
        tracing::debug!(
            "Transmitter started from {:?}",
            self.socket.local_addr().ok()
        );

        while running.load(Ordering::Acquire) {
            let Some(frame) = self.queue.pop(TRANSMIT_POLL_TIMEOUT) else {
                continue;
            };

            match self.transmit(&frame) {
                Ok(_) => {}
                Err(Error::Codec(e)) => {
                    tracing::debug!("Dropping frame {}: {}", frame.sequence(), e);
                }
                Err(e) => {
                    tracing::debug!("Send to {} failed: {}", self.peer.get(), e);
                }
            }

            self.queue.recycle(frame);
        }

        let stats = self.stats.snapshot();
        tracing::info!(
            "Transmitter stopped: {} packets, {} bytes, {} encode errors, {} send errors",
            stats.packets_sent,
            stats.bytes_sent,
            stats.encode_errors,
            stats.send_errors
        );
    }

    /// Move the worker onto its own thread
    pub fn spawn(self, running: Arc<AtomicBool>) -> Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("hello-tx".to_string())
            .spawn(move || self.run(running))
            .map_err(|e| NetworkError::SpawnFailed(e).into())
    }
}
