//! Session lifecycle: start, stop, reconfigure
//!
//! A running session owns three live execution contexts: the driver's
//! capture callback, the transmitter thread and the discovery thread. They
//! share only the frame queue and the peer registry.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::buffer::{FramePool, FrameQueue, SharedFrameQueue};
use crate::audio::capture::{CaptureBackend, CaptureSource, CaptureStream, CpalBackend};
use crate::codec::OpusEncoder;
use crate::config::{NetworkConfig, SessionConfig};
use crate::constants::{DISCOVERY_RECV_TIMEOUT, WORKER_JOIN_TIMEOUT};
use crate::error::Result;
use crate::network::{
    bind_discovery_socket, create_send_socket, DiscoveryListener, DiscoveryStats, PeerRegistry,
    PeerTarget, SenderStats, SenderStatsSnapshot, Transmitter,
};

/// Spare pool buffers beyond the queue capacity: one being filled by the
/// callback, one being encoded, plus slack.
const POOL_SLACK: usize = 4;

/// Snapshot of a running session's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub sender: SenderStatsSnapshot,
    /// Frames handed over by the capture callback
    pub frames_captured: u64,
    /// Frames discarded by the queue's drop-oldest policy
    pub frames_dropped: u64,
    pub frames_queued: usize,
    pub hellos_received: u64,
    pub datagrams_ignored: u64,
    pub uptime: Duration,
}

struct RunningSession {
    config: SessionConfig,
    capture: Box<dyn CaptureStream>,
    running: Arc<AtomicBool>,
    transmitter: JoinHandle<()>,
    listener: JoinHandle<()>,
    queue: SharedFrameQueue,
    sender_stats: Arc<SenderStats>,
    discovery_stats: Arc<DiscoveryStats>,
    discovery_addr: SocketAddr,
    started_at: Instant,
}

/// The streaming pipeline as seen by the presentation layer
pub struct Session<B: CaptureBackend = CpalBackend> {
    backend: B,
    peer: PeerRegistry,
    active: Option<RunningSession>,
}

impl Session<CpalBackend> {
    /// Session capturing through cpal
    pub fn with_cpal() -> Self {
        Self::new(CpalBackend)
    }
}

impl Default for Session<CpalBackend> {
    fn default() -> Self {
        Self::with_cpal()
    }
}

impl<B: CaptureBackend> Session<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            peer: PeerRegistry::new(NetworkConfig::default().default_peer),
            active: None,
        }
    }

    /// Start streaming. A no-op when already running.
    ///
    /// On error nothing opened so far stays open and the session remains
    /// stopped.
    pub fn start(&mut self, config: SessionConfig) -> Result<()> {
        if self.active.is_some() {
            tracing::debug!("start() ignored: session already running");
            return Ok(());
        }

        config.validate()?;

        let encoder = OpusEncoder::new(&config)?;
        let send_socket = create_send_socket(config.network.low_latency_marking)?;
        let discovery_socket =
            bind_discovery_socket(config.network.discovery_port, DISCOVERY_RECV_TIMEOUT)?;
        let discovery_addr = discovery_socket.local_addr()?;

        let pool = Arc::new(FramePool::new(
            config.queue_capacity + POOL_SLACK,
            config.frame_len(),
        ));
        let queue = Arc::new(FrameQueue::with_pool(config.queue_capacity, pool.clone()));

        self.peer.reset(config.network.default_peer);

        let mut capture = self
            .backend
            .open(&config, CaptureSource::new(queue.clone(), pool))?;

        let running = Arc::new(AtomicBool::new(true));

        let transmitter = Transmitter::new(queue.clone(), encoder, send_socket, self.peer.clone());
        let sender_stats = transmitter.stats();
        let transmitter = match transmitter.spawn(running.clone()) {
            Ok(handle) => handle,
            Err(e) => {
                capture.stop();
                return Err(e);
            }
        };

        let listener = DiscoveryListener::new(discovery_socket, self.peer.clone());
        let discovery_stats = listener.stats();
        let listener = match listener.spawn(running.clone()) {
            Ok(handle) => handle,
            Err(e) => {
                capture.stop();
                running.store(false, Ordering::Release);
                join_with_timeout(transmitter, "transmitter", WORKER_JOIN_TIMEOUT);
                return Err(e);
            }
        };

        tracing::info!(
            "Session started: {} Hz, {} samples/frame, {} bps, {} frame queue, HELLO on {}, default peer {}",
            config.sample_rate,
            config.frame_size,
            config.bitrate,
            queue.capacity(),
            discovery_addr,
            config.network.default_peer
        );

        self.active = Some(RunningSession {
            config,
            capture,
            running,
            transmitter,
            listener,
            queue,
            sender_stats,
            discovery_stats,
            discovery_addr,
            started_at: Instant::now(),
        });
        Ok(())
    }

    /// Stop streaming. A no-op when already stopped.
    ///
    /// Capture stops first so no new frames arrive; the workers then get
    /// a bounded time to exit. The encoder and both sockets are owned by the
    /// worker threads and are released as each one exits. A worker that
    /// overruns the join timeout is detached and keeps its socket until it
    /// observes the stop flag, so an immediate `start` on the same discovery
    /// port can fail with a bind error in that case.
    pub fn stop(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };

        active.capture.stop();
        active.running.store(false, Ordering::Release);

        join_with_timeout(active.transmitter, "transmitter", WORKER_JOIN_TIMEOUT);
        join_with_timeout(active.listener, "discovery listener", WORKER_JOIN_TIMEOUT);

        let discarded = active.queue.clear();
        tracing::info!(
            "Session stopped after {:.1}s ({} queued frames discarded)",
            active.started_at.elapsed().as_secs_f32(),
            discarded
        );
    }

    /// Stop, then start with a new configuration
    pub fn restart(&mut self, config: SessionConfig) -> Result<()> {
        self.stop();
        self.start(config)
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// Current send target
    pub fn peer(&self) -> SocketAddr {
        self.peer.get()
    }

    pub fn peer_target(&self) -> PeerTarget {
        self.peer.target()
    }

    /// Override the send target until the next HELLO arrives
    pub fn set_peer(&self, addr: SocketAddr) {
        let previous = self.peer.set_override(addr);
        tracing::info!("Peer overridden: {} -> {}", previous.addr, addr);
    }

    /// Local address of the discovery socket while running
    pub fn discovery_addr(&self) -> Option<SocketAddr> {
        self.active.as_ref().map(|a| a.discovery_addr)
    }

    /// Configuration of the running session
    pub fn config(&self) -> Option<&SessionConfig> {
        self.active.as_ref().map(|a| &a.config)
    }

    pub fn stats(&self) -> Option<SessionStats> {
        self.active.as_ref().map(|a| SessionStats {
            sender: a.sender_stats.snapshot(),
            frames_captured: a.queue.pushed(),
            frames_dropped: a.queue.dropped(),
            frames_queued: a.queue.len(),
            hellos_received: a.discovery_stats.hellos(),
            datagrams_ignored: a.discovery_stats.ignored(),
            uptime: a.started_at.elapsed(),
        })
    }
}

impl<B: CaptureBackend> Drop for Session<B> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Join `handle` if it finishes within `timeout`; otherwise detach it.
fn join_with_timeout(handle: JoinHandle<()>, name: &str, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            tracing::warn!("{} did not exit within {:?}; detaching", name, timeout);
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }

    if handle.join().is_err() {
        tracing::warn!("{} panicked", name);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AudioError, Error};
    use crate::network::PeerOrigin;
    use std::net::UdpSocket;

    struct IdleStream;

    impl CaptureStream for IdleStream {
        fn stop(&mut self) {}
    }

    /// Opens nothing; the pipeline just idles
    struct IdleBackend;

    impl CaptureBackend for IdleBackend {
        fn open(
            &self,
            _config: &SessionConfig,
            _source: CaptureSource,
        ) -> std::result::Result<Box<dyn CaptureStream>, AudioError> {
            Ok(Box::new(IdleStream))
        }
    }

    struct FailingBackend;

    impl CaptureBackend for FailingBackend {
        fn open(
            &self,
            _config: &SessionConfig,
            _source: CaptureSource,
        ) -> std::result::Result<Box<dyn CaptureStream>, AudioError> {
            Err(AudioError::DeviceNotFound("input:missing".into()))
        }
    }

    fn test_config() -> SessionConfig {
        let mut config = SessionConfig {
            frame_size: 240,
            ..Default::default()
        };
        config.network.discovery_port = 0;
        config
    }

    fn free_port() -> u16 {
        UdpSocket::bind("0.0.0.0:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    #[test]
    fn test_start_stop_lifecycle() {
        let mut session = Session::new(IdleBackend);
        assert!(!session.is_running());
        assert!(session.stats().is_none());

        session.start(test_config()).unwrap();
        assert!(session.is_running());
        assert!(session.discovery_addr().is_some());
        assert_eq!(session.config().map(|c| c.frame_size), Some(240));

        // Second start is a no-op
        session.start(test_config()).unwrap();
        assert!(session.is_running());

        let begin = Instant::now();
        session.stop();
        assert!(!session.is_running());
        assert!(begin.elapsed() < Duration::from_secs(1));

        // Second stop is a no-op
        session.stop();
        assert!(!session.is_running());
    }

    #[test]
    fn test_peer_starts_at_configured_default() {
        let mut config = test_config();
        config.network.default_peer = "127.0.0.1:45678".parse().unwrap();

        let mut session = Session::new(IdleBackend);
        session.set_peer("10.1.1.1:1000".parse().unwrap());
        session.start(config).unwrap();

        assert_eq!(session.peer(), "127.0.0.1:45678".parse().unwrap());
        assert_eq!(session.peer_target().origin, PeerOrigin::Default);

        session.set_peer("10.1.1.2:2000".parse().unwrap());
        assert_eq!(session.peer_target().origin, PeerOrigin::Override);
        session.stop();
    }

    #[test]
    fn test_invalid_config_fails_fast() {
        let mut session = Session::new(IdleBackend);
        let config = SessionConfig {
            frame_size: 123,
            ..test_config()
        };
        assert!(matches!(session.start(config), Err(Error::Config(_))));
        assert!(!session.is_running());
    }

    #[test]
    fn test_failed_capture_releases_discovery_port() {
        let port = free_port();
        let mut config = test_config();
        config.network.discovery_port = port;

        let mut session = Session::new(FailingBackend);
        assert!(matches!(
            session.start(config),
            Err(Error::Audio(AudioError::DeviceNotFound(_)))
        ));
        assert!(!session.is_running());

        // The port must be free again
        assert!(UdpSocket::bind(("0.0.0.0", port)).is_ok());
    }

    #[test]
    fn test_discovery_port_in_use_is_setup_error() {
        let holder = UdpSocket::bind("0.0.0.0:0").unwrap();
        let mut config = test_config();
        config.network.discovery_port = holder.local_addr().unwrap().port();

        let mut session = Session::new(IdleBackend);
        assert!(matches!(session.start(config), Err(Error::Network(_))));
        assert!(!session.is_running());
    }

    #[test]
    fn test_stop_releases_discovery_port_for_next_start() {
        let port = free_port();
        let mut config = test_config();
        config.network.discovery_port = port;

        let mut session = Session::new(IdleBackend);
        session.start(config.clone()).unwrap();
        assert_eq!(session.discovery_addr().map(|a| a.port()), Some(port));

        session.stop();
        assert!(UdpSocket::bind(("0.0.0.0", port)).is_ok());

        session.start(config).unwrap();
        assert_eq!(session.discovery_addr().map(|a| a.port()), Some(port));
        session.stop();
    }

    #[test]
    fn test_restart_applies_new_config() {
        let mut session = Session::new(IdleBackend);
        session.start(test_config()).unwrap();

        let config = SessionConfig {
            frame_size: 480,
            bitrate: 64_000,
            ..test_config()
        };
        session.restart(config).unwrap();

        assert!(session.is_running());
        assert_eq!(session.config().map(|c| c.bitrate), Some(64_000));
        session.stop();
    }

    #[test]
    fn test_join_with_timeout_detaches_stuck_thread() {
        let handle = thread::spawn(|| thread::sleep(Duration::from_millis(300)));
        assert!(!join_with_timeout(handle, "sleeper", Duration::from_millis(20)));

        let handle = thread::spawn(|| {});
        assert!(join_with_timeout(handle, "quick", Duration::from_secs(1)));
    }
}
