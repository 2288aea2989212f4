//! Session and application configuration
//!
//! [`SessionConfig`] is fixed for the lifetime of one running session.
//! [`AppConfig`] wraps it for the binaries and is read from a TOML file.

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::device::DeviceSelection;
use crate::constants::*;
use crate::error::{Error, Result};

/// Sample rates accepted by the Opus encoder
pub const OPUS_SAMPLE_RATES: [u32; 5] = [8000, 12000, 16000, 24000, 48000];

/// Frame durations accepted by Opus, in units of 2.5 ms
const OPUS_FRAME_UNITS: [usize; 6] = [1, 2, 4, 8, 16, 24];

/// Signal-type hint handed to the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalHint {
    Auto,
    Voice,
    #[default]
    Music,
}

/// Network settings for one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Port the discovery listener binds; 0 picks an ephemeral port
    pub discovery_port: u16,
    /// Send target used until the first HELLO arrives
    pub default_peer: SocketAddr,
    /// Mark outgoing datagrams with the L4S ECT(1) codepoint
    pub low_latency_marking: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            discovery_port: DEFAULT_DISCOVERY_PORT,
            default_peer: SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::LOCALHOST,
                DEFAULT_AUDIO_PORT,
            )),
            low_latency_marking: false,
        }
    }
}

/// Everything a session needs to start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub sample_rate: u32,
    /// Samples per channel in one frame
    pub frame_size: usize,
    pub bitrate: u32,
    /// Opus complexity, 0..=10
    pub complexity: u8,
    pub signal: SignalHint,
    pub device: DeviceSelection,
    pub queue_capacity: usize,
    pub network: NetworkConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            frame_size: DEFAULT_FRAME_SIZE,
            bitrate: DEFAULT_BITRATE,
            complexity: DEFAULT_COMPLEXITY,
            signal: SignalHint::Music,
            device: DeviceSelection::default(),
            queue_capacity: FRAME_QUEUE_CAPACITY,
            network: NetworkConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Reject out-of-range values instead of silently defaulting them.
    pub fn validate(&self) -> Result<()> {
        if !OPUS_SAMPLE_RATES.contains(&self.sample_rate) {
            return Err(Error::Config(format!(
                "sample rate {} not one of {:?}",
                self.sample_rate, OPUS_SAMPLE_RATES
            )));
        }

        // frame_size / sample_rate must be 2.5, 5, 10, 20, 40 or 60 ms
        let scaled = self.frame_size * 400;
        let rate = self.sample_rate as usize;
        if self.frame_size == 0
            || scaled % rate != 0
            || !OPUS_FRAME_UNITS.contains(&(scaled / rate))
        {
            return Err(Error::Config(format!(
                "frame size {} is not a valid Opus frame at {} Hz",
                self.frame_size, self.sample_rate
            )));
        }

        if !(500..=512_000).contains(&self.bitrate) {
            return Err(Error::Config(format!(
                "bitrate {} outside 500..=512000",
                self.bitrate
            )));
        }

        if self.complexity > 10 {
            return Err(Error::Config(format!(
                "complexity {} outside 0..=10",
                self.complexity
            )));
        }

        if self.queue_capacity == 0 {
            return Err(Error::Config("queue capacity must be non-zero".into()));
        }

        Ok(())
    }

    /// Interleaved stereo samples in one frame
    pub fn frame_len(&self) -> usize {
        self.frame_size * CHANNELS as usize
    }

    /// Wall-clock duration of one frame
    pub fn frame_duration(&self) -> Duration {
        Duration::from_micros(self.frame_size as u64 * 1_000_000 / self.sample_rate as u64)
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub session: SessionConfig,
    /// `tracing` filter directive used when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            log_filter: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Default location: `<config dir>/hello-caster/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "hello-caster")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Parse a TOML document
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load from `path`, falling back to defaults when the file is missing
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }
}
