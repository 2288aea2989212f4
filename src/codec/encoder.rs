//! Opus encoder wrapper
//!
//! One encoder per session, owned by the transmitter thread. Configured for
//! arbitrary program material: stereo, `Application::Audio`, music hint.

use bytes::Bytes;
use opus::{Application, Channels, Encoder};

use crate::audio::buffer::AudioFrame;
use crate::config::{SessionConfig, SignalHint};
use crate::constants::CHANNELS;
use crate::error::CodecError;

/// Largest packet libopus will produce for one frame
const MAX_OPUS_PACKET: usize = 4000;

/// Opus encoder wrapper with fixed settings
pub struct OpusEncoder {
    encoder: Encoder,
    sample_rate: u32,
    frame_size: usize,
    bitrate: u32,
    complexity: u8,
    signal: SignalHint,
    /// Encoding buffer (reused to avoid allocations)
    encode_buffer: Vec<u8>,
    frames_encoded: u64,
    bytes_produced: u64,
}

impl OpusEncoder {
    /// Create an encoder for the session's sample rate, frame size and bitrate
    pub fn new(config: &SessionConfig) -> Result<Self, CodecError> {
        let mut encoder = Encoder::new(config.sample_rate, Channels::Stereo, Application::Audio)
            .map_err(|e| CodecError::EncoderInit(e.to_string()))?;

        Self::configure_encoder(&mut encoder, config)?;

        tracing::debug!(
            "Opus encoder: {} Hz, {} samples/frame, {} bps, complexity {}, {:?} signal",
            config.sample_rate,
            config.frame_size,
            config.bitrate,
            config.complexity,
            config.signal
        );

        Ok(Self {
            encoder,
            sample_rate: config.sample_rate,
            frame_size: config.frame_size,
            bitrate: config.bitrate,
            complexity: config.complexity,
            signal: config.signal,
            encode_buffer: vec![0u8; MAX_OPUS_PACKET],
            frames_encoded: 0,
            bytes_produced: 0,
        })
    }

    fn configure_encoder(encoder: &mut Encoder, config: &SessionConfig) -> Result<(), CodecError> {
        encoder
            .set_bitrate(opus::Bitrate::Bits(config.bitrate as i32))
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set bitrate: {}", e)))?;

        // Complexity (0-10)
        encoder
            .set_complexity(config.complexity as i32)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set complexity: {}", e)))?;

        // Signal type
        let signal = match config.signal {
            SignalHint::Auto => opus::Signal::Auto,
            SignalHint::Voice => opus::Signal::Voice,
            SignalHint::Music => opus::Signal::Music,
        };
        encoder
            .set_signal(signal)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set signal type: {}", e)))?;

        Ok(())
    }

    /// Encode one frame into one packet.
    ///
    /// A rejected frame leaves the encoder usable for the next one.
    pub fn encode(&mut self, frame: &AudioFrame) -> Result<Bytes, CodecError> {
        let expected = self.samples_per_frame();
        if frame.len() != expected {
            return Err(CodecError::InvalidFrameSize {
                got: frame.len(),
                expected,
            });
        }

        let size = self
            .encoder
            .encode(frame.samples(), &mut self.encode_buffer)
            .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;

        self.frames_encoded += 1;
        self.bytes_produced += size as u64;

        Ok(Bytes::copy_from_slice(&self.encode_buffer[..size]))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Samples per channel in one frame
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Interleaved samples expected by [`encode`](Self::encode)
    pub fn samples_per_frame(&self) -> usize {
        self.frame_size * CHANNELS as usize
    }

    pub fn bitrate(&self) -> u32 {
        self.bitrate
    }

    pub fn complexity(&self) -> u8 {
        self.complexity
    }

    pub fn signal(&self) -> SignalHint {
        self.signal
    }

    /// Get statistics
    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded,
            bytes_produced: self.bytes_produced,
            average_frame_size: if self.frames_encoded > 0 {
                self.bytes_produced as f32 / self.frames_encoded as f32
            } else {
                0.0
            },
        }
    }
}

/// Encoder statistics
#[derive(Debug, Clone)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
    pub average_frame_size: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(frame_size: usize) -> SessionConfig {
        SessionConfig {
            sample_rate: 48000,
            frame_size,
            bitrate: 128_000,
            ..Default::default()
        }
    }

    fn sine_frame(frame_size: usize) -> AudioFrame {
        let samples = (0..frame_size)
            .flat_map(|i| {
                let t = i as f32 / 48000.0;
                let v = ((t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 8000.0) as i16;
                [v, v]
            })
            .collect();
        AudioFrame::new(samples, 0)
    }

    #[test]
    fn test_encoder_creation() {
        let encoder = OpusEncoder::new(&config(240)).unwrap();
        assert_eq!(encoder.sample_rate(), 48000);
        assert_eq!(encoder.samples_per_frame(), 480);
        assert_eq!(encoder.bitrate(), 128_000);
        assert_eq!(encoder.signal(), SignalHint::Music);
    }

    #[test]
    fn test_complexity_and_signal_reach_libopus() {
        let mut encoder = OpusEncoder::new(&config(480)).unwrap();
        assert_eq!(encoder.encoder.get_complexity().unwrap(), 10);
        assert!(matches!(encoder.encoder.get_signal().unwrap(), opus::Signal::Music));

        let voice = SessionConfig {
            complexity: 2,
            signal: SignalHint::Voice,
            ..config(480)
        };
        let mut encoder = OpusEncoder::new(&voice).unwrap();
        assert_eq!(encoder.encoder.get_complexity().unwrap(), 2);
        assert!(matches!(encoder.encoder.get_signal().unwrap(), opus::Signal::Voice));
    }

    #[test]
    fn test_unsupported_sample_rate_fails_init() {
        let bad = SessionConfig {
            sample_rate: 44100,
            ..config(441)
        };
        assert!(matches!(
            OpusEncoder::new(&bad),
            Err(CodecError::EncoderInit(_))
        ));
    }

    #[test]
    fn test_encoding() {
        let mut encoder = OpusEncoder::new(&config(480)).unwrap();
        let packet = encoder.encode(&sine_frame(480)).unwrap();

        assert!(!packet.is_empty());
        assert!(packet.len() < 960 * 2); // Should be compressed
        assert_eq!(encoder.stats().frames_encoded, 1);
    }

    #[test]
    fn test_wrong_length_rejected_then_recovers() {
        let mut encoder = OpusEncoder::new(&config(240)).unwrap();

        let short = AudioFrame::new(vec![0; 300], 0);
        assert!(matches!(
            encoder.encode(&short),
            Err(CodecError::InvalidFrameSize { got: 300, expected: 480 })
        ));

        assert!(encoder.encode(&sine_frame(240)).is_ok());
        assert_eq!(encoder.stats().frames_encoded, 1);
    }
}
