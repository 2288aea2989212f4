//! Opus decoder wrapper
//!
//! Used by the companion receiver and by tests to check what goes on the wire.

use opus::{Channels, Decoder};

use crate::constants::CHANNELS;
use crate::error::CodecError;

/// 120 ms at 48 kHz stereo, the longest frame Opus can carry
const MAX_DECODED_SAMPLES: usize = 48000 * 2 * 120 / 1000;

/// Stereo Opus decoder
pub struct OpusDecoder {
    decoder: Decoder,
    sample_rate: u32,
    /// Decoding buffer (reused to avoid allocations)
    decode_buffer: Vec<i16>,
    frames_decoded: u64,
    frames_lost: u64,
}

impl OpusDecoder {
    pub fn new(sample_rate: u32) -> Result<Self, CodecError> {
        let decoder = Decoder::new(sample_rate, Channels::Stereo)
            .map_err(|e| CodecError::DecoderInit(e.to_string()))?;

        Ok(Self {
            decoder,
            sample_rate,
            decode_buffer: vec![0i16; MAX_DECODED_SAMPLES],
            frames_decoded: 0,
            frames_lost: 0,
        })
    }

    /// Decode one packet into interleaved stereo samples
    pub fn decode(&mut self, packet: &[u8]) -> Result<Vec<i16>, CodecError> {
        let per_channel = self
            .decoder
            .decode(packet, &mut self.decode_buffer, false)
            .map_err(|e| CodecError::DecodingFailed(e.to_string()))?;

        self.frames_decoded += 1;
        Ok(self.decode_buffer[..per_channel * CHANNELS as usize].to_vec())
    }

    /// Generate packet loss concealment for one missing packet
    pub fn decode_plc(&mut self) -> Result<Vec<i16>, CodecError> {
        let per_channel = self
            .decoder
            .decode(&[], &mut self.decode_buffer, false)
            .map_err(|e| CodecError::DecodingFailed(e.to_string()))?;

        self.frames_lost += 1;
        Ok(self.decode_buffer[..per_channel * CHANNELS as usize].to_vec())
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    pub fn frames_lost(&self) -> u64 {
        self.frames_lost
    }
}
