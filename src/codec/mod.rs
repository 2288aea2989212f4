//! Opus codec wrapper
//!
//! The sender owns one [`OpusEncoder`]; [`OpusDecoder`] exists for the
//! companion receiver and for verifying packets in tests.

pub mod decoder;
pub mod encoder;

pub use decoder::OpusDecoder;
pub use encoder::{EncoderStats, OpusEncoder};
