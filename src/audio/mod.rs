//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod device;

pub use buffer::{AudioFrame, FramePool, FrameQueue, SharedFrameQueue};
pub use capture::{CaptureBackend, CaptureSource, CaptureStream, CpalBackend};
pub use device::{resolve_device, DeviceSelection};
