//! Audio capture from input or loopback devices
//!
//! The driver invokes [`CaptureSource::on_input`] on its own real-time
//! thread. That path must never block or panic: it normalizes whatever the
//! driver delivered to stereo i16, cuts it into fixed-length [`AudioFrame`]s
//! and pushes them into the drop-oldest
//! [`FrameQueue`](crate::audio::buffer::FrameQueue).

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam_channel::{bounded, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::buffer::{AudioFrame, FramePool, SharedFrameQueue};
use crate::audio::device::{resolve_device, DeviceSelection};
use crate::config::SessionConfig;
use crate::error::AudioError;

/// A sample type the driver may deliver
pub trait CaptureSample: Copy + Send + 'static {
    fn to_i16(self) -> i16;
}

impl CaptureSample for i16 {
    #[inline]
    fn to_i16(self) -> i16 {
        self
    }
}

impl CaptureSample for f32 {
    /// Scale by `i16::MAX` and truncate; out-of-range input saturates.
    #[inline]
    fn to_i16(self) -> i16 {
        (self * i16::MAX as f32) as i16
    }
}

#[inline]
fn stereo_pair<S: CaptureSample>(group: &[S]) -> (i16, i16) {
    let left = group[0].to_i16();
    let right = if group.len() == 1 { left } else { group[1].to_i16() };
    (left, right)
}

/// Write `data` (interleaved, `channels` wide) into `out` as stereo i16.
///
/// Mono is duplicated to both channels; anything wider keeps the first two.
/// A trailing partial sample group is ignored.
pub fn normalize_into<S: CaptureSample>(data: &[S], channels: usize, out: &mut Vec<i16>) {
    out.clear();
    if channels == 0 {
        return;
    }

    for group in data.chunks_exact(channels) {
        let (left, right) = stereo_pair(group);
        out.push(left);
        out.push(right);
    }
}

/// Driver callback adapter feeding the frame queue.
///
/// Drivers do not always honour the requested buffer size, so samples are
/// accumulated in a pooled buffer and a frame is pushed each time it holds
/// exactly `pool.frame_len()` samples. Leftovers carry over to the next
/// callback.
pub struct CaptureSource {
    queue: SharedFrameQueue,
    pool: Arc<FramePool>,
    pending: Vec<i16>,
    frame_len: usize,
    sequence: u32,
    callbacks: u64,
}

impl CaptureSource {
    pub fn new(queue: SharedFrameQueue, pool: Arc<FramePool>) -> Self {
        let pending = pool.take();
        let frame_len = pool.frame_len();
        Self {
            queue,
            pool,
            pending,
            frame_len,
            sequence: 0,
            callbacks: 0,
        }
    }

    /// Handle one driver callback, pushing every frame it completes
    pub fn on_input<S: CaptureSample>(&mut self, data: &[S], channels: u16) {
        if channels == 0 || self.frame_len == 0 {
            return;
        }
        self.callbacks += 1;

        for group in data.chunks_exact(channels as usize) {
            let (left, right) = stereo_pair(group);
            self.pending.push(left);
            self.pending.push(right);

            if self.pending.len() >= self.frame_len {
                let samples = std::mem::replace(&mut self.pending, self.pool.take());
                self.queue.push(AudioFrame::new(samples, self.sequence));
                self.sequence = self.sequence.wrapping_add(1);
            }
        }
    }

    /// Frames pushed so far
    pub fn frames_captured(&self) -> u32 {
        self.sequence
    }

    /// Driver callbacks handled so far
    pub fn callbacks(&self) -> u64 {
        self.callbacks
    }

    /// Samples waiting for the next frame to fill up
    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        self.pool.recycle(std::mem::take(&mut self.pending));
    }
}

/// A running capture stream
pub trait CaptureStream: Send {
    /// Stop delivering callbacks and release the device
    fn stop(&mut self);
}

/// Something that can open a capture stream feeding a [`CaptureSource`]
pub trait CaptureBackend: Send {
    /// Open the configured device and start delivering callbacks.
    ///
    /// Fails synchronously if the device, sample rate or format is unusable.
    fn open(
        &self,
        config: &SessionConfig,
        source: CaptureSource,
    ) -> Result<Box<dyn CaptureStream>, AudioError>;
}

/// Capture through cpal
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl CaptureBackend for CpalBackend {
    fn open(
        &self,
        config: &SessionConfig,
        source: CaptureSource,
    ) -> Result<Box<dyn CaptureStream>, AudioError> {
        let capture = CpalCapture::start(
            config.device.clone(),
            config.sample_rate,
            config.frame_size,
            source,
        )?;
        Ok(Box::new(capture))
    }
}

/// cpal stream kept alive on a dedicated thread.
///
/// `cpal::Stream` is not `Send` on every host, so it is built, played and
/// dropped on the same thread, which otherwise just parks until stop.
pub struct CpalCapture {
    device_name: String,
    stop_tx: Option<Sender<()>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl CpalCapture {
    /// Build and start the stream, returning once it is playing
    pub fn start(
        selection: DeviceSelection,
        sample_rate: u32,
        frame_size: usize,
        source: CaptureSource,
    ) -> Result<Self, AudioError> {
        let (ready_tx, ready_rx) = bounded::<Result<String, AudioError>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("hello-capture".to_string())
            .spawn(move || {
                match open_stream(&selection, sample_rate, frame_size, source) {
                    Ok((stream, name)) => {
                        let _ = ready_tx.send(Ok(name));
                        // Returns on stop() or when the handle is dropped
                        let _ = stop_rx.recv();
                        drop(stream);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(device_name)) => {
                tracing::info!(
                    "Capture started on '{}' at {} Hz, {} samples/callback requested",
                    device_name,
                    sample_rate,
                    frame_size
                );
                Ok(Self {
                    device_name,
                    stop_tx: Some(stop_tx),
                    thread_handle: Some(handle),
                })
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(AudioError::StreamError(
                    "capture thread exited before the stream started".to_string(),
                ))
            }
        }
    }

    /// Name of the device being captured
    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

impl CaptureStream for CpalCapture {
    fn stop(&mut self) {
        // Dropping the sender wakes the holder thread
        self.stop_tx.take();

        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                tracing::warn!("Capture thread for '{}' panicked", self.device_name);
            } else {
                tracing::info!("Capture stopped on '{}'", self.device_name);
            }
        }
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_stream(
    selection: &DeviceSelection,
    sample_rate: u32,
    frame_size: usize,
    source: CaptureSource,
) -> Result<(cpal::Stream, String), AudioError> {
    let device = resolve_device(selection)?;
    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    // Loopback capture opens the playback device with its output format
    let supported = if selection.is_loopback() {
        device.default_output_config()
    } else {
        device.default_input_config()
    }
    .map_err(|e| AudioError::CpalError(e.to_string()))?;

    let config = StreamConfig {
        channels: supported.channels(),
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Fixed(frame_size as u32),
    };

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, source)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, source)?,
        other => {
            return Err(AudioError::UnsupportedFormat(format!(
                "{} delivers {:?} samples",
                name, other
            )))
        }
    };

    stream
        .play()
        .map_err(|e| AudioError::StreamError(e.to_string()))?;

    Ok((stream, name))
}

fn build_stream<S>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut source: CaptureSource,
) -> Result<cpal::Stream, AudioError>
where
    S: CaptureSample + cpal::SizedSample,
{
    let channels = config.channels;
    device
        .build_input_stream(
            config,
            move |data: &[S], _: &cpal::InputCallbackInfo| {
                source.on_input(data, channels);
            },
            |err| {
                tracing::warn!("Capture stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::FrameQueue;
    use proptest::prelude::*;

    fn source(capacity: usize, frame_len: usize) -> (CaptureSource, SharedFrameQueue) {
        let pool = Arc::new(FramePool::new(capacity + 2, frame_len));
        let queue = Arc::new(FrameQueue::with_pool(capacity, pool.clone()));
        (CaptureSource::new(queue.clone(), pool), queue)
    }

    #[test]
    fn test_float_conversion_truncates_and_saturates() {
        assert_eq!(0.0f32.to_i16(), 0);
        assert_eq!(1.0f32.to_i16(), i16::MAX);
        assert_eq!((-1.0f32).to_i16(), -i16::MAX);
        // 0.5 * 32767 = 16383.5, truncated
        assert_eq!(0.5f32.to_i16(), 16383);
        assert_eq!((-0.5f32).to_i16(), -16383);
        assert_eq!(2.0f32.to_i16(), i16::MAX);
        assert_eq!((-2.0f32).to_i16(), i16::MIN);
    }

    #[test]
    fn test_mono_240_becomes_480_interleaved() {
        let mono: Vec<i16> = (0..240).map(|i| (i * 100 - 12000) as i16).collect();
        let mut out = Vec::new();
        normalize_into(&mono, 1, &mut out);

        assert_eq!(out.len(), 480);
        for (i, pair) in out.chunks_exact(2).enumerate() {
            assert_eq!(pair[0], pair[1]);
            assert_eq!(pair[0], mono[i]);
        }
    }

    #[test]
    fn test_wide_input_keeps_first_two_channels() {
        // 4 channels, 3 sample groups
        let data: Vec<i16> = vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];
        let mut out = Vec::new();
        normalize_into(&data, 4, &mut out);
        assert_eq!(out, vec![1, 2, 5, 6, 9, 10]);
    }

    #[test]
    fn test_partial_trailing_group_ignored() {
        let data = [0.25f32, -0.25, 0.5];
        let mut out = Vec::new();
        normalize_into(&data, 2, &mut out);
        assert_eq!(out, vec![8191, -8191]);
    }

    #[test]
    fn test_matching_callbacks_give_one_frame_each() {
        let (mut source, queue) = source(8, 480);

        source.on_input(&[0.1f32; 480], 2);
        source.on_input(&[7i16; 240], 1);

        assert_eq!(queue.len(), 2);
        assert_eq!(source.frames_captured(), 2);
        assert_eq!(source.pending_samples(), 0);

        let first = queue.try_pop().unwrap();
        assert_eq!(first.sequence(), 0);
        assert_eq!(first.len(), 480);

        let second = queue.try_pop().unwrap();
        assert_eq!(second.sequence(), 1);
        assert!(second.samples().iter().all(|&s| s == 7));
        assert_eq!(second.samples_per_channel(), 240);
    }

    #[test]
    fn test_uneven_callbacks_are_reframed() {
        let (mut source, queue) = source(8, 480);

        // 360 stereo sample groups = 1.5 frames per callback
        let callback: Vec<i16> = (0..720).map(|i| i as i16).collect();
        source.on_input(&callback, 2);
        assert_eq!(queue.len(), 1);
        assert_eq!(source.pending_samples(), 240);

        source.on_input(&callback, 2);
        assert_eq!(queue.len(), 3);
        assert_eq!(source.pending_samples(), 0);
        assert_eq!(source.callbacks(), 2);

        let frames: Vec<AudioFrame> = std::iter::from_fn(|| queue.try_pop()).collect();
        assert!(frames.iter().all(|f| f.len() == 480));
        assert_eq!(
            frames.iter().map(|f| f.sequence()).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        // Second frame starts with the carried-over tail of the first callback
        assert_eq!(frames[1].samples()[0], 480);
        assert_eq!(frames[1].samples()[240], 0);
    }

    #[test]
    fn test_small_callbacks_accumulate() {
        let (mut source, queue) = source(4, 8);
        source.on_input(&[1i16], 1);
        source.on_input(&[2i16], 1);
        assert!(queue.is_empty());
        assert_eq!(source.pending_samples(), 4);

        source.on_input(&[3i16, 3, 3, 3, 4, 4], 2);
        let frame = queue.try_pop().unwrap();
        assert_eq!(frame.samples(), &[1, 1, 2, 2, 3, 3, 3, 3]);
        assert_eq!(source.pending_samples(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_degenerate_callbacks_push_nothing() {
        let (mut source, queue) = source(4, 4);
        source.on_input::<i16>(&[], 2);
        source.on_input(&[1i16, 2], 0);
        source.on_input(&[1i16], 2);
        assert!(queue.is_empty());
        assert_eq!(source.pending_samples(), 0);
    }

    #[test]
    fn test_overflow_keeps_newest_frames() {
        let (mut source, queue) = source(2, 4);
        for value in 0..5i16 {
            source.on_input(&[value; 4], 2);
        }
        assert_eq!(queue.dropped(), 3);
        assert_eq!(queue.try_pop().unwrap().samples()[0], 3);
        assert_eq!(queue.try_pop().unwrap().samples()[0], 4);
    }

    #[test]
    fn test_cpal_backend_rejects_unknown_device() {
        let (source, _queue) = source(2, 480);
        let config = SessionConfig {
            device: DeviceSelection::by_id("input:no-such-device-7f3a"),
            ..Default::default()
        };
        assert!(CpalBackend.open(&config, source).is_err());
    }

    proptest! {
        #[test]
        fn prop_mono_duplicates_to_stereo(samples in proptest::collection::vec(any::<i16>(), 0..512)) {
            let mut out = Vec::new();
            normalize_into(&samples, 1, &mut out);
            prop_assert_eq!(out.len(), samples.len() * 2);
            for (pair, &original) in out.chunks_exact(2).zip(samples.iter()) {
                prop_assert_eq!(pair[0], original);
                prop_assert_eq!(pair[1], original);
            }
        }

        #[test]
        fn prop_float_conversion_never_exceeds_range(sample in -4.0f32..4.0) {
            let converted = sample.to_i16() as i32;
            let expected = (sample * i16::MAX as f32).trunc();
            let clamped = expected.clamp(i16::MIN as f32, i16::MAX as f32) as i32;
            prop_assert_eq!(converted, clamped);
        }
    }
}
