//! Bounded hand-off between the capture callback and the transmitter
//!
//! [`FrameQueue`] is a single-producer single-consumer queue that prefers
//! freshness over completeness: when full, the oldest frame is discarded.
//! [`FramePool`] recycles sample buffers so the capture callback does not
//! allocate in steady state.

use crossbeam::queue::ArrayQueue;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One frame of interleaved stereo i16 samples
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Vec<i16>,
    sequence: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sequence: u32) -> Self {
        Self { samples, sequence }
    }

    /// Interleaved samples (L, R, L, R, ...)
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Capture-order sequence number
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Total samples across both channels
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of samples per channel
    pub fn samples_per_channel(&self) -> usize {
        self.samples.len() / 2
    }

    /// Give the backing buffer back, e.g. to a [`FramePool`]
    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }
}

/// Pre-sized sample buffers shared by producer and consumer
pub struct FramePool {
    buffers: ArrayQueue<Vec<i16>>,
    frame_len: usize,
    misses: AtomicU64,
}

impl FramePool {
    /// Create a pool holding `slots` buffers of `frame_len` samples each
    pub fn new(slots: usize, frame_len: usize) -> Self {
        let buffers = ArrayQueue::new(slots.max(1));
        while buffers.push(Vec::with_capacity(frame_len)).is_ok() {}

        Self {
            buffers,
            frame_len,
            misses: AtomicU64::new(0),
        }
    }

    /// Take an empty buffer; allocates one frame's worth only if the pool ran dry
    pub fn take(&self) -> Vec<i16> {
        match self.buffers.pop() {
            Some(buf) => buf,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Vec::with_capacity(self.frame_len)
            }
        }
    }

    /// Return a buffer; excess buffers are simply dropped
    pub fn recycle(&self, mut buf: Vec<i16>) {
        buf.clear();
        if buf.capacity() >= self.frame_len {
            let _ = self.buffers.push(buf);
        }
    }

    /// Buffers currently available
    pub fn available(&self) -> usize {
        self.buffers.len()
    }

    /// Times `take` had to allocate
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }
}

/// Bounded drop-oldest frame queue
pub struct FrameQueue {
    queue: ArrayQueue<AudioFrame>,
    /// Guards the condvar only; frames themselves live in the lock-free queue
    signal: Mutex<()>,
    available: Condvar,
    pool: Option<Arc<FramePool>>,
    pushed: AtomicU64,
    dropped: AtomicU64,
}

impl FrameQueue {
    /// Create a new queue with the specified capacity (in frames)
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            signal: Mutex::new(()),
            available: Condvar::new(),
            pool: None,
            pushed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Create a queue that hands displaced frames back to `pool`
    pub fn with_pool(capacity: usize, pool: Arc<FramePool>) -> Self {
        Self {
            pool: Some(pool),
            ..Self::new(capacity)
        }
    }

    /// Push a frame, discarding the oldest queued frame when full.
    ///
    /// Never waits on the consumer: the only lock taken is held for the
    /// duration of a notify.
    pub fn push(&self, frame: AudioFrame) {
        self.pushed.fetch_add(1, Ordering::Relaxed);

        if let Some(displaced) = self.queue.force_push(frame) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            if let Some(pool) = &self.pool {
                pool.recycle(displaced.into_samples());
            }
        }

        let _guard = self.signal.lock();
        self.available.notify_one();
    }

    /// Pop a frame, waiting at most `timeout` for one to arrive
    pub fn pop(&self, timeout: Duration) -> Option<AudioFrame> {
        if let Some(frame) = self.queue.pop() {
            return Some(frame);
        }

        let deadline = Instant::now() + timeout;
        let mut guard = self.signal.lock();
        loop {
            // Re-check under the lock so a push between the first check and
            // the wait cannot be missed.
            if let Some(frame) = self.queue.pop() {
                return Some(frame);
            }
            if self.available.wait_until(&mut guard, deadline).timed_out() {
                return self.queue.pop();
            }
        }
    }

    /// Pop without waiting
    pub fn try_pop(&self) -> Option<AudioFrame> {
        self.queue.pop()
    }

    /// Discard every queued frame, returning how many were removed
    pub fn clear(&self) -> usize {
        let mut removed = 0;
        while let Some(frame) = self.queue.pop() {
            if let Some(pool) = &self.pool {
                pool.recycle(frame.into_samples());
            }
            removed += 1;
        }
        removed
    }

    /// Give a consumed frame's buffer back to the pool, if any
    pub fn recycle(&self, frame: AudioFrame) {
        if let Some(pool) = &self.pool {
            pool.recycle(frame.into_samples());
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Frames pushed since creation
    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    /// Frames discarded by the drop-oldest policy
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Thread-safe handle to a frame queue
pub type SharedFrameQueue = Arc<FrameQueue>;
