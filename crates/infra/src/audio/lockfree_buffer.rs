//! Lock-free ring buffer for real-time audio hand-off
//!
//! Single producer, single consumer, interleaved `f32` samples. Writes and
//! reads are all-or-nothing: a request that does not fit is refused and the
//! buffer is left untouched.
//!
//! Performance characteristics:
//! - Lock-free and wait-free for one producer and one consumer
//! - Cache-padded cursors so producer and consumer cores don't false-share
//! - No allocations in the hot path
//!
//! Capacity is exact (no power-of-two rounding). One slot stays empty to
//! tell full from empty, so `capacity - 1` samples are usable.

use crossbeam::utils::CachePadded;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Shared {
    storage: Box<[UnsafeCell<f32>]>,
    capacity: usize,

    /// Next slot to write; only the producer stores it
    write_pos: CachePadded<AtomicUsize>,

    /// Next slot to read; only the consumer stores it
    read_pos: CachePadded<AtomicUsize>,
}

// SAFETY: slots between read_pos and write_pos belong to the consumer, the
// rest to the producer. Each side only touches its own region and hands it
// over with a release store observed by an acquire load on the other side.
unsafe impl Sync for Shared {}
unsafe impl Send for Shared {}

impl Shared {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            storage: (0..capacity).map(|_| UnsafeCell::new(0.0)).collect(),
            capacity,
            write_pos: CachePadded::new(AtomicUsize::new(0)),
            read_pos: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    #[inline]
    fn readable(&self, write_pos: usize, read_pos: usize) -> usize {
        if write_pos >= read_pos {
            write_pos - read_pos
        } else {
            self.capacity - read_pos + write_pos
        }
    }

    #[inline]
    fn writable(&self, write_pos: usize, read_pos: usize) -> usize {
        self.capacity - self.readable(write_pos, read_pos) - 1
    }

    fn available_read(&self) -> usize {
        let write_pos = self.write_pos.load(Ordering::Acquire);
        let read_pos = self.read_pos.load(Ordering::Acquire);
        self.readable(write_pos, read_pos)
    }

    fn available_write(&self) -> usize {
        let write_pos = self.write_pos.load(Ordering::Acquire);
        let read_pos = self.read_pos.load(Ordering::Acquire);
        self.writable(write_pos, read_pos)
    }

    /// # Safety
    /// At most one thread may call `push` at a time.
    unsafe fn push(&self, samples: &[f32]) -> bool {
        let write_pos = self.write_pos.load(Ordering::Relaxed);
        let read_pos = self.read_pos.load(Ordering::Acquire);

        if samples.len() > self.writable(write_pos, read_pos) {
            return false;
        }

        let mut pos = write_pos;
        for &sample in samples {
            *self.storage[pos].get() = sample;
            pos += 1;
            if pos == self.capacity {
                pos = 0;
            }
        }

        self.write_pos.store(pos, Ordering::Release);
        true
    }

    /// # Safety
    /// At most one thread may call `pop` at a time.
    unsafe fn pop(&self, out: &mut [f32]) -> bool {
        let read_pos = self.read_pos.load(Ordering::Relaxed);
        let write_pos = self.write_pos.load(Ordering::Acquire);

        if out.len() > self.readable(write_pos, read_pos) {
            return false;
        }

        let mut pos = read_pos;
        for slot in out.iter_mut() {
            *slot = *self.storage[pos].get();
            pos += 1;
            if pos == self.capacity {
                pos = 0;
            }
        }

        self.read_pos.store(pos, Ordering::Release);
        true
    }
}

/// Fixed-capacity SPSC ring buffer of interleaved samples
///
/// Used directly when one owner both writes and reads, or [`split`] into a
/// producer and a consumer for two audio callbacks.
///
/// [`split`]: RingBuffer::split
pub struct RingBuffer {
    shared: Arc<Shared>,
}

impl RingBuffer {
    /// Create a buffer with `capacity` sample slots (`capacity - 1` usable)
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared::new(capacity)),
        }
    }

    /// Create a buffer holding `frames` whole frames of `channels` channels
    pub fn with_frames(frames: usize, channels: usize) -> Self {
        Self::new(frames * channels + 1)
    }

    /// Write `frames * channels` samples from `data`
    ///
    /// Returns false and writes nothing if there is not enough room, `data`
    /// is shorter than requested, or `frames * channels` overflows.
    pub fn write(&mut self, data: &[f32], frames: usize, channels: usize) -> bool {
        match sample_span(frames, channels).and_then(|n| data.get(..n)) {
            // SAFETY: `&mut self` on an unsplit buffer is the only accessor
            Some(samples) => unsafe { self.shared.push(samples) },
            None => false,
        }
    }

    /// Read `frames * channels` samples into `out`
    ///
    /// Returns false and consumes nothing if not enough data is buffered or
    /// `out` is too short.
    pub fn read(&mut self, out: &mut [f32], frames: usize, channels: usize) -> bool {
        match sample_span(frames, channels).and_then(|n| out.get_mut(..n)) {
            // SAFETY: `&mut self` on an unsplit buffer is the only accessor
            Some(samples) => unsafe { self.shared.pop(samples) },
            None => false,
        }
    }

    pub fn available_read(&self) -> usize {
        self.shared.available_read()
    }

    pub fn available_write(&self) -> usize {
        self.shared.available_write()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.available_read() == 0
    }

    /// Reset both cursors to zero
    pub fn clear(&mut self) {
        self.shared.write_pos.store(0, Ordering::Release);
        self.shared.read_pos.store(0, Ordering::Release);
    }

    /// Reallocate with a new capacity, discarding buffered data
    ///
    /// Allocates; only valid while no stream is using the buffer, which an
    /// unsplit buffer guarantees.
    pub fn resize(&mut self, capacity: usize) {
        self.shared = Arc::new(Shared::new(capacity));
    }

    /// Split into the write half and the read half
    pub fn split(self) -> (RingProducer, RingConsumer) {
        (
            RingProducer {
                shared: Arc::clone(&self.shared),
            },
            RingConsumer {
                shared: self.shared,
            },
        )
    }
}

/// Sample count of a request; `None` when it cannot be addressed
#[inline]
fn sample_span(frames: usize, channels: usize) -> Option<usize> {
    frames.checked_mul(channels)
}

/// Write half of a split [`RingBuffer`]
pub struct RingProducer {
    shared: Arc<Shared>,
}

impl RingProducer {
    /// See [`RingBuffer::write`]
    pub fn write(&mut self, data: &[f32], frames: usize, channels: usize) -> bool {
        match sample_span(frames, channels).and_then(|n| data.get(..n)) {
            // SAFETY: the producer is unique and not Clone
            Some(samples) => unsafe { self.shared.push(samples) },
            None => false,
        }
    }

    pub fn available_write(&self) -> usize {
        self.shared.available_write()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }
}

/// Read half of a split [`RingBuffer`]
pub struct RingConsumer {
    shared: Arc<Shared>,
}

impl RingConsumer {
    /// See [`RingBuffer::read`]
    pub fn read(&mut self, out: &mut [f32], frames: usize, channels: usize) -> bool {
        match sample_span(frames, channels).and_then(|n| out.get_mut(..n)) {
            // SAFETY: the consumer is unique and not Clone
            Some(samples) => unsafe { self.shared.pop(samples) },
            None => false,
        }
    }

    pub fn available_read(&self) -> usize {
        self.shared.available_read()
    }
}
