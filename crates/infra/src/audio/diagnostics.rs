//! Diagnostic side channel between the audio callback and observers
//!
//! The callback publishes two kinds of data:
//! - per-side RMS/peak levels, sent by value over a bounded channel
//! - dry/wet waveform snapshots, copied into a preallocated mutex-guarded
//!   slot, with a notification sent over the same channel
//!
//! The publisher never waits. A contended slot or a full channel drops the
//! update and bumps a counter instead.

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, TryLockError};
use tracing::warn;
use triode_core::domain::metering::ChannelLevel;

/// Queue depth between the callback and observers
const EVENT_QUEUE_DEPTH: usize = 64;

/// Notification delivered to observers
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DiagnosticEvent {
    /// Output RMS and peak per side; mono streams report the same level twice
    Levels { left: ChannelLevel, right: ChannelLevel },

    /// A new waveform snapshot is ready in the slot
    Waveform { sequence: u64 },
}

/// Pre- and post-processing mono mixdowns of one buffer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WaveformSnapshot {
    pub dry: Vec<f32>,
    pub wet: Vec<f32>,
    pub sequence: u64,
}

#[derive(Debug)]
struct SnapshotSlot {
    dry: Vec<f32>,
    wet: Vec<f32>,
    len: usize,
    sequence: u64,
}

/// Real-time side of the diagnostic channel
pub struct DiagnosticsPublisher {
    slot: Arc<Mutex<SnapshotSlot>>,
    events: Sender<DiagnosticEvent>,
    dropped: Arc<CachePadded<AtomicU64>>,
    sequence: u64,
    capacity: usize,
}

/// Non-real-time side of the diagnostic channel
#[derive(Clone)]
pub struct DiagnosticsObserver {
    slot: Arc<Mutex<SnapshotSlot>>,
    events: Receiver<DiagnosticEvent>,
    dropped: Arc<CachePadded<AtomicU64>>,
}

/// Create a connected publisher/observer pair
///
/// `max_frames` bounds the snapshot length; longer buffers are truncated.
pub fn diagnostics_channel(max_frames: usize) -> (DiagnosticsPublisher, DiagnosticsObserver) {
    let slot = Arc::new(Mutex::new(SnapshotSlot {
        dry: vec![0.0; max_frames],
        wet: vec![0.0; max_frames],
        len: 0,
        sequence: 0,
    }));
    let (tx, rx) = bounded(EVENT_QUEUE_DEPTH);
    let dropped = Arc::new(CachePadded::new(AtomicU64::new(0)));

    (
        DiagnosticsPublisher {
            slot: Arc::clone(&slot),
            events: tx,
            dropped: Arc::clone(&dropped),
            sequence: 0,
            capacity: max_frames,
        },
        DiagnosticsObserver {
            slot,
            events: rx,
            dropped,
        },
    )
}

impl DiagnosticsPublisher {
    /// Longest snapshot the slot can hold
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn publish_levels(&self, left: ChannelLevel, right: ChannelLevel) {
        self.send(DiagnosticEvent::Levels { left, right });
    }

    /// Copy `dry`/`wet` into the slot if it is free, then notify
    pub fn publish_waveform(&mut self, dry: &[f32], wet: &[f32]) {
        let len = dry.len().min(wet.len()).min(self.capacity);

        let mut slot = match self.slot.try_lock() {
            Ok(slot) => slot,
            Err(TryLockError::WouldBlock) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            // An observer panicked mid-copy; the data is plain floats
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };

        self.sequence += 1;
        slot.dry[..len].copy_from_slice(&dry[..len]);
        slot.wet[..len].copy_from_slice(&wet[..len]);
        slot.len = len;
        slot.sequence = self.sequence;
        drop(slot);

        self.send(DiagnosticEvent::Waveform {
            sequence: self.sequence,
        });
    }

    fn send(&self, event: DiagnosticEvent) {
        match self.events.try_send(event) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl DiagnosticsObserver {
    pub fn try_recv(&self) -> Option<DiagnosticEvent> {
        self.events.try_recv().ok()
    }

    /// Drain pending events, returning the most recent level pair
    pub fn latest_levels(&self) -> Option<(ChannelLevel, ChannelLevel)> {
        let mut latest = None;
        while let Ok(event) = self.events.try_recv() {
            if let DiagnosticEvent::Levels { left, right } = event {
                latest = Some((left, right));
            }
        }
        latest
    }

    /// Copy the current snapshot into `out`, reusing its allocations
    ///
    /// Returns false if nothing has been published yet.
    pub fn read_waveform(&self, out: &mut WaveformSnapshot) -> bool {
        let slot = match self.slot.lock() {
            Ok(slot) => slot,
            Err(poisoned) => {
                warn!("Diagnostics slot poisoned, recovering");
                poisoned.into_inner()
            }
        };

        if slot.sequence == 0 {
            return false;
        }

        out.dry.clear();
        out.dry.extend_from_slice(&slot.dry[..slot.len]);
        out.wet.clear();
        out.wet.extend_from_slice(&slot.wet[..slot.len]);
        out.sequence = slot.sequence;
        true
    }

    /// Updates lost to a busy slot or a full queue
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Plain copy of [`StreamCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub callbacks: u64,
    pub overruns: u64,
    pub underruns: u64,
    pub busy: u64,
}

/// Event counters bumped by host callbacks
#[derive(Debug, Default)]
pub struct StreamCounters {
    callbacks: CachePadded<AtomicU64>,
    overruns: CachePadded<AtomicU64>,
    underruns: CachePadded<AtomicU64>,
    busy: CachePadded<AtomicU64>,
}

impl StreamCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[inline]
    pub fn callback(&self) {
        self.callbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Capture buffer dropped because the hand-off was full
    #[inline]
    pub fn overrun(&self) {
        self.overruns.fetch_add(1, Ordering::Relaxed);
    }

    /// Render buffer filled with silence because no capture was ready
    #[inline]
    pub fn underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    /// Processor held by the control path, audio passed through dry
    #[inline]
    pub fn busy(&self) {
        self.busy.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StreamStats {
        StreamStats {
            callbacks: self.callbacks.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            busy: self.busy.load(Ordering::Relaxed),
        }
    }
}
