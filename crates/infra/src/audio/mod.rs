//! Audio I/O around the signal chain
//!
//! - `lockfree_buffer`: SPSC hand-off between capture and render callbacks
//! - `engine`: per-buffer processing and the stream control surface
//! - `diagnostics`: level/waveform side channel and stream counters
//! - `stream`: CPAL binding to the default devices

pub mod diagnostics;
pub mod engine;
pub mod lockfree_buffer;
pub mod stream;

pub use diagnostics::{
    diagnostics_channel, DiagnosticEvent, DiagnosticsObserver, DiagnosticsPublisher, StreamCounters,
    StreamStats, WaveformSnapshot,
};
pub use engine::{
    adapt_channels, AudioBackend, AudioEngine, AudioProcessor, ProcessorLayout, StreamHandle,
};
pub use lockfree_buffer::{RingBuffer, RingConsumer, RingProducer};
pub use stream::{CpalBackend, CpalStreamHandle};
