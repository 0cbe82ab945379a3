//! Real-time plumbing for Triode
//!
//! Ring-buffer hand-off, callback orchestration, diagnostics and the CPAL
//! host binding. DSP itself lives in `triode-core`.

pub mod audio;
