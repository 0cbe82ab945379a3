//! Digital Signal Processing for the tube coloration path
//!
//! This module provides:
//! - Cascaded biquad filter banks (Direct Form II Transposed)
//! - The tube stage: a fixed waveshaper plus a 6th-order IIR per sample rate
//! - The signal chain that the real-time callback drives
//!
//! All processing is designed for:
//! - Zero allocations in the hot path
//! - Double precision filter state, single precision at stage boundaries
//! - Deterministic output given identical initial state

pub mod biquad;
pub mod chain;
pub mod tube;

pub use biquad::BiquadCascade;
pub use chain::{BypassHandle, SignalChain};
pub use tube::TubeStage;

/// Parameter constraints for the signal chain
pub mod params {
    /// Output trim range in dB
    pub const OUTPUT_GAIN_DB_MIN: f32 = -24.0;
    pub const OUTPUT_GAIN_DB_MAX: f32 = 12.0;

    /// Stereo buffers up to this many frames are split on the stack
    pub const STACK_FRAMES: usize = 1024;
}

/// A stage that runs on de-interleaved channel buffers
///
/// Implementations keep independent state for left and right; mono input
/// uses the left state.
pub trait ChannelProcessor: Send {
    /// Process a stereo pair in place, up to the shorter of the two lengths
    fn process(&mut self, left: &mut [f32], right: &mut [f32]);

    /// Process a single channel in place
    fn process_mono(&mut self, buffer: &mut [f32]);

    /// Clear all filter memory, keeping coefficients
    fn reset(&mut self);

    /// Stage name for logging
    fn name(&self) -> &str;
}

/// Convert decibels to a linear gain factor
#[inline]
pub fn db_to_gain(db: f64) -> f64 {
    10.0_f64.powf(db / 20.0)
}
