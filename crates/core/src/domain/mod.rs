//! Domain entities and business rules

pub mod audio;
pub mod coefficients;
pub mod config;
pub mod dsp;
pub mod metering;

// Re-export specific items to avoid ambiguous glob imports
pub use audio::{AudioError, ChannelCount, SampleRate, StreamConfig, SUPPORTED_SAMPLE_RATES};
pub use coefficients::{
    BiquadCoefficients, CoefficientError, CoefficientStore, LoadReport, TubeCoefficients,
};
pub use config::*;
pub use dsp::*;
pub use metering::{channel_peak, channel_rms, mono_mixdown, ChannelLevel};
