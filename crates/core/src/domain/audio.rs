//! Audio stream domain models
//!
//! Platform-agnostic descriptions of the stream the signal chain runs in.
//! Host bindings (cpal) live in the `infra` crate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur in the audio subsystem
#[derive(Debug, Error)]
pub enum AudioError {
    /// Requested audio device was not found
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Error in audio stream creation or processing
    #[error("Stream error: {0}")]
    StreamError(String),

    /// Invalid configuration for audio device or signal chain
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A real-time affecting setting was changed while the stream runs
    #[error("Cannot change {0} while the stream is running")]
    StreamRunning(&'static str),

    /// Device does not support the requested configuration
    #[error("Unsupported configuration: {0}")]
    UnsupportedConfiguration(String),
}

pub type Result<T> = std::result::Result<T, AudioError>;

/// Sample rates that ship with tuned coefficient sets
pub const SUPPORTED_SAMPLE_RATES: [u32; 6] = [44100, 48000, 88200, 96000, 176400, 192000];

/// Audio sample rate in Hz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleRate {
    Hz44100,
    Hz48000,
    Hz88200,
    Hz96000,
    Hz176400,
    Hz192000,
    Custom(u32),
}

impl SampleRate {
    pub fn hz(&self) -> u32 {
        match self {
            SampleRate::Hz44100 => 44100,
            SampleRate::Hz48000 => 48000,
            SampleRate::Hz88200 => 88200,
            SampleRate::Hz96000 => 96000,
            SampleRate::Hz176400 => 176400,
            SampleRate::Hz192000 => 192000,
            SampleRate::Custom(hz) => *hz,
        }
    }

    pub fn from_hz(hz: u32) -> Self {
        match hz {
            44100 => SampleRate::Hz44100,
            48000 => SampleRate::Hz48000,
            88200 => SampleRate::Hz88200,
            96000 => SampleRate::Hz96000,
            176400 => SampleRate::Hz176400,
            192000 => SampleRate::Hz192000,
            hz => SampleRate::Custom(hz),
        }
    }

    /// Whether a tuned coefficient set exists for this exact rate
    pub fn is_supported(&self) -> bool {
        !matches!(self, SampleRate::Custom(_))
    }
}

/// Number of audio channels the signal chain accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelCount {
    Mono,
    Stereo,
}

impl ChannelCount {
    pub fn count(&self) -> u16 {
        match self {
            ChannelCount::Mono => 1,
            ChannelCount::Stereo => 2,
        }
    }

    /// Clamp an arbitrary device channel count into the supported range
    pub fn clamped(channels: u16) -> Self {
        if channels <= 1 {
            ChannelCount::Mono
        } else {
            ChannelCount::Stereo
        }
    }
}

/// Configuration for an audio stream
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub sample_rate: SampleRate,
    pub channels: ChannelCount,
    /// Buffer size in frames per callback
    pub buffer_size: u32,
}

impl StreamConfig {
    /// One-way latency contributed by a single buffer, in milliseconds
    pub fn buffer_latency_ms(&self) -> f64 {
        self.buffer_size as f64 * 1000.0 / self.sample_rate.hz() as f64
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: SampleRate::Hz48000,
            channels: ChannelCount::Stereo,
            buffer_size: 512,
        }
    }
}
