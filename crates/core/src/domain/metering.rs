//! Cheap per-buffer statistics over interleaved audio
//!
//! All functions here are allocation-free and safe to call from the audio
//! callback.

/// RMS of one channel of an interleaved buffer
///
/// Returns 0.0 for an empty buffer or an out-of-range channel.
pub fn channel_rms(buffer: &[f32], channel: usize, channels: usize) -> f32 {
    if channels == 0 || channel >= channels {
        return 0.0;
    }

    let mut sum = 0.0f32;
    let mut count = 0usize;
    for frame in buffer.chunks_exact(channels) {
        let sample = frame[channel];
        sum += sample * sample;
        count += 1;
    }

    if count == 0 {
        0.0
    } else {
        (sum / count as f32).sqrt()
    }
}

/// Absolute peak of one channel of an interleaved buffer
pub fn channel_peak(buffer: &[f32], channel: usize, channels: usize) -> f32 {
    if channels == 0 || channel >= channels {
        return 0.0;
    }

    buffer
        .chunks_exact(channels)
        .map(|frame| frame[channel].abs())
        .fold(0.0f32, f32::max)
}

/// RMS and absolute peak of one channel over one buffer
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChannelLevel {
    pub rms: f32,
    pub peak: f32,
}

impl ChannelLevel {
    pub fn measure(buffer: &[f32], channel: usize, channels: usize) -> Self {
        Self {
            rms: channel_rms(buffer, channel, channels),
            peak: channel_peak(buffer, channel, channels),
        }
    }
}

/// Average the first two channels (or copy the only one) into `out`
///
/// Returns the number of frames written, bounded by `out.len()`.
pub fn mono_mixdown(buffer: &[f32], channels: usize, out: &mut [f32]) -> usize {
    if channels == 0 {
        return 0;
    }

    let mut written = 0;
    for (frame, slot) in buffer.chunks_exact(channels).zip(out.iter_mut()) {
        *slot = if channels >= 2 {
            (frame[0] + frame[1]) * 0.5
        } else {
            frame[0]
        };
        written += 1;
    }
    written
}
