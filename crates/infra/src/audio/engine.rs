//! Callback orchestration and the engine control surface
//!
//! [`AudioProcessor`] is what a host callback calls once per buffer: it
//! adapts channel layouts, runs the signal chain, meters the result and
//! publishes diagnostics. [`AudioEngine`] owns the processor on the control
//! side, starts and stops streams through an [`AudioBackend`], and refuses
//! configuration changes while a stream is live.

use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use triode_core::domain::audio::{AudioError, ChannelCount, Result, SampleRate, StreamConfig};
use triode_core::domain::coefficients::CoefficientStore;
use triode_core::domain::config::TriodeConfig;
use triode_core::domain::dsp::{BypassHandle, SignalChain};
use triode_core::domain::metering::{mono_mixdown, ChannelLevel};

use super::diagnostics::{diagnostics_channel, DiagnosticsObserver, DiagnosticsPublisher, StreamStats};

// ============================================================================
// Channel adaptation
// ============================================================================

/// Copy `frames` frames from `input` into `output`, converting layouts
///
/// Equal counts copy, mono to stereo duplicates, stereo to mono averages,
/// anything else copies the shared channels and zeroes the rest.
pub fn adapt_channels(
    input: &[f32],
    input_channels: usize,
    output: &mut [f32],
    output_channels: usize,
    frames: usize,
) {
    if input_channels == 0 || output_channels == 0 {
        return;
    }

    let frames = frames
        .min(input.len() / input_channels)
        .min(output.len() / output_channels);
    let input = &input[..frames * input_channels];
    let output = &mut output[..frames * output_channels];

    match (input_channels, output_channels) {
        (i, o) if i == o => output.copy_from_slice(input),
        (1, 2) => {
            for (frame, &sample) in output.chunks_exact_mut(2).zip(input) {
                frame[0] = sample;
                frame[1] = sample;
            }
        }
        (2, 1) => {
            for (out, frame) in output.iter_mut().zip(input.chunks_exact(2)) {
                *out = (frame[0] + frame[1]) * 0.5;
            }
        }
        (i, o) => {
            let common = i.min(o);
            for (out, frame) in output.chunks_exact_mut(o).zip(input.chunks_exact(i)) {
                out[..common].copy_from_slice(&frame[..common]);
                out[common..].fill(0.0);
            }
        }
    }
}

// ============================================================================
// Real-time processor
// ============================================================================

/// Per-stream layout and cadence for an [`AudioProcessor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorLayout {
    pub input_channels: usize,
    pub output_channels: usize,
    /// Largest buffer diagnostics are captured for without truncation
    pub max_frames: usize,
    pub level_interval: u32,
    pub waveform_interval: u32,
}

impl Default for ProcessorLayout {
    fn default() -> Self {
        Self {
            input_channels: 2,
            output_channels: 2,
            max_frames: 512,
            level_interval: 4,
            waveform_interval: 2,
        }
    }
}

/// Per-buffer work done on the audio thread
///
/// Nothing in [`process`](Self::process) allocates, locks for longer than a
/// `try_lock`, or logs.
pub struct AudioProcessor {
    chain: SignalChain,
    layout: ProcessorLayout,
    level_counter: u32,
    waveform_counter: u32,
    dry: Vec<f32>,
    wet: Vec<f32>,
    publisher: DiagnosticsPublisher,
}

impl AudioProcessor {
    pub fn new(mut chain: SignalChain, layout: ProcessorLayout, publisher: DiagnosticsPublisher) -> Self {
        chain.prepare(layout.max_frames);
        Self {
            chain,
            layout,
            level_counter: 0,
            waveform_counter: 0,
            dry: vec![0.0; layout.max_frames],
            wet: vec![0.0; layout.max_frames],
            publisher,
        }
    }

    pub fn chain(&self) -> &SignalChain {
        &self.chain
    }

    pub fn chain_mut(&mut self) -> &mut SignalChain {
        &mut self.chain
    }

    pub fn layout(&self) -> ProcessorLayout {
        self.layout
    }

    /// Change layout and resize capture buffers (control path only)
    pub fn set_layout(&mut self, layout: ProcessorLayout) {
        if layout.max_frames != self.layout.max_frames {
            self.dry.resize(layout.max_frames, 0.0);
            self.wet.resize(layout.max_frames, 0.0);
            self.chain.prepare(layout.max_frames);
        }
        self.layout = layout;
        self.reset_counters();
        debug!(?layout, "Processor layout updated");
    }

    pub fn reset_counters(&mut self) {
        self.level_counter = 0;
        self.waveform_counter = 0;
    }

    /// Clear filter memory and cadence counters
    pub fn reset(&mut self) {
        self.chain.reset();
        self.reset_counters();
    }

    /// Render one buffer
    ///
    /// `input` of `None` means the host delivered no capture data: the
    /// output is silenced and nothing is metered. Frames beyond what either
    /// buffer holds are ignored.
    pub fn process(&mut self, input: Option<&[f32]>, output: &mut [f32], frames: usize) {
        let in_ch = self.layout.input_channels;
        let out_ch = self.layout.output_channels;
        if out_ch == 0 {
            return;
        }

        let frames = frames.min(output.len() / out_ch);
        let input = match input {
            Some(input) if in_ch > 0 => input,
            _ => {
                output[..frames * out_ch].fill(0.0);
                return;
            }
        };

        let frames = frames.min(input.len() / in_ch);
        let output = &mut output[..frames * out_ch];
        adapt_channels(input, in_ch, output, out_ch, frames);

        let publish_waveform = self.waveform_counter + 1 >= self.layout.waveform_interval;
        let captured = if publish_waveform {
            mono_mixdown(output, out_ch, &mut self.dry)
        } else {
            0
        };

        self.chain.process(output, frames, out_ch);

        self.level_counter += 1;
        if self.level_counter >= self.layout.level_interval {
            self.level_counter = 0;
            let left = ChannelLevel::measure(output, 0, out_ch);
            let right = if out_ch >= 2 {
                ChannelLevel::measure(output, 1, out_ch)
            } else {
                left
            };
            self.publisher.publish_levels(left, right);
        }

        self.waveform_counter += 1;
        if self.waveform_counter >= self.layout.waveform_interval {
            self.waveform_counter = 0;
            let len = mono_mixdown(output, out_ch, &mut self.wet).min(captured);
            self.publisher.publish_waveform(&self.dry[..len], &self.wet[..len]);
        }
    }
}

// ============================================================================
// Backend seam
// ============================================================================

/// A running host stream
pub trait StreamHandle {
    /// Halt callback delivery; returns once no callback is in flight
    fn stop(self: Box<Self>) -> Result<()>;

    fn stats(&self) -> StreamStats;
}

/// Host audio API able to drive an [`AudioProcessor`]
pub trait AudioBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Open and start streams feeding `processor`
    ///
    /// The backend may adjust the processor layout (e.g. to the capture
    /// device's channel count) before the first callback.
    fn start(
        &self,
        config: &StreamConfig,
        ring_frames: usize,
        processor: Arc<Mutex<AudioProcessor>>,
    ) -> Result<Box<dyn StreamHandle>>;
}

// ============================================================================
// Control surface
// ============================================================================

/// Owns the signal chain on the control side and manages the stream
pub struct AudioEngine {
    backend: Arc<dyn AudioBackend>,
    processor: Arc<Mutex<AudioProcessor>>,
    observer: DiagnosticsObserver,
    bypass: BypassHandle,
    store: CoefficientStore,
    stream_config: StreamConfig,
    ring_frames: usize,
    filter_banks: bool,
    stream: Option<Box<dyn StreamHandle>>,
}

impl AudioEngine {
    pub fn new(backend: Arc<dyn AudioBackend>, config: &TriodeConfig, store: CoefficientStore) -> Self {
        let stream_config = config.audio.stream_config();
        let channels = usize::from(stream_config.channels.count());
        let max_frames = stream_config.buffer_size as usize;

        let mut chain = SignalChain::new(stream_config.sample_rate.hz());
        if config.dsp.filter_banks {
            chain.load_filter_banks(&store);
        }
        chain.set_output_gain_db(config.dsp.output_gain_db);
        chain.set_bypass(config.dsp.bypass);
        let bypass = chain.bypass_handle();

        let layout = ProcessorLayout {
            input_channels: channels,
            output_channels: channels,
            max_frames,
            level_interval: config.diagnostics.level_interval.max(1),
            waveform_interval: config.diagnostics.waveform_interval.max(1),
        };
        let (publisher, observer) = diagnostics_channel(max_frames);
        let processor = AudioProcessor::new(chain, layout, publisher);

        info!(
            backend = backend.name(),
            sample_rate = stream_config.sample_rate.hz(),
            buffer_size = stream_config.buffer_size,
            channels,
            filter_banks = config.dsp.filter_banks,
            "Audio engine created"
        );

        Self {
            backend,
            processor: Arc::new(Mutex::new(processor)),
            observer,
            bypass,
            store,
            stream_config,
            ring_frames: config.audio.ring_frames(),
            filter_banks: config.dsp.filter_banks,
            stream: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.stream.is_some()
    }

    pub fn stream_config(&self) -> StreamConfig {
        self.stream_config
    }

    /// One-way latency of a single host buffer in milliseconds
    pub fn latency_ms(&self) -> f64 {
        self.stream_config.buffer_latency_ms()
    }

    pub fn coefficients(&self) -> &CoefficientStore {
        &self.store
    }

    /// Handle for reading levels and waveforms
    pub fn observer(&self) -> DiagnosticsObserver {
        self.observer.clone()
    }

    pub fn stats(&self) -> Option<StreamStats> {
        self.stream.as_ref().map(|stream| stream.stats())
    }

    /// Safe at any time, including while streaming
    pub fn set_bypass(&self, bypass: bool) {
        self.bypass.set(bypass);
        info!(bypass, "Bypass toggled");
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypass.get()
    }

    pub fn bypass_handle(&self) -> BypassHandle {
        self.bypass.clone()
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) -> Result<()> {
        self.ensure_stopped("sample rate")?;
        if sample_rate == 0 {
            return Err(AudioError::InvalidConfiguration("sample rate must be non-zero".to_string()));
        }

        let store = &self.store;
        let filter_banks = self.filter_banks;
        self.with_processor(|processor| {
            let chain = processor.chain_mut();
            chain.set_sample_rate(sample_rate);
            if filter_banks {
                chain.load_filter_banks(store);
            }
        })?;

        self.stream_config.sample_rate = SampleRate::from_hz(sample_rate);
        info!(sample_rate, "Sample rate set");
        Ok(())
    }

    pub fn set_buffer_size(&mut self, frames: u32) -> Result<()> {
        self.ensure_stopped("buffer size")?;
        if frames == 0 {
            return Err(AudioError::InvalidConfiguration("buffer size must be non-zero".to_string()));
        }

        self.with_processor(|processor| {
            let layout = ProcessorLayout {
                max_frames: frames as usize,
                ..processor.layout()
            };
            processor.set_layout(layout);
        })?;

        // Keep the ring proportion when it was derived from the buffer size
        if self.ring_frames == self.stream_config.buffer_size as usize * 8 {
            self.ring_frames = frames as usize * 8;
        }
        self.stream_config.buffer_size = frames;
        info!(frames, latency_ms = self.latency_ms(), "Buffer size set");
        Ok(())
    }

    /// Set the render channel count, clamped to mono or stereo
    pub fn set_channels(&mut self, channels: u16) -> Result<()> {
        self.ensure_stopped("channel count")?;

        let count = ChannelCount::clamped(channels);
        if count.count() != channels {
            warn!(requested = channels, using = count.count(), "Channel count clamped");
        }

        let channels = usize::from(count.count());
        self.with_processor(|processor| {
            let layout = ProcessorLayout {
                input_channels: channels,
                output_channels: channels,
                ..processor.layout()
            };
            processor.set_layout(layout);
        })?;

        self.stream_config.channels = count;
        Ok(())
    }

    pub fn set_output_gain_db(&mut self, gain_db: f32) -> Result<()> {
        self.ensure_stopped("output gain")?;
        self.with_processor(|processor| processor.chain_mut().set_output_gain_db(gain_db))
    }

    /// Enable or disable the pre/post biquad banks
    pub fn set_filter_banks(&mut self, enabled: bool) -> Result<()> {
        self.ensure_stopped("filter banks")?;
        self.filter_banks = enabled;
        let store = &self.store;
        self.with_processor(|processor| {
            let chain = processor.chain_mut();
            if enabled {
                chain.load_filter_banks(store);
            } else {
                chain.clear_filter_banks();
            }
        })
    }

    /// Replace the coefficient store and reload the banks if they are active
    pub fn apply_coefficients(&mut self, store: CoefficientStore) -> Result<()> {
        self.ensure_stopped("coefficients")?;
        self.store = store;

        if self.filter_banks {
            let store = &self.store;
            self.with_processor(|processor| processor.chain_mut().load_filter_banks(store))?;
        }
        info!(loaded = self.store.is_loaded(), "Coefficients applied");
        Ok(())
    }

    /// Clear filter memory and diagnostic cadence
    pub fn reset(&mut self) -> Result<()> {
        self.ensure_stopped("filter state")?;
        self.with_processor(AudioProcessor::reset)
    }

    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(AudioError::StreamError("Stream already running".to_string()));
        }

        self.with_processor(AudioProcessor::reset)?;
        let handle = self
            .backend
            .start(&self.stream_config, self.ring_frames, Arc::clone(&self.processor))?;
        self.stream = Some(handle);

        info!(
            backend = self.backend.name(),
            latency_ms = self.latency_ms(),
            bypass = self.is_bypassed(),
            "Audio stream started"
        );
        Ok(())
    }

    /// Stop callback delivery, then clear state once no callback can run
    pub fn stop(&mut self) -> Result<()> {
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };

        let stats = stream.stats();
        stream.stop()?;
        self.with_processor(AudioProcessor::reset)?;

        info!(
            callbacks = stats.callbacks,
            overruns = stats.overruns,
            underruns = stats.underruns,
            busy = stats.busy,
            dropped_snapshots = self.observer.dropped(),
            "Audio stream stopped"
        );
        Ok(())
    }

    fn ensure_stopped(&self, what: &'static str) -> Result<()> {
        if self.is_running() {
            warn!(setting = what, "Rejected change while streaming");
            Err(AudioError::StreamRunning(what))
        } else {
            Ok(())
        }
    }

    fn with_processor<T>(&self, f: impl FnOnce(&mut AudioProcessor) -> T) -> Result<T> {
        let mut guard: MutexGuard<'_, AudioProcessor> = self
            .processor
            .lock()
            .map_err(|_| AudioError::StreamError("Processor lock poisoned".to_string()))?;
        Ok(f(&mut guard))
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "Failed to stop stream on shutdown");
        }
    }
}
