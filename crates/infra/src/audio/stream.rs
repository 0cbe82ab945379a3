//! CPAL host binding
//!
//! Opens the default capture and render devices as two independent streams.
//! Capture callbacks push whole buffers into a [`RingBuffer`] (dropping the
//! buffer on overrun); render callbacks pull whole buffers back out (or
//! render silence on underrun) and run them through the [`AudioProcessor`].
//!
//! Platform APIs behind CPAL:
//! - Windows: WASAPI
//! - Linux: ALSA/PulseAudio
//! - macOS: CoreAudio

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig as CpalStreamConfig};
use std::sync::{Arc, Mutex};
use tracing::{error, info};
use triode_core::domain::audio::{AudioError, ChannelCount, Result, StreamConfig};

use super::diagnostics::{StreamCounters, StreamStats};
use super::engine::{adapt_channels, AudioBackend, AudioProcessor, ProcessorLayout, StreamHandle};
use super::lockfree_buffer::RingBuffer;

/// Default-device backend on the platform's default CPAL host
#[derive(Debug, Default)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &str {
        "cpal"
    }

    fn start(
        &self,
        config: &StreamConfig,
        ring_frames: usize,
        processor: Arc<Mutex<AudioProcessor>>,
    ) -> Result<Box<dyn StreamHandle>> {
        let host = cpal::default_host();
        let input_device = host
            .default_input_device()
            .ok_or_else(|| AudioError::DeviceNotFound("default input device".to_string()))?;
        let output_device = host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceNotFound("default output device".to_string()))?;

        #[allow(deprecated)]
        let input_name = input_device.name().unwrap_or_else(|_| "unknown".to_string());
        #[allow(deprecated)]
        let output_name = output_device.name().unwrap_or_else(|_| "unknown".to_string());

        // Capture at most stereo; the processor adapts to the render layout
        let device_channels = input_device
            .default_input_config()
            .map_err(|e| AudioError::UnsupportedConfiguration(e.to_string()))?
            .channels();
        let in_channels = ChannelCount::clamped(device_channels).count();
        let out_channels = config.channels.count();
        let max_frames = config.buffer_size as usize;

        info!(
            input = %input_name,
            output = %output_name,
            in_channels,
            out_channels,
            sample_rate = config.sample_rate.hz(),
            buffer_size = config.buffer_size,
            "Opening default devices"
        );

        {
            let mut guard = processor
                .lock()
                .map_err(|_| AudioError::StreamError("Processor lock poisoned".to_string()))?;
            let layout = ProcessorLayout {
                input_channels: usize::from(in_channels),
                output_channels: usize::from(out_channels),
                ..guard.layout()
            };
            guard.set_layout(layout);
        }

        let in_ch = usize::from(in_channels);
        let out_ch = usize::from(out_channels);
        let (mut producer, mut consumer) =
            RingBuffer::with_frames(ring_frames.max(max_frames * 2), in_ch).split();

        // One buffer of silence absorbs start-up jitter between the two streams
        let silence = vec![0.0f32; max_frames * in_ch];
        producer.write(&silence, max_frames, in_ch);

        let counters = StreamCounters::new();

        let input_config = CpalStreamConfig {
            channels: in_channels,
            sample_rate: config.sample_rate.hz(),
            buffer_size: cpal::BufferSize::Fixed(config.buffer_size),
        };
        let output_config = CpalStreamConfig {
            channels: out_channels,
            sample_rate: config.sample_rate.hz(),
            buffer_size: cpal::BufferSize::Fixed(config.buffer_size),
        };

        let input_counters = Arc::clone(&counters);
        let input = input_device
            .build_input_stream(
                &input_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let frames = data.len() / in_ch;
                    if !producer.write(data, frames, in_ch) {
                        input_counters.overrun();
                    }
                },
                |err| error!("Input stream error: {}", err),
                None,
            )
            .map_err(|e| AudioError::StreamError(format!("Failed to build input stream: {}", e)))?;

        let output_counters = Arc::clone(&counters);
        let block_frames = max_frames.max(1);
        let mut scratch = vec![0.0f32; block_frames * in_ch];
        let output = output_device
            .build_output_stream(
                &output_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    output_counters.callback();

                    for block in data.chunks_mut(block_frames * out_ch) {
                        let frames = block.len() / out_ch;
                        let captured = &mut scratch[..frames * in_ch];
                        let input = if consumer.read(captured, frames, in_ch) {
                            Some(&*captured)
                        } else {
                            output_counters.underrun();
                            None
                        };

                        match processor.try_lock() {
                            Ok(mut processor) => processor.process(input, block, frames),
                            Err(_) => {
                                output_counters.busy();
                                match input {
                                    Some(input) => adapt_channels(input, in_ch, block, out_ch, frames),
                                    None => block.fill(0.0),
                                }
                            }
                        }
                    }
                },
                |err| error!("Output stream error: {}", err),
                None,
            )
            .map_err(|e| AudioError::StreamError(format!("Failed to build output stream: {}", e)))?;

        input
            .play()
            .map_err(|e| AudioError::StreamError(format!("Failed to start input stream: {}", e)))?;
        output
            .play()
            .map_err(|e| AudioError::StreamError(format!("Failed to start output stream: {}", e)))?;

        Ok(Box::new(CpalStreamHandle {
            input,
            output,
            counters,
        }))
    }
}

/// Live capture/render stream pair
pub struct CpalStreamHandle {
    input: Stream,
    output: Stream,
    counters: Arc<StreamCounters>,
}

impl StreamHandle for CpalStreamHandle {
    fn stop(self: Box<Self>) -> Result<()> {
        let pause_result = self
            .output
            .pause()
            .and_then(|_| self.input.pause())
            .map_err(|e| AudioError::StreamError(format!("Failed to pause stream: {}", e)));

        // Dropping the streams joins any in-flight callback
        let CpalStreamHandle { input, output, .. } = *self;
        drop(output);
        drop(input);

        pause_result
    }

    fn stats(&self) -> StreamStats {
        self.counters.snapshot()
    }
}
