//! Integration tests for callback orchestration and the engine surface
//!
//! A manual backend stands in for the host: tests call its render method
//! the way a device callback would.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use triode_core::domain::audio::{AudioError, StreamConfig};
use triode_core::domain::coefficients::CoefficientStore;
use triode_core::domain::config::TriodeConfig;
use triode_core::domain::dsp::SignalChain;
use triode_infra::audio::{
    adapt_channels, diagnostics_channel, AudioBackend, AudioEngine, AudioProcessor, DiagnosticEvent,
    ProcessorLayout, RingBuffer, StreamCounters, StreamHandle, StreamStats, WaveformSnapshot,
};

// ============================================================================
// Manual backend
// ============================================================================

#[derive(Default)]
struct ManualState {
    processor: Option<Arc<Mutex<AudioProcessor>>>,
    config: Option<StreamConfig>,
    ring_frames: usize,
}

#[derive(Clone, Default)]
struct ManualBackend {
    state: Arc<Mutex<ManualState>>,
    counters: Arc<StreamCounters>,
    stopped: Arc<AtomicBool>,
}

impl ManualBackend {
    /// Act as one render callback
    fn render(&self, input: Option<&[f32]>, output: &mut [f32], frames: usize) {
        self.counters.callback();
        let processor = self
            .state
            .lock()
            .unwrap()
            .processor
            .clone()
            .expect("stream not started");

        match processor.try_lock() {
            Ok(mut processor) => processor.process(input, output, frames),
            Err(_) => {
                self.counters.busy();
                let layout = ProcessorLayout::default();
                match input {
                    Some(input) => adapt_channels(input, layout.input_channels, output, layout.output_channels, frames),
                    None => output.fill(0.0),
                }
            }
        };
    }

    fn processor(&self) -> Arc<Mutex<AudioProcessor>> {
        self.state.lock().unwrap().processor.clone().unwrap()
    }
}

struct ManualHandle {
    backend: ManualBackend,
}

impl StreamHandle for ManualHandle {
    fn stop(self: Box<Self>) -> triode_core::domain::audio::Result<()> {
        self.backend.state.lock().unwrap().processor = None;
        self.backend.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stats(&self) -> StreamStats {
        self.backend.counters.snapshot()
    }
}

impl AudioBackend for ManualBackend {
    fn name(&self) -> &str {
        "manual"
    }

    fn start(
        &self,
        config: &StreamConfig,
        ring_frames: usize,
        processor: Arc<Mutex<AudioProcessor>>,
    ) -> triode_core::domain::audio::Result<Box<dyn StreamHandle>> {
        let mut state = self.state.lock().unwrap();
        state.processor = Some(processor);
        state.config = Some(*config);
        state.ring_frames = ring_frames;
        self.stopped.store(false, Ordering::SeqCst);
        Ok(Box::new(ManualHandle {
            backend: self.clone(),
        }))
    }
}

fn sine_stereo(frames: usize, offset: usize) -> Vec<f32> {
    (0..frames)
        .flat_map(|i| {
            let s = ((i + offset) as f32 * 0.05).sin() * 0.4;
            [s, -s]
        })
        .collect()
}

// ============================================================================
// RING BUFFER HAND-OFF
// ============================================================================

#[test]
fn test_ring_handoff_matches_direct_processing() {
    const BLOCKS: usize = 32;
    const FRAMES: usize = 256;

    let make_processor = || {
        let (publisher, _observer) = diagnostics_channel(FRAMES);
        let layout = ProcessorLayout {
            max_frames: FRAMES,
            ..ProcessorLayout::default()
        };
        AudioProcessor::new(SignalChain::new(48000), layout, publisher)
    };

    let (mut producer, mut consumer) = RingBuffer::with_frames(FRAMES * 4, 2).split();
    let capture = thread::spawn(move || {
        for block in 0..BLOCKS {
            let data = sine_stereo(FRAMES, block * FRAMES);
            while !producer.write(&data, FRAMES, 2) {
                thread::yield_now();
            }
        }
    });

    let mut via_ring = make_processor();
    let mut ring_output = Vec::with_capacity(BLOCKS * FRAMES * 2);
    let mut captured = vec![0.0; FRAMES * 2];
    let mut rendered = vec![0.0; FRAMES * 2];
    for _ in 0..BLOCKS {
        while !consumer.read(&mut captured, FRAMES, 2) {
            thread::yield_now();
        }
        via_ring.process(Some(&captured), &mut rendered, FRAMES);
        ring_output.extend_from_slice(&rendered);
    }
    capture.join().unwrap();

    let mut direct = make_processor();
    let mut direct_output = Vec::with_capacity(BLOCKS * FRAMES * 2);
    for block in 0..BLOCKS {
        let input = sine_stereo(FRAMES, block * FRAMES);
        direct.process(Some(&input), &mut rendered, FRAMES);
        direct_output.extend_from_slice(&rendered);
    }

    assert_eq!(ring_output, direct_output);
}

// ============================================================================
// ENGINE LIFECYCLE
// ============================================================================

#[test]
fn test_engine_streams_and_publishes() {
    let backend = ManualBackend::default();
    let mut engine = AudioEngine::new(Arc::new(backend.clone()), &TriodeConfig::default(), CoefficientStore::new());
    let observer = engine.observer();

    engine.start().unwrap();
    {
        let state = backend.state.lock().unwrap();
        assert_eq!(state.config.unwrap().buffer_size, 512);
        assert_eq!(state.ring_frames, 4096);
    }

    let mut output = vec![0.0; 1024];
    for block in 0..8 {
        let input = sine_stereo(512, block * 512);
        backend.render(Some(&input), &mut output, 512);
    }

    let mut levels = Vec::new();
    let mut waveforms = 0;
    while let Some(event) = observer.try_recv() {
        match event {
            DiagnosticEvent::Levels { left, right } => levels.push((left, right)),
            DiagnosticEvent::Waveform { .. } => waveforms += 1,
        }
    }
    assert_eq!(levels.len(), 2);
    assert!(levels
        .iter()
        .all(|(l, r)| l.rms > 0.0 && r.rms > 0.0 && l.peak >= l.rms && r.peak >= r.rms));
    assert_eq!(waveforms, 4);

    let mut snapshot = WaveformSnapshot::default();
    assert!(observer.read_waveform(&mut snapshot));
    assert_eq!(snapshot.dry.len(), 512);
    assert_eq!(snapshot.sequence, 4);

    assert_eq!(engine.stats().unwrap().callbacks, 8);

    engine.stop().unwrap();
    assert!(backend.stopped.load(Ordering::SeqCst));
}

#[test]
fn test_bypass_takes_effect_next_buffer() {
    let backend = ManualBackend::default();
    let mut engine = AudioEngine::new(Arc::new(backend.clone()), &TriodeConfig::default(), CoefficientStore::new());
    engine.start().unwrap();

    let input = sine_stereo(512, 0);
    let mut output = vec![0.0; 1024];
    backend.render(Some(&input), &mut output, 512);
    assert_ne!(output, input);

    engine.set_bypass(true);
    backend.render(Some(&input), &mut output, 512);
    assert_eq!(output, input);

    engine.set_bypass(false);
    backend.render(Some(&input), &mut output, 512);
    assert_ne!(output, input);
}

#[test]
fn test_reconfiguration_requires_stopped_stream() {
    let backend = ManualBackend::default();
    let mut engine = AudioEngine::new(Arc::new(backend.clone()), &TriodeConfig::default(), CoefficientStore::new());
    engine.start().unwrap();

    let err = engine.set_sample_rate(96000).unwrap_err();
    assert!(matches!(err, AudioError::StreamRunning(_)));
    assert_eq!(err.to_string(), "Cannot change sample rate while the stream is running");

    let mut store = CoefficientStore::new();
    let values: Vec<f64> = [0.5, 0.1, 0.0, -0.2, 0.1].iter().copied().cycle().take(30).collect();
    let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    assert!(store.load_from_bytes(&bytes));
    assert!(engine.apply_coefficients(store.clone()).is_err());
    assert!(!engine.coefficients().is_loaded());

    // Two-phase restart
    engine.stop().unwrap();
    engine.set_filter_banks(true).unwrap();
    engine.apply_coefficients(store).unwrap();
    engine.set_sample_rate(96000).unwrap();
    engine.start().unwrap();

    let processor = backend.processor();
    let processor = processor.lock().unwrap();
    assert_eq!(processor.chain().sample_rate(), 96000);
    assert_eq!(processor.chain().pre_stage_count(), 3);
    assert_eq!(processor.chain().post_stage_count(), 3);
}

#[test]
fn test_busy_processor_passes_audio_through() {
    let backend = ManualBackend::default();
    let mut engine = AudioEngine::new(Arc::new(backend.clone()), &TriodeConfig::default(), CoefficientStore::new());
    engine.start().unwrap();

    let processor = backend.processor();
    let guard = processor.lock().unwrap();

    let input = sine_stereo(256, 0);
    let mut output = vec![0.0; 512];
    backend.render(Some(&input), &mut output, 256);
    assert_eq!(output, input);

    backend.render(None, &mut output, 256);
    assert!(output.iter().all(|&s| s == 0.0));
    drop(guard);

    let stats = engine.stats().unwrap();
    assert_eq!(stats.callbacks, 2);
    assert_eq!(stats.busy, 2);
}

#[test]
fn test_mono_config_reports_matching_levels() {
    let mut config = TriodeConfig::default();
    config.audio.channels = 1;
    config.dsp.filter_banks = true;
    config.diagnostics.level_interval = 1;

    let backend = ManualBackend::default();
    let mut engine = AudioEngine::new(Arc::new(backend.clone()), &config, CoefficientStore::new());
    let observer = engine.observer();
    engine.start().unwrap();

    {
        let processor = backend.processor();
        let processor = processor.lock().unwrap();
        assert_eq!(processor.layout().output_channels, 1);
        assert_eq!(processor.chain().pre_stage_count(), 2);
    }

    let input: Vec<f32> = (0..512).map(|i| (i as f32 * 0.03).sin() * 0.3).collect();
    let mut output = vec![0.0; 512];
    backend.render(Some(&input), &mut output, 512);

    let (left, right) = observer.latest_levels().unwrap();
    assert!(left.rms > 0.0);
    assert_eq!(left, right);
}

#[test]
fn test_stop_resets_filter_memory() {
    let backend = ManualBackend::default();
    let mut engine = AudioEngine::new(Arc::new(backend.clone()), &TriodeConfig::default(), CoefficientStore::new());

    let input = sine_stereo(512, 0);
    let mut first = vec![0.0; 1024];
    engine.start().unwrap();
    backend.render(Some(&input), &mut first, 512);
    engine.stop().unwrap();

    let mut second = vec![0.0; 1024];
    engine.start().unwrap();
    backend.render(Some(&input), &mut second, 512);
    engine.stop().unwrap();

    assert_eq!(first, second);
}
