//! Criterion benchmarks for the tube signal chain
//!
//! Measures:
//! - Tube-only chain throughput across buffer sizes
//! - Cost of the pre/post biquad banks
//! - Stack vs scratch vs chunked de-interleave paths
//! - Full callback orchestration with metering

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use triode_benchmarks::{generate_sine_wave, generate_white_noise, BUFFER_SIZES};
use triode_core::domain::coefficients::CoefficientStore;
use triode_core::domain::dsp::SignalChain;
use triode_infra::audio::{diagnostics_channel, AudioProcessor, ProcessorLayout};

fn bench_tube_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("tube_chain_stereo");

    for &frames in BUFFER_SIZES.iter() {
        let input = generate_sine_wave(440.0, 48000, frames, 2);
        let mut chain = SignalChain::new(48000);
        let mut buffer = input.clone();

        group.throughput(Throughput::Elements(frames as u64));
        group.bench_with_input(BenchmarkId::from_parameter(frames), &frames, |b, &frames| {
            b.iter(|| {
                buffer.copy_from_slice(&input);
                chain.process(black_box(&mut buffer), frames, 2);
            });
        });
    }

    group.finish();
}

fn bench_filter_banks(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter_banks");
    let store = CoefficientStore::new();
    let input = generate_white_noise(512 * 2, 11);

    for (label, banks) in [("tube_only", false), ("with_banks", true)] {
        let mut chain = if banks {
            SignalChain::with_filter_banks(48000, &store)
        } else {
            SignalChain::new(48000)
        };
        let mut buffer = input.clone();

        group.bench_function(label, |b| {
            b.iter(|| {
                buffer.copy_from_slice(&input);
                chain.process(black_box(&mut buffer), 512, 2);
            });
        });
    }

    group.finish();
}

fn bench_large_buffers(c: &mut Criterion) {
    let mut group = c.benchmark_group("large_buffer_paths");
    let frames = 4096;
    let input = generate_sine_wave(220.0, 48000, frames, 2);

    let mut chunked = SignalChain::new(48000);
    let mut prepared = SignalChain::new(48000);
    prepared.prepare(frames);
    let mut buffer = input.clone();

    group.bench_function("chunked", |b| {
        b.iter(|| {
            buffer.copy_from_slice(&input);
            chunked.process(black_box(&mut buffer), frames, 2);
        });
    });

    group.bench_function("scratch", |b| {
        b.iter(|| {
            buffer.copy_from_slice(&input);
            prepared.process(black_box(&mut buffer), frames, 2);
        });
    });

    group.finish();
}

fn bench_callback(c: &mut Criterion) {
    let (publisher, observer) = diagnostics_channel(512);
    let layout = ProcessorLayout {
        level_interval: 1,
        waveform_interval: 1,
        ..ProcessorLayout::default()
    };
    let mut processor = AudioProcessor::new(SignalChain::new(48000), layout, publisher);
    let input = generate_sine_wave(440.0, 48000, 512, 2);
    let mut output = vec![0.0; 1024];

    c.bench_function("callback_512_frames_full_diagnostics", |b| {
        b.iter(|| {
            processor.process(Some(black_box(&input)), &mut output, 512);
            while observer.try_recv().is_some() {}
        });
    });
}

criterion_group!(
    benches,
    bench_tube_chain,
    bench_filter_banks,
    bench_large_buffers,
    bench_callback
);
criterion_main!(benches);
