//! Criterion benchmarks for the capture -> render ring buffer

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::thread;
use triode_benchmarks::{generate_white_noise, BUFFER_SIZES};
use triode_infra::audio::RingBuffer;

fn bench_write_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_write_read");

    for &frames in BUFFER_SIZES.iter() {
        let input = generate_white_noise(frames * 2, 5);
        let mut output = vec![0.0; frames * 2];
        let mut ring = RingBuffer::with_frames(frames * 4, 2);

        group.throughput(Throughput::Elements(frames as u64));
        group.bench_with_input(BenchmarkId::from_parameter(frames), &frames, |b, &frames| {
            b.iter(|| {
                ring.write(black_box(&input), frames, 2);
                ring.read(black_box(&mut output), frames, 2);
            });
        });
    }

    group.finish();
}

fn bench_cross_thread(c: &mut Criterion) {
    const FRAMES: usize = 256;
    const BLOCKS: usize = 64;

    let input = generate_white_noise(FRAMES * 2, 9);

    c.bench_function("ring_cross_thread_64_blocks", |b| {
        b.iter(|| {
            let (mut producer, mut consumer) = RingBuffer::with_frames(FRAMES * 8, 2).split();
            let data = input.clone();
            let writer = thread::spawn(move || {
                for _ in 0..BLOCKS {
                    while !producer.write(&data, FRAMES, 2) {
                        std::hint::spin_loop();
                    }
                }
            });

            let mut out = vec![0.0; FRAMES * 2];
            for _ in 0..BLOCKS {
                while !consumer.read(&mut out, FRAMES, 2) {
                    std::hint::spin_loop();
                }
            }
            writer.join().ok();
            black_box(out);
        });
    });
}

criterion_group!(benches, bench_write_read, bench_cross_thread);
criterion_main!(benches);
