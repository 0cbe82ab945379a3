//! Integration tests for the signal chain over the coefficient store
//!
//! These tests drive the full pre-filter -> tube -> post-filter path with
//! the built-in and externally loaded tables.

use proptest::prelude::*;
use triode_core::domain::audio::SUPPORTED_SAMPLE_RATES;
use triode_core::domain::coefficients::{CoefficientStore, TubeCoefficients};
use triode_core::domain::dsp::SignalChain;

fn constant_stereo(frames: usize, value: f32) -> Vec<f32> {
    vec![value; frames * 2]
}

fn impulse_stereo(frames: usize) -> Vec<f32> {
    let mut buffer = vec![0.0; frames * 2];
    buffer[0] = 1.0;
    buffer[1] = 1.0;
    buffer
}

fn noise(len: usize, seed: u32) -> Vec<f32> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 8) as f32 / (1u32 << 24) as f32 * 1.6 - 0.8
        })
        .collect()
}

fn to_bytes(values: &[f64]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

// ============================================================================
// DETERMINISM AND SILENCE
// ============================================================================

#[test]
fn test_half_scale_block_is_reproducible() {
    let store = CoefficientStore::new();

    let run = || {
        let mut chain = SignalChain::with_filter_banks(48000, &store);
        let mut buffer = constant_stereo(512, 0.5);
        chain.process(&mut buffer, 512, 2);
        buffer
    };

    let first = run();
    let second = run();

    let first_bits: Vec<u32> = first.iter().map(|s| s.to_bits()).collect();
    let second_bits: Vec<u32> = second.iter().map(|s| s.to_bits()).collect();
    assert_eq!(first_bits, second_bits);

    assert!(first.iter().all(|s| s.is_finite()));
    assert_ne!(first, constant_stereo(512, 0.5));
    for frame in first.chunks_exact(2) {
        assert_eq!(frame[0], frame[1]);
    }
}

#[test]
fn test_tube_only_block_is_reproducible() {
    let mut a = SignalChain::new(48000);
    let mut b = SignalChain::new(48000);
    let mut left = constant_stereo(512, 0.5);
    let mut right = constant_stereo(512, 0.5);
    a.process(&mut left, 512, 2);
    b.process(&mut right, 512, 2);
    assert_eq!(left, right);
}

#[test]
fn test_silence_at_every_rate() {
    let store = CoefficientStore::new();
    for rate in SUPPORTED_SAMPLE_RATES {
        let mut chain = SignalChain::with_filter_banks(rate, &store);
        for frames in [1, 64, 1024, 1025, 4096] {
            let mut stereo = vec![0.0; frames * 2];
            chain.process(&mut stereo, frames, 2);
            assert!(stereo.iter().all(|&s| s == 0.0), "rate {rate}, {frames} frames");

            let mut mono = vec![0.0; frames];
            chain.process(&mut mono, frames, 1);
            assert!(mono.iter().all(|&s| s == 0.0), "rate {rate}, {frames} mono frames");
        }
    }
}

// ============================================================================
// SAMPLE RATE HANDLING
// ============================================================================

#[test]
fn test_rate_switch_forgets_history() {
    let store = CoefficientStore::new();

    for rate in SUPPORTED_SAMPLE_RATES {
        let mut chain = SignalChain::with_filter_banks(44100, &store);
        let mut history = noise(2048, rate);
        chain.process(&mut history, 1024, 2);

        chain.set_sample_rate(rate);
        let mut response = impulse_stereo(512);
        chain.process(&mut response, 512, 2);

        let mut fresh = SignalChain::with_filter_banks(44100, &store);
        fresh.set_sample_rate(rate);
        let mut expected = impulse_stereo(512);
        fresh.process(&mut expected, 512, 2);

        assert_eq!(response, expected, "rate {rate}");
    }
}

#[test]
fn test_unsupported_rate_uses_nearest_tables() {
    let store = CoefficientStore::new();
    assert_eq!(store.pre_filter(192001), store.pre_filter(192000));
    assert_eq!(store.post_filter(192001), store.post_filter(192000));
    assert_eq!(TubeCoefficients::for_rate(192001), TubeCoefficients::for_rate(192000));
    assert_eq!(TubeCoefficients::resolved_rate(192001), 192000);

    let mut odd = SignalChain::with_filter_banks(192001, &store);
    let mut exact = SignalChain::with_filter_banks(192000, &store);
    let mut a = impulse_stereo(256);
    let mut b = impulse_stereo(256);
    odd.process(&mut a, 256, 2);
    exact.process(&mut b, 256, 2);
    assert_eq!(a, b);
}

// ============================================================================
// EXTERNAL COEFFICIENTS
// ============================================================================

#[test]
fn test_loaded_tables_reach_the_chain() {
    let stage = [0.5, 0.1, 0.0, -0.2, 0.1];
    let values: Vec<f64> = stage.iter().copied().cycle().take(30).collect();

    let mut store = CoefficientStore::new();
    assert!(store.load_from_bytes(&to_bytes(&values)));

    for rate in SUPPORTED_SAMPLE_RATES {
        let chain = SignalChain::with_filter_banks(rate, &store);
        assert_eq!(chain.pre_stage_count(), 3);
        assert_eq!(chain.post_stage_count(), 3);
    }
}

#[test]
fn test_refused_load_keeps_last_good_output() {
    let store = CoefficientStore::new();
    let mut refused = store.clone();
    let unstable: Vec<f64> = [1.0, 0.0, 0.0, 2.5, 0.0].iter().copied().cycle().take(40).collect();
    assert!(!refused.load_from_bytes(&to_bytes(&unstable)));
    assert!(!refused.load_from_bytes(&[0u8; 7]));
    assert_eq!(refused, store);

    let input = noise(1024, 7);
    let mut before = input.clone();
    let mut after = input;
    SignalChain::with_filter_banks(48000, &store).process(&mut before, 512, 2);
    SignalChain::with_filter_banks(48000, &refused).process(&mut after, 512, 2);
    assert_eq!(before, after);
}

#[test]
fn test_empty_store_leaves_tube_only() {
    let store = CoefficientStore::empty();
    let mut banked = SignalChain::with_filter_banks(48000, &store);
    let mut plain = SignalChain::new(48000);

    let mut a = noise(512, 3);
    let mut b = a.clone();
    banked.process(&mut a, 256, 2);
    plain.process(&mut b, 256, 2);
    assert_eq!(a, b);
}

// ============================================================================
// PROPERTIES
// ============================================================================

proptest! {
    #[test]
    fn prop_bypass_is_identity(
        samples in proptest::collection::vec(-4.0f32..4.0, 0..3000),
        channels in 1usize..=4,
        filter_banks in any::<bool>(),
    ) {
        let mut chain = if filter_banks {
            SignalChain::with_filter_banks(48000, &CoefficientStore::new())
        } else {
            SignalChain::new(48000)
        };
        chain.set_bypass(true);

        let mut buffer = samples.clone();
        let frames = buffer.len() / channels;
        chain.process(&mut buffer, frames, channels);
        prop_assert_eq!(buffer, samples);
    }

    #[test]
    fn prop_output_stays_finite(
        samples in proptest::collection::vec(-8.0f32..8.0, 2..2048),
    ) {
        let mut chain = SignalChain::with_filter_banks(96000, &CoefficientStore::new());
        let mut buffer = samples;
        let frames = buffer.len() / 2;
        chain.process(&mut buffer, frames, 2);
        prop_assert!(buffer.iter().all(|s| s.is_finite()));
    }
}
