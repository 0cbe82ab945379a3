//! Signal chain driven by the real-time callback
//!
//! Order: pre-filter bank -> tube stage -> post-filter bank. The banks are
//! empty (pass-through) until coefficients are loaded into them, which
//! reproduces the tube-only path by default.
//!
//! Threading contract:
//! - `process` runs on the audio thread and never allocates or locks
//! - `set_bypass` / [`BypassHandle`] may be used from any thread at any time
//! - everything else needs `&mut self` and belongs to the control path while
//!   the stream is stopped

use super::{params::STACK_FRAMES, BiquadCascade, ChannelProcessor, TubeStage};
use crate::domain::coefficients::CoefficientStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Shared bypass switch, cloneable into control threads
#[derive(Debug, Clone, Default)]
pub struct BypassHandle(Arc<AtomicBool>);

impl BypassHandle {
    pub fn set(&self, bypass: bool) {
        self.0.store(bypass, Ordering::Relaxed);
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Tube coloration path for interleaved mono or stereo buffers
#[derive(Debug)]
pub struct SignalChain {
    bypass: BypassHandle,
    sample_rate: u32,
    pre: BiquadCascade,
    tube: TubeStage,
    post: BiquadCascade,
    /// Split buffers for stereo blocks larger than the stack threshold
    scratch_left: Vec<f32>,
    scratch_right: Vec<f32>,
}

impl SignalChain {
    /// Tube-only chain for `sample_rate`
    pub fn new(sample_rate: u32) -> Self {
        info!(sample_rate, "Signal chain initialized");
        Self {
            bypass: BypassHandle::default(),
            sample_rate,
            pre: BiquadCascade::new(),
            tube: TubeStage::new(sample_rate),
            post: BiquadCascade::new(),
            scratch_left: Vec::new(),
            scratch_right: Vec::new(),
        }
    }

    /// Chain with pre/post banks taken from `store` for `sample_rate`
    pub fn with_filter_banks(sample_rate: u32, store: &CoefficientStore) -> Self {
        let mut chain = Self::new(sample_rate);
        chain.load_filter_banks(store);
        chain
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Retune every stage for `sample_rate` and clear all filter memory
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        if sample_rate != self.sample_rate {
            info!(from = self.sample_rate, to = sample_rate, "Signal chain sample rate changed");
        }
        self.sample_rate = sample_rate;
        self.tube.set_sample_rate(sample_rate);
        self.reset();
    }

    /// Load pre/post banks for the current sample rate
    pub fn load_filter_banks(&mut self, store: &CoefficientStore) {
        self.pre.set_coefficients(store.pre_filter(self.sample_rate));
        self.post.set_coefficients(store.post_filter(self.sample_rate));
        self.tube.reset();
        debug!(
            pre = self.pre.stage_count(),
            post = self.post.stage_count(),
            "Filter banks loaded"
        );
    }

    /// Drop both banks, leaving the tube stage alone in the path
    pub fn clear_filter_banks(&mut self) {
        self.pre.set_coefficients(&[]);
        self.post.set_coefficients(&[]);
    }

    /// Stage names in processing order
    pub fn stage_names(&self) -> [&str; 3] {
        [self.pre.name(), self.tube.name(), self.post.name()]
    }

    pub fn pre_stage_count(&self) -> usize {
        self.pre.stage_count()
    }

    pub fn post_stage_count(&self) -> usize {
        self.post.stage_count()
    }

    pub fn set_output_gain_db(&mut self, gain_db: f32) {
        self.tube.set_output_gain_db(gain_db);
    }

    pub fn output_gain_db(&self) -> f32 {
        self.tube.output_gain_db()
    }

    /// Pre-size the split buffers so stereo blocks up to `max_frames` avoid
    /// chunking; blocks at or below the stack threshold never need them
    pub fn prepare(&mut self, max_frames: usize) {
        if max_frames > STACK_FRAMES {
            self.scratch_left.resize(max_frames, 0.0);
            self.scratch_right.resize(max_frames, 0.0);
        } else {
            self.scratch_left = Vec::new();
            self.scratch_right = Vec::new();
        }
    }

    pub fn set_bypass(&self, bypass: bool) {
        self.bypass.set(bypass);
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypass.get()
    }

    /// Handle for flipping bypass from another thread
    pub fn bypass_handle(&self) -> BypassHandle {
        self.bypass.clone()
    }

    /// Clear filter memory in every stage
    pub fn reset(&mut self) {
        self.pre.reset();
        self.tube.reset();
        self.post.reset();
    }

    /// Process `frames` interleaved frames of `channels` channels in place
    ///
    /// Bypassed chains and unsupported channel counts leave the buffer
    /// untouched. The frame count is bounded by the buffer length.
    pub fn process(&mut self, buffer: &mut [f32], frames: usize, channels: usize) {
        if self.bypass.get() {
            return;
        }

        match channels {
            1 => {
                let frames = frames.min(buffer.len());
                self.process_mono(&mut buffer[..frames]);
            }
            2 => {
                let frames = frames.min(buffer.len() / 2);
                self.process_interleaved(&mut buffer[..frames * 2]);
            }
            _ => {}
        }
    }

    fn process_mono(&mut self, buffer: &mut [f32]) {
        self.pre.process_mono(buffer);
        self.tube.process_mono(buffer);
        self.post.process_mono(buffer);
    }

    fn process_interleaved(&mut self, buffer: &mut [f32]) {
        let frames = buffer.len() / 2;
        let Self {
            pre,
            tube,
            post,
            scratch_left,
            scratch_right,
            ..
        } = self;
        let mut stages: [&mut dyn ChannelProcessor; 3] = [pre, tube, post];

        if frames <= STACK_FRAMES {
            let mut left = [0.0f32; STACK_FRAMES];
            let mut right = [0.0f32; STACK_FRAMES];
            run_stereo(&mut stages, buffer, &mut left[..frames], &mut right[..frames]);
        } else if frames <= scratch_left.len() {
            run_stereo(
                &mut stages,
                buffer,
                &mut scratch_left[..frames],
                &mut scratch_right[..frames],
            );
        } else {
            // Larger than prepared for: walk the buffer in stack-sized blocks
            let mut left = [0.0f32; STACK_FRAMES];
            let mut right = [0.0f32; STACK_FRAMES];
            for block in buffer.chunks_mut(STACK_FRAMES * 2) {
                let n = block.len() / 2;
                run_stereo(&mut stages, block, &mut left[..n], &mut right[..n]);
            }
        }
    }
}

/// De-interleave, run every stage, re-interleave
fn run_stereo(
    stages: &mut [&mut dyn ChannelProcessor],
    interleaved: &mut [f32],
    left: &mut [f32],
    right: &mut [f32],
) {
    for ((frame, l), r) in interleaved.chunks_exact(2).zip(left.iter_mut()).zip(right.iter_mut()) {
        *l = frame[0];
        *r = frame[1];
    }

    for stage in stages.iter_mut() {
        stage.process(left, right);
    }

    for ((frame, l), r) in interleaved.chunks_exact_mut(2).zip(left.iter()).zip(right.iter()) {
        frame[0] = *l;
        frame[1] = *r;
    }
}
