//! Tube stage: triode-style soft clipping plus output transformer loading
//!
//! The transfer curve is a fixed log-domain soft clip with a sigmoid
//! blend toward a linear reference. The frequency shaping is a single
//! 6th-order IIR (7 feedforward / 6 feedback taps) whose coefficients are
//! selected by sample rate. Nothing here is tunable at runtime except the
//! output trim.

use super::{db_to_gain, params, ChannelProcessor};
use crate::domain::coefficients::TubeCoefficients;
use tracing::{debug, info};

/// Fixed makeup gain applied after the filter
const OUTPUT_SCALE: f32 = 1.33;

/// Largest scaled input with a finite log term (the f32 just below 1.0)
const MAX_SCALED: f32 = 1.0 - f32::EPSILON / 2.0;

/// Transposed-form delay line of the tube filter
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct TubeFilterState {
    z: [f64; 6],
}

/// Waveshaper followed by the per-rate tube filter
#[derive(Debug, Clone, PartialEq)]
pub struct TubeStage {
    coeffs: TubeCoefficients,
    left: TubeFilterState,
    right: TubeFilterState,
    sample_rate: u32,
    output_gain_db: f32,
    output_gain: f64,
}

impl TubeStage {
    /// Create a stage tuned for `sample_rate`
    pub fn new(sample_rate: u32) -> Self {
        Self {
            coeffs: *TubeCoefficients::for_rate(sample_rate),
            left: TubeFilterState::default(),
            right: TubeFilterState::default(),
            sample_rate,
            output_gain_db: 0.0,
            output_gain: 1.0,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Reload coefficients and clear state if the rate changed
    ///
    /// Must not race with `process`; callers own the stage exclusively.
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        if sample_rate == self.sample_rate {
            return;
        }

        self.sample_rate = sample_rate;
        self.coeffs = *TubeCoefficients::for_rate(sample_rate);
        self.reset();

        info!(
            sample_rate,
            table = TubeCoefficients::resolved_rate(sample_rate),
            "Tube stage retuned"
        );
    }

    pub fn output_gain_db(&self) -> f32 {
        self.output_gain_db
    }

    /// Set the output trim, clamped to the supported range
    pub fn set_output_gain_db(&mut self, gain_db: f32) {
        self.output_gain_db = gain_db.clamp(params::OUTPUT_GAIN_DB_MIN, params::OUTPUT_GAIN_DB_MAX);
        self.output_gain = db_to_gain(f64::from(self.output_gain_db));
        debug!(gain_db = self.output_gain_db, "Tube output gain updated");
    }

    /// Static transfer curve, evaluated in single precision
    #[inline]
    pub fn shape_sample(x: f32) -> f32 {
        if !x.is_finite() {
            return 0.0;
        }

        let scaled = x * 0.75;
        let scaled = if scaled < 1.0 { scaled } else { MAX_SCALED };
        let mut shaped = scaled * 0.85 - (1.0 - scaled).ln() * 0.15;

        let abs_comp = (scaled * 0.9).abs();
        if abs_comp < shaped {
            let diff = shaped - abs_comp;
            shaped = abs_comp + diff / ((-diff).exp() + 1.0);
        } else if -abs_comp > shaped {
            let sum = abs_comp + shaped;
            shaped = sum / ((-sum).exp() + 1.0) - abs_comp;
        }

        shaped
    }

    #[inline]
    fn filter(coeffs: &TubeCoefficients, x: f64, state: &mut TubeFilterState) -> f64 {
        let z = &mut state.z;
        let y = coeffs.b[0] * x + z[0];
        for i in 0..5 {
            z[i] = coeffs.b[i + 1] * x - coeffs.a[i] * y + z[i + 1];
        }
        z[5] = coeffs.b[6] * x - coeffs.a[5] * y;
        y
    }

    #[inline]
    fn tick(&self, x: f32, state: &mut TubeFilterState) -> f32 {
        let shaped = f64::from(Self::shape_sample(x));
        let filtered = Self::filter(&self.coeffs, shaped, state);
        (filtered * f64::from(OUTPUT_SCALE) * self.output_gain) as f32
    }
}

impl ChannelProcessor for TubeStage {
    fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        let mut state_l = self.left;
        let mut state_r = self.right;

        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            *l = self.tick(*l, &mut state_l);
            *r = self.tick(*r, &mut state_r);
        }

        self.left = state_l;
        self.right = state_r;
    }

    fn process_mono(&mut self, buffer: &mut [f32]) {
        let mut state = self.left;
        for sample in buffer.iter_mut() {
            *sample = self.tick(*sample, &mut state);
        }
        self.left = state;
    }

    fn reset(&mut self) {
        self.left = TubeFilterState::default();
        self.right = TubeFilterState::default();
    }

    fn name(&self) -> &str {
        "TubeStage"
    }
}
