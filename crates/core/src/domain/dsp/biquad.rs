//! Cascaded biquad filter bank
//!
//! Each stage is a Direct Form II Transposed section evaluated in double
//! precision. Coefficients are shared between channels, state is not.

use super::ChannelProcessor;
use crate::domain::coefficients::BiquadCoefficients;
use tracing::debug;

/// Per-channel delay line of one section
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct BiquadState {
    z1: f64,
    z2: f64,
}

/// Section coefficients widened to the filter's working precision
#[derive(Debug, Clone, Copy, PartialEq)]
struct Section {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Section {
    /// y = b0*x + z1; z1 = b1*x - a1*y + z2; z2 = b2*x - a2*y
    #[inline]
    fn tick(&self, x: f64, state: &mut BiquadState) -> f64 {
        let y = self.b0 * x + state.z1;
        state.z1 = self.b1 * x - self.a1 * y + state.z2;
        state.z2 = self.b2 * x - self.a2 * y;
        y
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Stage {
    section: Section,
    left: BiquadState,
    right: BiquadState,
}

impl Stage {
    fn new(coeffs: &BiquadCoefficients) -> Self {
        Self {
            section: Section {
                b0: coeffs.b0(),
                b1: coeffs.b1(),
                b2: coeffs.b2(),
                a1: coeffs.a1(),
                a2: coeffs.a2(),
            },
            left: BiquadState::default(),
            right: BiquadState::default(),
        }
    }
}

/// Series of second-order sections applied per channel
///
/// An empty cascade passes audio through untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BiquadCascade {
    stages: Vec<Stage>,
}

impl BiquadCascade {
    /// Create an empty (pass-through) cascade
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Create a cascade from validated sections
    pub fn with_coefficients(coeffs: &[BiquadCoefficients]) -> Self {
        let mut cascade = Self::new();
        cascade.set_coefficients(coeffs);
        cascade
    }

    /// Replace every stage and clear state
    ///
    /// Allocates; call only from the control path.
    pub fn set_coefficients(&mut self, coeffs: &[BiquadCoefficients]) {
        self.stages.clear();
        self.stages.extend(coeffs.iter().map(Stage::new));
        debug!(stages = self.stages.len(), "Biquad cascade updated");
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

}

impl ChannelProcessor for BiquadCascade {
    fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        if self.stages.is_empty() {
            return;
        }

        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let mut sample_l = f64::from(*l);
            let mut sample_r = f64::from(*r);

            for stage in self.stages.iter_mut() {
                sample_l = stage.section.tick(sample_l, &mut stage.left);
                sample_r = stage.section.tick(sample_r, &mut stage.right);
            }

            *l = sample_l as f32;
            *r = sample_r as f32;
        }
    }

    fn process_mono(&mut self, buffer: &mut [f32]) {
        if self.stages.is_empty() {
            return;
        }

        for sample in buffer.iter_mut() {
            let mut x = f64::from(*sample);
            for stage in self.stages.iter_mut() {
                x = stage.section.tick(x, &mut stage.left);
            }
            *sample = x as f32;
        }
    }

    fn reset(&mut self) {
        for stage in self.stages.iter_mut() {
            stage.left = BiquadState::default();
            stage.right = BiquadState::default();
        }
    }

    fn name(&self) -> &str {
        "BiquadCascade"
    }
}
