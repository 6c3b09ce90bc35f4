//! SAT stage: bass-tilted saturation.
//!
//! A one-pole lowpass (≈200 Hz) adds the bass band back on top of the input
//! before a tanh saturator; the matching inverse shelf runs on the output, so
//! small signals come through unchanged and loud low end reaches the curve
//! first.

use crate::dsp::utils::one_pole_alpha;

const TILT_CUTOFF_HZ: f64 = 200.0;
const BASS_EMPHASIS: f32 = 1.0;
const DRIVE: f32 = 0.8;

/// Bass-tilt lowpass memories (per channel): emphasis and inverse.
#[derive(Debug, Clone, Copy, Default)]
pub struct SatState {
    lp: f32,
    post_lp: f32,
}

impl SatState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SaturationStage {
    alpha: f32,
}

impl SaturationStage {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            alpha: one_pole_alpha(TILT_CUTOFF_HZ, sample_rate as f64) as f32,
        }
    }

    #[inline]
    pub fn process(&self, state: &mut SatState, x: f32, amount: f32) -> f32 {
        let a = self.alpha;
        state.lp += a * (x - state.lp);
        let shaped = (DRIVE * (x + BASS_EMPHASIS * state.lp)).tanh() / DRIVE;

        // Solve y + k * lp(y) = shaped for the current sample
        let wet = (shaped - BASS_EMPHASIS * (1.0 - a) * state.post_lp) / (1.0 + BASS_EMPHASIS * a);
        state.post_lp += a * (wet - state.post_lp);

        x + amount * (wet - x)
    }
}
