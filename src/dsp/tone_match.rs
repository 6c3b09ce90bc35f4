//! Tone-Match Stage
//!
//! Post-clip tilt approximating the reference hardware's response. Two one-pole
//! lowpasses split the signal into low (< 250 Hz), mid and high (> 10 kHz)
//! bands; low and high are re-weighted and added back.
//!
//! The engine drives the amount with `1 - silk`: with no SILK coloration the
//! tilt carries the character, with full SILK it steps aside.

use crate::dsp::utils::{db_to_lin, one_pole_alpha};

const LOW_SPLIT_HZ: f64 = 250.0;
const HIGH_SPLIT_HZ: f64 = 10_000.0;
const LOW_TILT_DB: f32 = 0.6;
const HIGH_TILT_DB: f32 = -1.2;

/// The two split memories (per channel).
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalogToneState {
    low: f32,
    low_mid: f32,
}

impl AnalogToneState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ToneMatch {
    low_alpha: f32,
    high_alpha: f32,
    low_weight: f32,
    high_weight: f32,
}

impl ToneMatch {
    pub fn new(sample_rate: f32) -> Self {
        let sr = sample_rate as f64;
        Self {
            low_alpha: one_pole_alpha(LOW_SPLIT_HZ, sr) as f32,
            high_alpha: one_pole_alpha(HIGH_SPLIT_HZ, sr) as f32,
            low_weight: db_to_lin(LOW_TILT_DB) - 1.0,
            high_weight: db_to_lin(HIGH_TILT_DB) - 1.0,
        }
    }

    #[inline]
    pub fn process(&self, state: &mut AnalogToneState, x: f32, amount: f32) -> f32 {
        state.low += self.low_alpha * (x - state.low);
        state.low_mid += self.high_alpha * (x - state.low_mid);
        let high = x - state.low_mid;
        x + amount * (self.low_weight * state.low + self.high_weight * high)
    }
}
