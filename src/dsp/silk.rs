//! SILK Coloration Stage
//!
//! Console-style coloration from the measured analog models: pre-emphasis FIR,
//! transfer-table shaping, a DC servo on the distortion residual and the
//! matching all-pole de-emphasis. Runs per channel at the base rate.
//!
//! All three intensity models run every sample so their filter memories stay
//! warm; the silk amount only decides how their outputs are blended. Between
//! breakpoints the model *outputs* are interpolated, never the tables.
//!
//! # Lifecycle
//! - **Active**: amount > 0.
//! - **Bypassed**: amount == 0, identity and state untouched. The engine resets
//!   the state when the stage re-engages.

use crate::dsp::analog_model::{ModelBank, INTENSITY_STEPS, MAX_TAPS};
use crate::dsp::utils::{lerp, one_pole_alpha};

/// Corner of the servo that removes bias added by even-harmonic asymmetry.
const DC_SERVO_HZ: f64 = 3.0;

#[derive(Debug, Clone, Copy, Default)]
struct ModelPathState {
    pre_hist: [f32; MAX_TAPS - 1],
    de_hist: [f32; MAX_TAPS - 1],
    dc: f32,
}

/// Per-channel SILK memories, one path per intensity model.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilkState {
    paths: [ModelPathState; INTENSITY_STEPS.len()],
}

impl SilkState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Bias currently removed by the servo of the 100% path.
    pub fn dc_offset(&self) -> f32 {
        self.paths[INTENSITY_STEPS.len() - 1].dc
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SilkStage {
    dc_alpha: f32,
}

impl SilkStage {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            dc_alpha: one_pole_alpha(DC_SERVO_HZ, sample_rate as f64) as f32,
        }
    }

    #[inline]
    pub fn process(
        &self,
        bank: &ModelBank,
        state: &mut SilkState,
        channel: usize,
        input: f32,
        amount: f32,
    ) -> f32 {
        if amount <= 0.0 {
            return input;
        }

        let mut outputs = [0.0f32; INTENSITY_STEPS.len()];
        for (step, (path, out)) in state.paths.iter_mut().zip(outputs.iter_mut()).enumerate() {
            let model = bank.model(step, channel);
            let taps = model.taps();
            let tap = |i: usize| taps.get(i).copied().unwrap_or(0.0);

            let pre = tap(0) * input + tap(1) * path.pre_hist[0] + tap(2) * path.pre_hist[1];
            path.pre_hist[1] = path.pre_hist[0];
            path.pre_hist[0] = input;

            let shaped = model.lookup(pre);
            // Only the table's own bias; what the input clamp removes is not DC
            path.dc += self.dc_alpha * ((shaped - model.clamp_input(pre)) - path.dc);
            let centered = shaped - path.dc;

            let de = (centered - tap(1) * path.de_hist[0] - tap(2) * path.de_hist[1]) / tap(0);
            path.de_hist[1] = path.de_hist[0];
            path.de_hist[0] = de;

            *out = de;
        }

        let pos = amount.min(1.0) * (INTENSITY_STEPS.len() - 1) as f32;
        let lower = (pos as usize).min(INTENSITY_STEPS.len() - 2);
        let t = pos - lower as f32;
        lerp(outputs[lower], outputs[lower + 1], t)
    }
}
