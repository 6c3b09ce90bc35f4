//! Clipper Core
//!
//! The centrepiece nonlinearity, run sample by sample in the oversampled
//! domain.
//!
//! - **Digital**: stateless soft clip, linear up to a -6 dB knee, then a tanh
//!   shoulder into a 0 dBFS ceiling.
//! - **Analog**: Lavry-style clip with memory. A slew stage smooths the input
//!   so the curve is not fed energy far above the audio band, a slope-gated
//!   level envelope detects *sustained* drive, that envelope pushes a slow
//!   bias offset (asymmetric clipping under load), and a DC blocker removes
//!   the net bias while keeping the even harmonics it created.
//!
//! Mode switches take effect on the next sample with no crossfade.

use nih_plug::prelude::Enum;
use serde::{Deserialize, Serialize};

use crate::dsp::utils::{db_to_lin, one_pole_alpha, smoothstep, time_constant_coeff};

/// Digital knee (-6 dBFS).
pub const DIGITAL_KNEE_DB: f32 = -6.0;
/// Output ceiling of both curves.
pub const CLIP_CEILING: f32 = 1.0;

/// Slew smoothing corner, in Hz at any rate (clamped below Nyquist at 1x).
const SLEW_CUTOFF_HZ: f64 = 30_000.0;
/// Largest per-base-sample slope still treated as sustained material.
const SLOPE_GATE_PER_BASE_SAMPLE: f32 = 0.25;
const ENV_ATTACK_MS: f32 = 10.0;
const ENV_RELEASE_MS: f32 = 300.0;
const BIAS_MS: f32 = 60.0;
/// Bias reached at full sustained drive.
const BIAS_DEPTH: f32 = 0.08;
const BIAS_ENV_START: f32 = 0.5;
const BIAS_ENV_FULL: f32 = 1.2;
const DC_BLOCK_HZ: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Enum)]
#[repr(usize)]
pub enum ClipMode {
    #[serde(rename = "Digital")]
    #[name = "Digital"]
    Digital,
    #[serde(rename = "Analog")]
    #[name = "Analog"]
    Analog,
}

impl Default for ClipMode {
    fn default() -> Self {
        ClipMode::Digital
    }
}

/// Soft clip: identity below `knee`, tanh shoulder up to `ceiling`.
#[inline]
pub fn soft_clip(x: f32, knee: f32, ceiling: f32) -> f32 {
    let a = x.abs();
    if a <= knee {
        return x;
    }
    let range = (ceiling - knee).max(1e-6);
    let y = knee + range * ((a - knee) / range).tanh();
    y.copysign(x)
}

/// Smooth hard-knee curve `x / (1 + x^4)^(1/4)`; unity slope at zero, ±1 asymptotes.
#[inline]
pub fn analog_curve(x: f32) -> f32 {
    let x2 = x * x;
    x / (1.0 + x2 * x2).sqrt().sqrt()
}

/// Slew-limiter memory and slope tracking (per channel).
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalogTransientState {
    slew: f32,
    prev: f32,
}

/// Bias memory, level envelope and DC blocker (per channel).
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalogClipState {
    bias: f32,
    env: f32,
    dc_x1: f32,
    dc_y1: f32,
}

impl AnalogClipState {
    pub fn bias(&self) -> f32 {
        self.bias
    }

    pub fn envelope(&self) -> f32 {
        self.env
    }
}

/// Analog clipper coefficients for one processing rate.
#[derive(Debug, Clone, Copy)]
pub struct AnalogClipCoeffs {
    slew_alpha: f32,
    slope_gate: f32,
    env_attack: f32,
    env_release: f32,
    bias_coeff: f32,
    dc_r: f32,
}

impl AnalogClipCoeffs {
    /// `rate` is the oversampled rate, `factor` the oversampling factor.
    pub fn new(rate: f32, factor: usize) -> Self {
        let rate64 = rate as f64;
        Self {
            slew_alpha: one_pole_alpha(SLEW_CUTOFF_HZ, rate64) as f32,
            slope_gate: SLOPE_GATE_PER_BASE_SAMPLE / factor.max(1) as f32,
            env_attack: time_constant_coeff(ENV_ATTACK_MS, rate),
            env_release: time_constant_coeff(ENV_RELEASE_MS, rate),
            bias_coeff: time_constant_coeff(BIAS_MS, rate),
            dc_r: (-2.0 * std::f64::consts::PI * DC_BLOCK_HZ / rate64).exp() as f32,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ClipperCore {
    knee: f32,
    analog: AnalogClipCoeffs,
}

impl ClipperCore {
    pub fn new(oversampled_rate: f32, factor: usize) -> Self {
        Self {
            knee: db_to_lin(DIGITAL_KNEE_DB),
            analog: AnalogClipCoeffs::new(oversampled_rate, factor),
        }
    }

    #[inline]
    pub fn process(
        &self,
        mode: ClipMode,
        transient: &mut AnalogTransientState,
        clip: &mut AnalogClipState,
        x: f32,
    ) -> f32 {
        match mode {
            ClipMode::Digital => soft_clip(x, self.knee, CLIP_CEILING),
            ClipMode::Analog => self.process_analog(transient, clip, x),
        }
    }

    #[inline]
    fn process_analog(
        &self,
        t: &mut AnalogTransientState,
        s: &mut AnalogClipState,
        x: f32,
    ) -> f32 {
        let c = &self.analog;

        t.slew += c.slew_alpha * (x - t.slew);
        let xs = t.slew;
        let slope = (xs - t.prev).abs();
        t.prev = xs;

        let level = xs.abs();
        if level > s.env {
            // Transients do not charge the envelope
            if slope < c.slope_gate {
                s.env = c.env_attack * s.env + (1.0 - c.env_attack) * level;
            }
        } else {
            s.env = c.env_release * s.env + (1.0 - c.env_release) * level;
        }

        let target = BIAS_DEPTH * smoothstep(BIAS_ENV_START, BIAS_ENV_FULL, s.env);
        s.bias = c.bias_coeff * s.bias + (1.0 - c.bias_coeff) * target;

        let clipped = analog_curve(xs + s.bias);

        let y = clipped - s.dc_x1 + c.dc_r * s.dc_y1;
        s.dc_x1 = clipped;
        s.dc_y1 = y;
        y
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn test_soft_clip_linear_below_knee() {
        let knee = db_to_lin(DIGITAL_KNEE_DB);
        for &x in &[0.0, 0.1, -0.3, knee, -knee] {
            assert_eq!(soft_clip(x, knee, 1.0), x);
        }
    }

    #[test]
    fn test_soft_clip_bounded_and_monotonic() {
        let knee = db_to_lin(DIGITAL_KNEE_DB);
        let mut prev = -f32::MAX;
        for i in -4000..=4000 {
            let x = i as f32 * 0.005;
            let y = soft_clip(x, knee, 1.0);
            assert!(y.abs() <= 1.0);
            assert!(y >= prev);
            prev = y;
        }
    }

    #[test]
    fn test_soft_clip_continuous_at_knee() {
        let knee = db_to_lin(DIGITAL_KNEE_DB);
        let above = soft_clip(knee + 1e-4, knee, 1.0);
        assert!((above - knee).abs() < 2e-4);
    }

    #[test]
    fn test_analog_curve_shape() {
        assert_eq!(analog_curve(0.0), 0.0);
        assert!((analog_curve(0.05) - 0.05).abs() < 1e-4);
        assert!(analog_curve(10.0) < 1.0);
        assert!((analog_curve(-3.0) + analog_curve(3.0)).abs() < 1e-6);
    }

    #[test]
    fn test_analog_silence() {
        let core = ClipperCore::new(384_000.0, 8);
        let mut t = AnalogTransientState::default();
        let mut s = AnalogClipState::default();
        for _ in 0..4096 {
            assert_eq!(core.process(ClipMode::Analog, &mut t, &mut s, 0.0), 0.0);
        }
    }

    #[test]
    fn test_sustained_drive_engages_bias() {
        let rate = 384_000.0;
        let core = ClipperCore::new(rate, 8);
        let mut t = AnalogTransientState::default();
        let mut s = AnalogClipState::default();
        for i in 0..(rate as usize / 2) {
            let x = 1.5 * (2.0 * PI * 100.0 * i as f32 / rate).sin();
            core.process(ClipMode::Analog, &mut t, &mut s, x);
        }
        assert!(s.envelope() > 0.9, "env {}", s.envelope());
        assert!(s.bias() > 0.5 * BIAS_DEPTH, "bias {}", s.bias());
    }

    #[test]
    fn test_short_spike_does_not_charge_envelope() {
        let core = ClipperCore::new(48_000.0, 1);
        let mut t = AnalogTransientState::default();
        let mut s = AnalogClipState::default();
        core.process(ClipMode::Analog, &mut t, &mut s, 2.0);
        core.process(ClipMode::Analog, &mut t, &mut s, 0.0);
        assert!(s.envelope() < 1e-6);
        assert!(s.bias() < 1e-6);
    }

    #[test]
    fn test_analog_output_has_no_net_dc() {
        let rate = 192_000.0;
        let core = ClipperCore::new(rate, 4);
        let mut t = AnalogTransientState::default();
        let mut s = AnalogClipState::default();
        let n = rate as usize * 2;
        let mut sum = 0.0f64;
        for i in 0..n {
            let x = 1.4 * (2.0 * PI * 100.0 * i as f32 / rate).sin();
            let y = core.process(ClipMode::Analog, &mut t, &mut s, x);
            if i >= n / 2 {
                sum += y as f64;
            }
        }
        let mean = sum / (n / 2) as f64;
        assert!(mean.abs() < 5e-3, "mean {mean}");
    }
}
