//! Small numeric helpers shared by the DSP stages.

use std::f64::consts::PI;

/// Floor used wherever a level is converted to decibels.
pub const DB_EPS: f32 = 1e-9;

#[inline]
pub fn db_to_lin(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

#[inline]
pub fn lin_to_db(lin: f32) -> f32 {
    20.0 * lin.max(DB_EPS).log10()
}

pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t.clamp(0.0, 1.0)
}

pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let denom = (edge1 - edge0).max(1e-12);
    let t = ((x - edge0) / denom).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Exponential smoothing coefficient for a time constant in milliseconds.
///
/// Used as `state = coeff * state + (1 - coeff) * input`.
#[inline]
pub fn time_constant_coeff(ms: f32, sample_rate: f32) -> f32 {
    let samples = (ms * 0.001 * sample_rate).max(1e-6);
    (-1.0 / samples).exp()
}

/// One-pole lowpass step size for a cutoff frequency.
///
/// Used as `state += alpha * (input - state)`. Computed in f64 so that very
/// low cutoffs at 64x rates do not collapse to zero.
#[inline]
pub fn one_pole_alpha(cutoff_hz: f64, sample_rate: f64) -> f64 {
    let nyquist_guard = 0.49 * sample_rate;
    let fc = cutoff_hz.clamp(1e-3, nyquist_guard);
    1.0 - (-2.0 * PI * fc / sample_rate).exp()
}

/// Replaces NaN/Inf with silence so nothing non-finite crosses a stage boundary.
#[inline]
pub fn sanitize(x: f32) -> f32 {
    if x.is_finite() {
        x
    } else {
        0.0
    }
}
