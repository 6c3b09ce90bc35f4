//! Post Anti-Alias Filter
//!
//! Fourth-order Butterworth lowpass (two cascaded sections) run at the
//! oversampled rate straight after the clipper, ahead of decimation.
//!
//! The corner tracks the *base* rate (20 kHz, or 0.45·fs below 44.4 kHz) and
//! is clamped under the processing Nyquist. Sections are designed in f64 and
//! checked against the stability triangle; at 64x the poles sit within 1e-3 of
//! z = 1, which is exactly where f32 coefficients stop being trustworthy.

use crate::dsp::biquad::Biquad;

const POST_CUTOFF_HZ: f64 = 20_000.0;
const BASE_NYQUIST_FRACTION: f64 = 0.45;
/// Butterworth Qs for a 4th-order cascade.
const SECTION_Q: [f64; 2] = [0.541_196_100_146_197, 1.306_562_964_876_376_6];

/// Two cascaded sections (per channel).
#[derive(Debug, Clone, Copy, Default)]
pub struct PostLpState {
    sections: [Biquad; 2],
}

impl PostLpState {
    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        let y = self.sections[0].process_f64(x as f64);
        self.sections[1].process_f64(y) as f32
    }

    pub fn reset(&mut self) {
        self.sections.iter_mut().for_each(Biquad::reset);
    }
}

/// Corner frequency used for a base rate.
pub fn cutoff_for(base_rate: f64) -> f64 {
    POST_CUTOFF_HZ.min(BASE_NYQUIST_FRACTION * base_rate)
}

/// Freshly designed filter (zeroed memories) for a base rate and factor.
pub fn design(base_rate: f32, factor: usize) -> PostLpState {
    let base = base_rate as f64;
    let rate = base * factor.max(1) as f64;
    let fc = cutoff_for(base).clamp(20.0, BASE_NYQUIST_FRACTION * rate);

    let mut state = PostLpState::default();
    for (section, &q) in state.sections.iter_mut().zip(SECTION_Q.iter()) {
        section.set_lpf(fc, q, rate);
        if !section.is_stable() {
            section.set_identity();
        }
    }
    state
}
