//! Biquad Filter Implementation (IIR 2nd Order)
//!
//! The second-order section behind the post anti-alias lowpass, the DSM
//! capture EQ bank and the K-weighting pair of the loudness meter. The
//! oversampler's half-bands use their own allpass sections.
//!
//! # Design Notes
//! - Coefficients and delay state are kept in f64. At 64x oversampling the
//!   post filter's poles sit very close to z = 1 and f32 coefficients lose
//!   the precision needed to stay inside the unit circle.
//! - Coefficient updates never touch the delay state; call `reset` explicitly.
//! - All operations are safe for the audio thread (no allocations).

use std::f64::consts::PI;

/// Transposed direct form II biquad.
#[derive(Debug, Clone, Copy)]
pub struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    z1: f64,
    z2: f64,
}

impl Default for Biquad {
    fn default() -> Self {
        Self::new()
    }
}

impl Biquad {
    /// Identity section (passes input through).
    pub fn new() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            z1: 0.0,
            z2: 0.0,
        }
    }

    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        self.process_f64(input as f64) as f32
    }

    #[inline]
    pub fn process_f64(&mut self, x: f64) -> f64 {
        let y = self.b0 * x + self.z1;
        self.z1 = self.b1 * x - self.a1 * y + self.z2;
        self.z2 = self.b2 * x - self.a2 * y;
        y
    }

    /// Clear the delay state. Coefficients are kept.
    #[inline]
    pub fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }

    /// Delay state as `[z1, z2]`.
    pub fn state(&self) -> [f64; 2] {
        [self.z1, self.z2]
    }

    /// Poles strictly inside the unit circle (stability triangle test).
    pub fn is_stable(&self) -> bool {
        self.a2.abs() < 1.0 && self.a1.abs() < 1.0 + self.a2
    }

    pub fn set_identity(&mut self) {
        self.set_normalized(1.0, 0.0, 0.0, 1.0, 0.0, 0.0);
    }

    fn set_normalized(&mut self, b0: f64, b1: f64, b2: f64, a0: f64, a1: f64, a2: f64) {
        let inv_a0 = 1.0 / a0;
        self.b0 = b0 * inv_a0;
        self.b1 = b1 * inv_a0;
        self.b2 = b2 * inv_a0;
        self.a1 = a1 * inv_a0;
        self.a2 = a2 * inv_a0;
    }

    // ---------------------------------------------------------------------
    // Filter design helpers (RBJ-style)
    // ---------------------------------------------------------------------

    pub fn set_lpf(&mut self, cutoff: f64, q: f64, sr: f64) {
        let w0 = 2.0 * PI * cutoff / sr;
        let alpha = w0.sin() / (2.0 * q.max(1e-6));
        let cw0 = w0.cos();

        self.set_normalized(
            (1.0 - cw0) * 0.5,
            1.0 - cw0,
            (1.0 - cw0) * 0.5,
            1.0 + alpha,
            -2.0 * cw0,
            1.0 - alpha,
        );
    }

    pub fn set_hpf(&mut self, cutoff: f64, q: f64, sr: f64) {
        let w0 = 2.0 * PI * cutoff / sr;
        let alpha = w0.sin() / (2.0 * q.max(1e-6));
        let cw0 = w0.cos();

        self.set_normalized(
            (1.0 + cw0) * 0.5,
            -(1.0 + cw0),
            (1.0 + cw0) * 0.5,
            1.0 + alpha,
            -2.0 * cw0,
            1.0 - alpha,
        );
    }

    /// High shelf with a Q (not slope) bandwidth parameter.
    pub fn set_high_shelf(&mut self, cutoff: f64, q: f64, gain_db: f64, sr: f64) {
        if gain_db.abs() < 0.01 {
            self.set_identity();
            return;
        }

        let a = 10.0_f64.powf(gain_db / 40.0);
        let w0 = 2.0 * PI * cutoff / sr;
        let cw0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q.max(1e-6));
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        self.set_normalized(
            a * ((a + 1.0) + (a - 1.0) * cw0 + two_sqrt_a_alpha),
            -2.0 * a * ((a - 1.0) + (a + 1.0) * cw0),
            a * ((a + 1.0) + (a - 1.0) * cw0 - two_sqrt_a_alpha),
            (a + 1.0) - (a - 1.0) * cw0 + two_sqrt_a_alpha,
            2.0 * ((a - 1.0) - (a + 1.0) * cw0),
            (a + 1.0) - (a - 1.0) * cw0 - two_sqrt_a_alpha,
        );
    }

    pub fn set_peaking(&mut self, cutoff: f64, q: f64, gain_db: f64, sr: f64) {
        if gain_db.abs() < 0.01 {
            self.set_identity();
            return;
        }

        let a = 10.0_f64.powf(gain_db / 40.0);
        let w0 = 2.0 * PI * cutoff / sr;
        let alpha = w0.sin() / (2.0 * q.max(1e-6));
        let cw0 = w0.cos();

        self.set_normalized(
            1.0 + alpha * a,
            -2.0 * cw0,
            1.0 - alpha * a,
            1.0 + alpha / a,
            -2.0 * cw0,
            1.0 - alpha / a,
        );
    }
}
