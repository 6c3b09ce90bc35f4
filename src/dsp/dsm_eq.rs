//! DSM capture EQ
//!
//! A fixed 32-band correction curve taken from a capture of the reference
//! hardware. Bands are log-spaced from 30 Hz to 16 kHz and run in series. The
//! curve never adapts; coefficients depend only on the sample rate.

use crate::dsp::biquad::Biquad;

pub const NUM_BANDS: usize = 32;

const LOWEST_HZ: f64 = 30.0;
const HIGHEST_HZ: f64 = 16_000.0;
const BAND_Q: f64 = 2.5;
// Bands this close to Nyquist are left flat
const NYQUIST_GUARD: f64 = 0.45;

/// Measured correction, dB per band (low to high).
const CAPTURE_GAINS_DB: [f64; NUM_BANDS] = [
    0.42, 0.51, 0.46, 0.33, 0.21, 0.12, 0.05, -0.04, //
    -0.11, -0.16, -0.12, -0.05, 0.02, 0.06, 0.04, -0.03, //
    -0.08, -0.06, 0.03, 0.11, 0.18, 0.14, 0.07, -0.02, //
    -0.14, -0.27, -0.38, -0.46, -0.52, -0.58, -0.55, -0.49,
];

/// Center frequency of band `index`.
pub fn band_frequency(index: usize) -> f64 {
    let t = index as f64 / (NUM_BANDS - 1) as f64;
    LOWEST_HZ * (HIGHEST_HZ / LOWEST_HZ).powf(t)
}

/// One channel of the capture EQ: 32 peaking sections in series.
#[derive(Debug, Clone, Copy)]
pub struct DsmState {
    bands: [Biquad; NUM_BANDS],
}

impl DsmState {
    pub fn new(sample_rate: f32) -> Self {
        let sr = sample_rate as f64;
        let mut bands = [Biquad::new(); NUM_BANDS];
        for (i, band) in bands.iter_mut().enumerate() {
            let freq = band_frequency(i);
            if freq < NYQUIST_GUARD * sr {
                band.set_peaking(freq, BAND_Q, CAPTURE_GAINS_DB[i], sr);
            }
        }
        Self { bands }
    }

    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        let mut y = x as f64;
        for band in self.bands.iter_mut() {
            y = band.process_f64(y);
        }
        y as f32
    }

    pub fn reset(&mut self) {
        for band in self.bands.iter_mut() {
            band.reset();
        }
    }
}

impl Default for DsmState {
    fn default() -> Self {
        Self::new(48_000.0)
    }
}
