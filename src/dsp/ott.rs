//! OTT stage: three-band upward/downward compressor
//!
//! # Perceptual Contract
//! - **Target Source**: Full mix or bus, ahead of the clipper.
//! - **Intended Effect**: Dense, forward sound. Loud bands come down, quiet bands come up.
//! - **Failure Modes**:
//!   - Lifted noise floor on sparse material at high amounts.
//!   - Band-edge pumping when one band dominates.
//! - **Will Not Do**:
//!   - Peak control (the clipper and limiter own that).
//!   - Add latency.
//!
//! # Lifecycle
//! - **Active**: `ott_amount > 0`. Dry/wet blend by amount.
//! - **Bypassed**: Amount 0 returns the input untouched. Envelopes keep their value.
//!
//! Bands are split with one-pole lowpasses so that `low + mid + high == input`
//! exactly when all band gains are unity.

use crate::dsp::utils::{db_to_lin, lin_to_db, one_pole_alpha, smoothstep, time_constant_coeff};

const LOW_SPLIT_HZ: f64 = 88.0;
const HIGH_SPLIT_HZ: f64 = 2_500.0;

const ATTACK_MS: f32 = 5.0;
const RELEASE_MS: f32 = 80.0;

// Downward section: above threshold, band levels (RMS dB) are pulled toward it.
const DOWN_THRESHOLD_DB: f32 = -24.0;
const DOWN_RATIO: f32 = 4.0;

// Upward section: below threshold, quiet bands are lifted.
const UP_THRESHOLD_DB: f32 = -40.0;
const UP_RATIO: f32 = 3.0;
// Nothing under the floor is lifted; the lift fades in over FLOOR..FLOOR+10 dB.
const UP_FLOOR_DB: f32 = -80.0;
const UP_FADE_DB: f32 = 10.0;

const MAX_BAND_GAIN_DB: f32 = 12.0;

/// Input ceiling (+80 dBFS) so the split memories never overflow.
const MAX_INPUT: f32 = 1e4;
/// Detector ceiling (+12 dBFS). Band gain already sits at its clamp well below
/// this, so only the recovery after a huge hit changes.
const MAX_DETECT: f32 = 4.0;

const NUM_BANDS: usize = 3;

/// Per-channel split memories and band envelopes (squared).
#[derive(Debug, Clone, Copy, Default)]
pub struct OttState {
    split_low: f32,
    split_high: f32,
    env: [f32; NUM_BANDS],
}

impl OttState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Rate-dependent coefficients for the OTT stage.
#[derive(Debug, Clone, Copy)]
pub struct OttStage {
    low_alpha: f32,
    high_alpha: f32,
    attack: f32,
    release: f32,
}

impl OttStage {
    pub fn new(sample_rate: f32) -> Self {
        let sr = sample_rate as f64;
        Self {
            low_alpha: one_pole_alpha(LOW_SPLIT_HZ, sr) as f32,
            high_alpha: one_pole_alpha(HIGH_SPLIT_HZ, sr) as f32,
            attack: time_constant_coeff(ATTACK_MS, sample_rate),
            release: time_constant_coeff(RELEASE_MS, sample_rate),
        }
    }

    /// Static gain curve, band level in dB to gain in dB.
    fn band_gain_db(level_db: f32) -> f32 {
        let gain = if level_db > DOWN_THRESHOLD_DB {
            -(level_db - DOWN_THRESHOLD_DB) * (1.0 - 1.0 / DOWN_RATIO)
        } else if level_db < UP_THRESHOLD_DB {
            let fade = smoothstep(UP_FLOOR_DB, UP_FLOOR_DB + UP_FADE_DB, level_db);
            (UP_THRESHOLD_DB - level_db) * (1.0 - 1.0 / UP_RATIO) * fade
        } else {
            0.0
        };
        gain.clamp(-MAX_BAND_GAIN_DB, MAX_BAND_GAIN_DB)
    }

    #[inline]
    pub fn process(&self, state: &mut OttState, x: f32, amount: f32) -> f32 {
        if amount <= 0.0 {
            return x;
        }
        let x = x.clamp(-MAX_INPUT, MAX_INPUT);

        state.split_low += self.low_alpha * (x - state.split_low);
        state.split_high += self.high_alpha * (x - state.split_high);
        let bands = [
            state.split_low,
            state.split_high - state.split_low,
            x - state.split_high,
        ];

        let mut wet = 0.0;
        for (band, env) in bands.iter().zip(state.env.iter_mut()) {
            let detect = band.clamp(-MAX_DETECT, MAX_DETECT);
            let power = detect * detect;
            let coeff = if power > *env {
                self.attack
            } else {
                self.release
            };
            *env = coeff * *env + (1.0 - coeff) * power;

            // env is a power value; halve the amplitude dB conversion
            let level_db = 0.5 * lin_to_db(*env);
            wet += band * db_to_lin(Self::band_gain_db(level_db));
        }

        x + amount.min(1.0) * (wet - x)
    }
}
