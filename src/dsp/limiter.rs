//! Output Limiter
//!
//! # Perceptual Contract
//! - **Target Source**: Final base-rate output, all channels.
//! - **Intended Effect**: Hold sample peaks at the ceiling (-0.1 dBFS).
//! - **Failure Modes**:
//!   - Audible pumping on dense material pushed far over the ceiling.
//! - **Will Not Do**:
//!   - Add latency (no lookahead; attack is instantaneous).
//!   - Color the sound below the ceiling.
//!
//! # Lifecycle
//! - **Active**: `use_limiter` on. Channels share one gain so the image holds.
//! - **Bypassed**: Passes audio through untouched, gain is reset on re-entry.

use crate::dsp::utils::{db_to_lin, lin_to_db, time_constant_coeff, DB_EPS};

pub const LIMITER_CEILING_DB: f32 = -0.1;
const RELEASE_MS: f32 = 80.0;

/// Channel-linked peak limiter.
pub struct LinkedLimiter {
    ceiling: f32,
    release: f32,
    gain: f32,
}

impl LinkedLimiter {
    pub fn new(sr: f32) -> Self {
        Self {
            ceiling: db_to_lin(LIMITER_CEILING_DB),
            release: time_constant_coeff(RELEASE_MS, sr),
            gain: 1.0,
        }
    }

    /// Gain for one frame given the frame's peak across channels.
    #[inline]
    pub fn compute_gain(&mut self, peak: f32) -> f32 {
        let target = if peak > self.ceiling {
            self.ceiling / peak.max(DB_EPS)
        } else {
            1.0
        };

        if target < self.gain {
            self.gain = target;
        } else {
            self.gain = self.release * self.gain + (1.0 - self.release) * target;
        }

        self.gain
    }

    pub fn reset(&mut self) {
        self.gain = 1.0;
    }

    /// Current gain reduction in dB (for metering)
    pub fn get_gain_reduction_db(&self) -> f32 {
        lin_to_db(self.gain).abs()
    }
}
