//! K-weighted loudness meter
//!
//! Side path only: nothing here feeds back into the signal. Each channel runs
//! through its own [`KFilterState`]; the engine sums the weighted power of a
//! frame across channels and hands it to [`LoudnessMeter::accumulate`]. Once per
//! block [`LoudnessMeter::end_block`] turns the accumulators into display values.

use crate::dsp::biquad::Biquad;

// K-weighting pre-filter (high shelf) and RLB high-pass, BS.1770 values
const SHELF_HZ: f64 = 1_681.974_450_955_533;
const SHELF_Q: f64 = 0.707_175_236_955_419_6;
const SHELF_GAIN_DB: f64 = 3.999_843_853_973_347;
const RLB_HZ: f64 = 38.135_470_876_024_44;
const RLB_Q: f64 = 0.500_327_037_323_877_3;

const LUFS_OFFSET: f64 = -0.691;
/// Mean-square floor, keeps `log10` finite on silence.
const MEAN_SQUARE_FLOOR: f64 = 1e-6;
pub const LUFS_FLOOR: f32 = -60.0;

const MOMENTARY_MS: f64 = 400.0;
const SLOW_MS: f64 = 2_000.0;

const PRESENCE_GATE_LUFS: f32 = -45.0;
const PRESENCE_TAU_S: f64 = 0.3;
const PRESENCE_THRESHOLD: f32 = 0.2;

// Burn maps -30..-6 LUFS onto 0..1
const BURN_FLOOR_LUFS: f32 = -30.0;
const BURN_RANGE_DB: f32 = 24.0;

/// K-weighting filter pair for one channel.
#[derive(Debug, Clone, Copy)]
pub struct KFilterState {
    shelf: Biquad,
    rlb: Biquad,
}

impl KFilterState {
    pub fn new(sample_rate: f32) -> Self {
        let sr = sample_rate as f64;
        let mut shelf = Biquad::new();
        shelf.set_high_shelf(SHELF_HZ, SHELF_Q, SHELF_GAIN_DB, sr);
        let mut rlb = Biquad::new();
        rlb.set_hpf(RLB_HZ, RLB_Q, sr);
        Self { shelf, rlb }
    }

    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        let y = self.rlb.process_f64(self.shelf.process_f64(x as f64));
        y as f32
    }

    pub fn reset(&mut self) {
        self.shelf.reset();
        self.rlb.reset();
    }
}

impl Default for KFilterState {
    fn default() -> Self {
        Self::new(48_000.0)
    }
}

/// Values published once per block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoudnessReading {
    /// Slow (2 s) LUFS-like estimate, floored at [`LUFS_FLOOR`].
    pub lufs: f32,
    /// Momentary (400 ms) estimate, same scale.
    pub momentary_lufs: f32,
    pub burn: f32,
    pub lufs_burn: f32,
    pub signal_present: bool,
}

impl Default for LoudnessReading {
    fn default() -> Self {
        Self {
            lufs: LUFS_FLOOR,
            momentary_lufs: LUFS_FLOOR,
            burn: 0.0,
            lufs_burn: 0.0,
            signal_present: false,
        }
    }
}

pub struct LoudnessMeter {
    sample_rate: f64,
    momentary_coeff: f64,
    slow_coeff: f64,
    momentary_ms: f64,
    slow_ms: f64,
    presence: f64,
}

fn to_lufs(mean_square: f64) -> f32 {
    let lufs = LUFS_OFFSET + 10.0 * mean_square.max(MEAN_SQUARE_FLOOR).log10();
    (lufs as f32).max(LUFS_FLOOR)
}

fn burn_from(lufs: f32) -> f32 {
    ((lufs - BURN_FLOOR_LUFS) / BURN_RANGE_DB).clamp(0.0, 1.0)
}

impl LoudnessMeter {
    pub fn new(sample_rate: f32) -> Self {
        let sr = sample_rate as f64;
        Self {
            sample_rate: sr,
            momentary_coeff: (-1.0 / (MOMENTARY_MS * 0.001 * sr)).exp(),
            slow_coeff: (-1.0 / (SLOW_MS * 0.001 * sr)).exp(),
            momentary_ms: 0.0,
            slow_ms: 0.0,
            presence: 0.0,
        }
    }

    /// Feeds one frame: the sum over channels of the K-weighted sample squared.
    #[inline]
    pub fn accumulate(&mut self, frame_power: f32) {
        let p = frame_power as f64;
        if !p.is_finite() {
            return;
        }
        self.momentary_ms = self.momentary_coeff * self.momentary_ms
            + (1.0 - self.momentary_coeff) * p;
        self.slow_ms = self.slow_coeff * self.slow_ms + (1.0 - self.slow_coeff) * p;
    }

    /// Closes a block of `len` frames and derives the display values.
    pub fn end_block(&mut self, len: usize) -> LoudnessReading {
        let momentary_lufs = to_lufs(self.momentary_ms);
        let lufs = to_lufs(self.slow_ms);

        let target = if momentary_lufs > PRESENCE_GATE_LUFS {
            1.0
        } else {
            0.0
        };
        let coeff = (-(len as f64) / (PRESENCE_TAU_S * self.sample_rate)).exp();
        self.presence = coeff * self.presence + (1.0 - coeff) * target;
        let signal_present = self.presence as f32 > PRESENCE_THRESHOLD;

        LoudnessReading {
            lufs,
            momentary_lufs,
            burn: burn_from(momentary_lufs),
            lufs_burn: if signal_present { burn_from(lufs) } else { 0.0 },
            signal_present,
        }
    }

    pub fn reset(&mut self) {
        self.momentary_ms = 0.0;
        self.slow_ms = 0.0;
        self.presence = 0.0;
    }
}
