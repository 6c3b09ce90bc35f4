//! Analog Null Model
//!
//! Static nonlinearity dataset describing the measured console path: for every
//! (intensity, channel) pair a pre-emphasis FIR, the valid input domain and a
//! 65536-entry signed 16-bit transfer table.
//!
//! The fitted curve parameters ship as an embedded JSON asset. The tables are
//! rendered from them exactly once per process (first call to
//! [`ModelBank::shared`]), which happens when the engine is constructed so the audio
//! thread never pays for it.
//!
//! # Invariants
//! - Lookups clamp to `[input_min, input_max]` before indexing; the table index
//!   is always in `0..=65535`.
//! - `lookup(0.0) == 0.0` exactly (the table's own value at zero is subtracted).

use once_cell::sync::Lazy;
use serde::Deserialize;

/// Number of entries in every transfer table.
pub const LUT_SIZE: usize = 65_536;

/// Fixed-point scale of the table entries.
pub const LUT_SCALE: f32 = 32_767.0;

/// Longest supported pre-emphasis FIR.
pub const MAX_TAPS: usize = 3;

/// Intensity breakpoints of the dataset (0%, 50%, 100%).
pub const INTENSITY_STEPS: [f32; 3] = [0.0, 0.5, 1.0];

const EMBEDDED_MODELS: &str = include_str!("../../assets/analog_models.json");

static MODEL_BANK: Lazy<ModelBank> = Lazy::new(ModelBank::load_embedded);

#[derive(Debug, Clone, Copy, Deserialize)]
struct CurveDescriptor {
    drive: f32,
    even: f32,
}

#[derive(Debug, Clone, Deserialize)]
struct ModelDescriptor {
    intensity: f32,
    channel: usize,
    pre_emphasis: Vec<f32>,
    input_range: [f32; 2],
    curve: CurveDescriptor,
}

#[derive(Debug, Deserialize)]
struct ModelFile {
    #[allow(dead_code)]
    version: u32,
    models: Vec<ModelDescriptor>,
}

#[derive(Debug)]
pub enum ModelError {
    Parse(serde_json::Error),
    Missing { intensity: usize, channel: usize },
    Invalid(&'static str),
}

impl std::fmt::Display for ModelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelError::Parse(e) => write!(f, "analog model asset is malformed: {e}"),
            ModelError::Missing { intensity, channel } => write!(
                f,
                "analog model asset has no entry for intensity step {intensity}, channel {channel}"
            ),
            ModelError::Invalid(why) => write!(f, "analog model rejected: {why}"),
        }
    }
}

impl std::error::Error for ModelError {}

/// One immutable measured model.
pub struct AnalogModel {
    taps: [f32; MAX_TAPS],
    num_taps: usize,
    input_min: f32,
    input_max: f32,
    /// Multiplier restoring the normalised table to signal units.
    output_scale: f32,
    zero_offset: f32,
    lut: Box<[i16]>,
}

impl AnalogModel {
    fn from_descriptor(desc: &ModelDescriptor) -> Result<Self, ModelError> {
        let n = desc.pre_emphasis.len();
        if n == 0 || n > MAX_TAPS {
            return Err(ModelError::Invalid("pre-emphasis tap count out of range"));
        }
        if desc.pre_emphasis[0].abs() < 1e-6 {
            return Err(ModelError::Invalid("leading pre-emphasis tap is zero"));
        }
        let [input_min, input_max] = desc.input_range;
        if !(input_min < input_max) || !input_min.is_finite() || !input_max.is_finite() {
            return Err(ModelError::Invalid("input range is empty"));
        }
        if desc.curve.drive <= 0.0 {
            return Err(ModelError::Invalid("curve drive must be positive"));
        }

        let mut taps = [0.0; MAX_TAPS];
        taps[..n].copy_from_slice(&desc.pre_emphasis);
        if !is_minimum_phase(&taps, n) {
            return Err(ModelError::Invalid("pre-emphasis is not invertible"));
        }

        let curve = desc.curve;
        let shape = |x: f32| (curve.drive * (x + curve.even * x * x)).tanh() / curve.drive;

        let step = (input_max - input_min) / (LUT_SIZE - 1) as f32;
        let output_scale = (0..LUT_SIZE)
            .map(|i| shape(input_min + i as f32 * step).abs())
            .fold(0.0f32, f32::max)
            .max(1e-6);

        let lut: Box<[i16]> = (0..LUT_SIZE)
            .map(|i| {
                let y = shape(input_min + i as f32 * step) / output_scale;
                (y * LUT_SCALE).round().clamp(-LUT_SCALE, LUT_SCALE) as i16
            })
            .collect();

        let mut model = Self {
            taps,
            num_taps: n,
            input_min,
            input_max,
            output_scale,
            zero_offset: 0.0,
            lut,
        };
        model.zero_offset = model.raw_lookup(0.0);
        Ok(model)
    }

    /// Straight line through the origin over the given range.
    fn identity(input_min: f32, input_max: f32) -> Self {
        let step = (input_max - input_min) / (LUT_SIZE - 1) as f32;
        let output_scale = input_min.abs().max(input_max.abs());
        let lut: Box<[i16]> = (0..LUT_SIZE)
            .map(|i| {
                let y = (input_min + i as f32 * step) / output_scale;
                (y * LUT_SCALE).round() as i16
            })
            .collect();
        let mut model = Self {
            taps: [1.0, 0.0, 0.0],
            num_taps: 1,
            input_min,
            input_max,
            output_scale,
            zero_offset: 0.0,
            lut,
        };
        model.zero_offset = model.raw_lookup(0.0);
        model
    }

    pub fn taps(&self) -> &[f32] {
        &self.taps[..self.num_taps]
    }

    pub fn input_range(&self) -> (f32, f32) {
        (self.input_min, self.input_max)
    }

    /// Input as the table sees it: inside `[input_min, input_max]`, NaN as 0.
    #[inline]
    pub fn clamp_input(&self, x: f32) -> f32 {
        let x = if x.is_finite() { x } else { 0.0 };
        x.clamp(self.input_min, self.input_max)
    }

    /// Table position for an input, clamped into `[0, LUT_SIZE - 1]`.
    #[inline]
    pub fn table_position(&self, x: f32) -> f32 {
        let clamped = self.clamp_input(x);
        let pos = (clamped - self.input_min) / (self.input_max - self.input_min)
            * (LUT_SIZE - 1) as f32;
        pos.clamp(0.0, (LUT_SIZE - 1) as f32)
    }

    #[inline]
    fn raw_lookup(&self, x: f32) -> f32 {
        let pos = self.table_position(x);
        let i0 = (pos as usize).min(LUT_SIZE - 2);
        let frac = pos - i0 as f32;
        let a = self.lut[i0] as f32;
        let b = self.lut[i0 + 1] as f32;
        (a + (b - a) * frac) / LUT_SCALE * self.output_scale
    }

    /// Measured transfer curve at `x`, zero at the origin.
    #[inline]
    pub fn lookup(&self, x: f32) -> f32 {
        self.raw_lookup(x) - self.zero_offset
    }
}

/// Stability triangle on the FIR's zeros, so the all-pole de-emphasis is stable.
fn is_minimum_phase(taps: &[f32; MAX_TAPS], n: usize) -> bool {
    let a1 = taps[1] / taps[0];
    let a2 = taps[2] / taps[0];
    match n {
        1 => true,
        2 => a1.abs() < 1.0,
        _ => a2.abs() < 1.0 && a1.abs() < 1.0 + a2,
    }
}

/// All six measured models, indexed by `[intensity step][channel]`.
pub struct ModelBank {
    models: [[AnalogModel; 2]; 3],
}

impl ModelBank {
    /// Process-wide bank built from the embedded asset.
    pub fn shared() -> &'static ModelBank {
        &MODEL_BANK
    }

    fn load_embedded() -> Self {
        match Self::from_json(EMBEDDED_MODELS) {
            Ok(bank) => {
                log::info!("loaded analog model bank (6 models, {LUT_SIZE}-point tables)");
                bank
            }
            Err(e) => {
                log::warn!("{e}; falling back to identity models");
                Self::identity()
            }
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        let file: ModelFile = serde_json::from_str(json).map_err(ModelError::Parse)?;

        let build = |step: usize, channel: usize| -> Result<AnalogModel, ModelError> {
            let target = INTENSITY_STEPS[step];
            file.models
                .iter()
                .find(|m| m.channel == channel && (m.intensity - target).abs() < 1e-3)
                .ok_or(ModelError::Missing {
                    intensity: step,
                    channel,
                })
                .and_then(AnalogModel::from_descriptor)
        };

        Ok(Self {
            models: [
                [build(0, 0)?, build(0, 1)?],
                [build(1, 0)?, build(1, 1)?],
                [build(2, 0)?, build(2, 1)?],
            ],
        })
    }

    pub fn identity() -> Self {
        let m = || AnalogModel::identity(-2.0, 2.0);
        Self {
            models: [[m(), m()], [m(), m()], [m(), m()]],
        }
    }

    /// Model for an intensity step (0..3) and an audio channel. Channels past
    /// the second reuse the measured pair.
    #[inline]
    pub fn model(&self, step: usize, channel: usize) -> &AnalogModel {
        &self.models[step.min(2)][channel % 2]
    }
}
