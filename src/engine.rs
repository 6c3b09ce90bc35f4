//! Processing core
//!
//! `ClipEngine` owns every piece of per-channel state, the oversampler, the
//! limiter and the loudness meter. The host adapter calls [`ClipEngine::prepare`]
//! off the audio thread and [`ClipEngine::process`] once per block with a
//! snapshot of the parameters.
//!
//! Per block (base rate unless noted):
//!
//! ```text
//! input gain ─┬─► [bypass: done]
//!             └─► OTT ─► SAT ─► SILK ─► up ─► clip ─► tone* ─► post LP ─► down
//!                  ─► DSM* ─► limiter ─► out          (* Analog only, os = oversampled)
//!                                     └─► K-weight ─► loudness (side path)
//! ```
//!
//! # Real-time contract
//! - `process` never allocates, locks or logs. Everything it touches is sized
//!   in `prepare`.
//! - Parameter changes are picked up at block boundaries. Stages that were idle
//!   are reset when they re-engage so stale memories never leak in.
//! - Before a successful `prepare` (or after a rejected configuration) the
//!   engine is a passthrough.

use std::collections::TryReserveError;
use std::fmt;
use std::sync::Arc;

use crate::dsp::analog_model::ModelBank;
use crate::dsp::clipper::{AnalogClipState, AnalogTransientState, ClipMode, ClipperCore};
use crate::dsp::dsm_eq::DsmState;
use crate::dsp::limiter::LinkedLimiter;
use crate::dsp::loudness::{KFilterState, LoudnessMeter};
use crate::dsp::ott::{OttStage, OttState};
use crate::dsp::oversampler::{Oversampler, MAX_CHUNK, MAX_FACTOR_INDEX};
use crate::dsp::post_filter::{self, PostLpState};
use crate::dsp::saturation::{SatState, SaturationStage};
use crate::dsp::silk::{SilkStage, SilkState};
use crate::dsp::tone_match::{AnalogToneState, ToneMatch};
use crate::dsp::utils::{db_to_lin, sanitize};
use crate::meters::{LookMode, Meters};

pub const MAX_CHANNELS: usize = 8;
pub const MAX_BLOCK_SIZE: usize = 1 << 16;
pub const MIN_SAMPLE_RATE: f32 = 8_000.0;
pub const MAX_SAMPLE_RATE: f32 = 768_000.0;

pub const INPUT_GAIN_MIN_DB: f32 = -24.0;
pub const INPUT_GAIN_MAX_DB: f32 = 24.0;

/// Oversampling index used until the host says otherwise (4x).
pub const DEFAULT_OVERSAMPLE_INDEX: usize = 2;
/// Oversampling index of the reference-null scenario (8x).
pub const REFERENCE_OVERSAMPLE_INDEX: usize = 3;

/// Parameter snapshot taken once per block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineParams {
    pub clip_mode: ClipMode,
    pub use_limiter: bool,
    pub ott_amount: f32,
    pub sat_amount: f32,
    /// 0..1, maps to the 0% / 50% / 100% model breakpoints.
    pub silk_amount: f32,
    pub input_gain_db: f32,
    pub oversample_index: usize,
    pub gain_bypass: bool,
    pub look_mode: LookMode,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            clip_mode: ClipMode::Digital,
            use_limiter: true,
            ott_amount: 0.0,
            sat_amount: 0.0,
            silk_amount: 0.0,
            input_gain_db: 0.0,
            oversample_index: DEFAULT_OVERSAMPLE_INDEX,
            gain_bypass: false,
            look_mode: LookMode::Classic,
        }
    }
}

fn unit(x: f32) -> f32 {
    if x.is_finite() {
        x.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

impl EngineParams {
    /// The offline null-test setup: Analog, full SILK, 8x, nothing else.
    pub fn reference_null() -> Self {
        Self {
            clip_mode: ClipMode::Analog,
            use_limiter: false,
            ott_amount: 0.0,
            sat_amount: 0.0,
            silk_amount: 1.0,
            input_gain_db: 0.0,
            oversample_index: REFERENCE_OVERSAMPLE_INDEX,
            gain_bypass: false,
            look_mode: LookMode::Classic,
        }
    }

    /// Clamps everything into range; non-finite amounts read as 0.
    fn sanitized(&self) -> Self {
        let gain = if self.input_gain_db.is_finite() {
            self.input_gain_db
                .clamp(INPUT_GAIN_MIN_DB, INPUT_GAIN_MAX_DB)
        } else {
            0.0
        };
        Self {
            ott_amount: unit(self.ott_amount),
            sat_amount: unit(self.sat_amount),
            silk_amount: unit(self.silk_amount),
            input_gain_db: gain,
            oversample_index: self.oversample_index.min(MAX_FACTOR_INDEX),
            ..*self
        }
    }
}

#[derive(Debug)]
pub enum PrepareError {
    InvalidSampleRate(f32),
    InvalidBlockSize(usize),
    UnsupportedChannelCount(usize),
    Allocation(TryReserveError),
}

impl fmt::Display for PrepareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrepareError::InvalidSampleRate(sr) => write!(f, "unsupported sample rate {sr} Hz"),
            PrepareError::InvalidBlockSize(n) => write!(f, "unsupported maximum block size {n}"),
            PrepareError::UnsupportedChannelCount(n) => {
                write!(f, "unsupported channel count {n} (1..={MAX_CHANNELS})")
            }
            PrepareError::Allocation(e) => write!(f, "failed to allocate processing state: {e}"),
        }
    }
}

impl std::error::Error for PrepareError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PrepareError::Allocation(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TryReserveError> for PrepareError {
    fn from(e: TryReserveError) -> Self {
        PrepareError::Allocation(e)
    }
}

fn validate(sample_rate: f32, max_block_size: usize, num_channels: usize) -> Result<(), PrepareError> {
    if !sample_rate.is_finite() || !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate) {
        return Err(PrepareError::InvalidSampleRate(sample_rate));
    }
    if max_block_size == 0 || max_block_size > MAX_BLOCK_SIZE {
        return Err(PrepareError::InvalidBlockSize(max_block_size));
    }
    if num_channels == 0 || num_channels > MAX_CHANNELS {
        return Err(PrepareError::UnsupportedChannelCount(num_channels));
    }
    Ok(())
}

/// Base-rate coefficients, fixed per sample rate.
#[derive(Clone, Copy)]
struct BaseStages {
    ott: OttStage,
    sat: SaturationStage,
    silk: SilkStage,
}

impl BaseStages {
    fn new(sample_rate: f32) -> Self {
        Self {
            ott: OttStage::new(sample_rate),
            sat: SaturationStage::new(sample_rate),
            silk: SilkStage::new(sample_rate),
        }
    }
}

/// Oversampled-domain coefficients, redesigned on rate or factor change.
#[derive(Clone, Copy)]
struct OversampledStages {
    clipper: ClipperCore,
    tone: ToneMatch,
    /// Freshly designed filter each channel copies on reset.
    post_lp: PostLpState,
}

impl OversampledStages {
    fn new(base_rate: f32, factor: usize) -> Self {
        let rate = base_rate * factor as f32;
        Self {
            clipper: ClipperCore::new(rate, factor),
            tone: ToneMatch::new(rate),
            post_lp: post_filter::design(base_rate, factor),
        }
    }
}

#[derive(Clone, Copy)]
struct ChannelState {
    ott: OttState,
    sat: SatState,
    silk: SilkState,
    transient: AnalogTransientState,
    clip: AnalogClipState,
    tone: AnalogToneState,
    post_lp: PostLpState,
    dsm: DsmState,
    k_filter: KFilterState,
}

impl ChannelState {
    fn new(sample_rate: f32, post_lp: PostLpState) -> Self {
        Self {
            ott: OttState::default(),
            sat: SatState::default(),
            silk: SilkState::default(),
            transient: AnalogTransientState::default(),
            clip: AnalogClipState::default(),
            tone: AnalogToneState::default(),
            post_lp,
            dsm: DsmState::new(sample_rate),
            k_filter: KFilterState::new(sample_rate),
        }
    }

    fn reset_analog(&mut self) {
        self.transient = AnalogTransientState::default();
        self.clip = AnalogClipState::default();
        self.tone.reset();
        self.dsm.reset();
    }

    fn reset_oversampled(&mut self, post_lp: PostLpState) {
        self.transient = AnalogTransientState::default();
        self.clip = AnalogClipState::default();
        self.tone.reset();
        self.post_lp = post_lp;
    }

    /// Everything in the signal path; the meter's K-filter is left alone.
    fn reset_signal_path(&mut self, post_lp: PostLpState) {
        self.ott.reset();
        self.sat.reset();
        self.silk.reset();
        self.dsm.reset();
        self.reset_oversampled(post_lp);
    }
}

/// Everything sized by `prepare`. Built off to the side and swapped in whole.
struct Prepared {
    sample_rate: f32,
    base: BaseStages,
    oversampled: OversampledStages,
    oversampler: Oversampler,
    channels: Vec<ChannelState>,
    limiter: LinkedLimiter,
    loudness: LoudnessMeter,
}

impl Prepared {
    fn build(
        sample_rate: f32,
        num_channels: usize,
        factor_index: usize,
    ) -> Result<Self, TryReserveError> {
        let oversampler = Oversampler::new(num_channels, factor_index)?;
        let oversampled = OversampledStages::new(sample_rate, oversampler.factor());

        let mut channels = Vec::new();
        channels.try_reserve_exact(num_channels)?;
        channels.extend((0..num_channels).map(|_| ChannelState::new(sample_rate, oversampled.post_lp)));

        Ok(Self {
            sample_rate,
            base: BaseStages::new(sample_rate),
            oversampled,
            oversampler,
            channels,
            limiter: LinkedLimiter::new(sample_rate),
            loudness: LoudnessMeter::new(sample_rate),
        })
    }

    fn set_factor_index(&mut self, index: usize) {
        self.oversampler.set_factor_index(index);
        self.oversampled = OversampledStages::new(self.sample_rate, self.oversampler.factor());
        let post_lp = self.oversampled.post_lp;
        for ch in self.channels.iter_mut() {
            ch.reset_oversampled(post_lp);
        }
    }

    fn reset_signal_path(&mut self) {
        let post_lp = self.oversampled.post_lp;
        for ch in self.channels.iter_mut() {
            ch.reset_signal_path(post_lp);
        }
        self.oversampler.reset();
        self.limiter.reset();
    }

    fn reset(&mut self) {
        self.reset_signal_path();
        for ch in self.channels.iter_mut() {
            ch.k_filter.reset();
        }
        self.loudness.reset();
    }
}

pub struct ClipEngine {
    meters: Arc<Meters>,
    bank: &'static ModelBank,
    prepared: Option<Prepared>,
    /// Factor used by the next `prepare`.
    factor_index: usize,
    /// Linear input gain reached at the end of the last block.
    gain: f32,
    /// Parameters of the previous block; `None` right after prepare/reset.
    last: Option<EngineParams>,
}

impl ClipEngine {
    pub fn new(meters: Arc<Meters>) -> Self {
        Self {
            meters,
            bank: ModelBank::shared(),
            prepared: None,
            factor_index: DEFAULT_OVERSAMPLE_INDEX,
            gain: 1.0,
            last: None,
        }
    }

    pub fn meters(&self) -> &Arc<Meters> {
        &self.meters
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared.is_some()
    }

    pub fn sample_rate(&self) -> Option<f32> {
        self.prepared.as_ref().map(|p| p.sample_rate)
    }

    pub fn num_channels(&self) -> usize {
        self.prepared.as_ref().map_or(0, |p| p.channels.len())
    }

    pub fn oversampling_factor(&self) -> usize {
        self.prepared
            .as_ref()
            .map_or(1 << self.factor_index, |p| p.oversampler.factor())
    }

    /// The IIR resampler adds no reported latency.
    pub fn latency_samples(&self) -> u32 {
        0
    }

    /// Reconfigures for a new topology. Not real-time safe.
    ///
    /// An invalid configuration leaves the engine in passthrough. A failed
    /// allocation leaves the previous configuration untouched.
    pub fn prepare(
        &mut self,
        sample_rate: f32,
        max_block_size: usize,
        num_channels: usize,
    ) -> Result<(), PrepareError> {
        if let Err(e) = validate(sample_rate, max_block_size, num_channels) {
            log::warn!("prepare rejected, running as passthrough: {e}");
            self.prepared = None;
            self.last = None;
            self.meters.clear();
            return Err(e);
        }

        let prepared = Prepared::build(sample_rate, num_channels, self.factor_index)
            .map_err(|e| {
                log::error!("prepare failed, keeping previous configuration: {e}");
                PrepareError::Allocation(e)
            })?;

        log::info!(
            "prepared: {} Hz, {} channel(s), max block {}, {}x oversampling",
            sample_rate,
            num_channels,
            max_block_size,
            prepared.oversampler.factor()
        );

        self.prepared = Some(prepared);
        self.last = None;
        self.meters.clear();
        Ok(())
    }

    /// Changes the oversampling factor outside of `process`. Never allocates.
    pub fn set_oversampling(&mut self, factor_index: usize) {
        self.factor_index = factor_index.min(MAX_FACTOR_INDEX);
        if let Some(p) = self.prepared.as_mut() {
            if p.oversampler.factor_index() != self.factor_index {
                p.set_factor_index(self.factor_index);
            }
        }
    }

    /// Zeroes all state and display values without reallocating.
    pub fn reset(&mut self) {
        if let Some(p) = self.prepared.as_mut() {
            p.reset();
        }
        self.last = None;
        self.meters.clear();
    }

    /// Resets stages that were idle in the previous block and now engage.
    fn apply_transitions(p: &mut Prepared, last: &EngineParams, params: &EngineParams) {
        if last.gain_bypass && !params.gain_bypass {
            p.reset_signal_path();
            return;
        }

        let became_analog =
            last.clip_mode != ClipMode::Analog && params.clip_mode == ClipMode::Analog;
        let ott_on = last.ott_amount <= 0.0 && params.ott_amount > 0.0;
        let sat_on = last.sat_amount <= 0.0 && params.sat_amount > 0.0;
        let silk_on = last.silk_amount <= 0.0 && params.silk_amount > 0.0;

        for ch in p.channels.iter_mut() {
            if became_analog {
                ch.reset_analog();
            }
            if ott_on {
                ch.ott.reset();
            }
            if sat_on {
                ch.sat.reset();
            }
            if silk_on {
                ch.silk.reset();
            }
        }

        if !last.use_limiter && params.use_limiter {
            p.limiter.reset();
        }
    }

    /// In-place transform of one host block. Real-time safe.
    ///
    /// Channels beyond the prepared count pass through untouched.
    pub fn process(&mut self, block: &mut [&mut [f32]], params: &EngineParams) {
        let Some(p) = self.prepared.as_mut() else {
            return;
        };
        let num_samples = block.iter().map(|c| c.len()).min().unwrap_or(0);
        if num_samples == 0 {
            return;
        }
        let num_channels = block.len().min(p.channels.len());
        let params = params.sanitized();

        if params.oversample_index != p.oversampler.factor_index() {
            p.set_factor_index(params.oversample_index);
            self.factor_index = params.oversample_index;
        }

        let target_gain = db_to_lin(params.input_gain_db);
        let start_gain = match self.last {
            Some(last) => {
                Self::apply_transitions(p, &last, &params);
                self.gain
            }
            None => target_gain,
        };
        self.gain = target_gain;
        self.last = Some(params);

        self.meters.set_gain_bypass(params.gain_bypass);
        self.meters.set_look_mode(params.look_mode);

        let gain_step = (target_gain - start_gain) / num_samples as f32;
        let limiter_on = params.use_limiter && !params.gain_bypass;

        let mut offset = 0;
        while offset < num_samples {
            let len = (num_samples - offset).min(MAX_CHUNK);

            for (ch, samples) in block.iter_mut().take(num_channels).enumerate() {
                let chunk = &mut samples[offset..offset + len];
                for (i, s) in chunk.iter_mut().enumerate() {
                    let g = start_gain + gain_step * (offset + i + 1) as f32;
                    *s = sanitize(*s * g);
                }
                if !params.gain_bypass {
                    Self::process_chunk(p, self.bank, ch, chunk, &params);
                }
            }

            for i in offset..offset + len {
                if limiter_on {
                    let peak = block[..num_channels]
                        .iter()
                        .fold(0.0f32, |m, c| m.max(c[i].abs()));
                    let g = p.limiter.compute_gain(peak);
                    for c in block[..num_channels].iter_mut() {
                        c[i] *= g;
                    }
                }

                let mut power = 0.0;
                for (c, state) in block[..num_channels].iter().zip(p.channels.iter_mut()) {
                    let w = state.k_filter.process(c[i]);
                    power += w * w;
                }
                p.loudness.accumulate(power);
            }

            offset += len;
        }

        let reading = p.loudness.end_block(num_samples);
        self.meters.set_lufs(reading.lufs);
        self.meters.set_burn(reading.burn);
        self.meters.set_lufs_burn(reading.lufs_burn);
        self.meters.set_signal_present(reading.signal_present);
        self.meters.set_limiter_gain_reduction_db(if limiter_on {
            p.limiter.get_gain_reduction_db()
        } else {
            0.0
        });
    }

    /// Signal path for one channel's chunk of at most `MAX_CHUNK` samples.
    fn process_chunk(
        p: &mut Prepared,
        bank: &ModelBank,
        ch: usize,
        chunk: &mut [f32],
        params: &EngineParams,
    ) {
        let Prepared {
            base,
            oversampled,
            oversampler,
            channels,
            ..
        } = p;
        let state = &mut channels[ch];
        let analog = params.clip_mode == ClipMode::Analog;
        let tone_amount = 1.0 - params.silk_amount;

        for s in chunk.iter_mut() {
            let x = base.ott.process(&mut state.ott, *s, params.ott_amount);
            let x = base.sat.process(&mut state.sat, x, params.sat_amount);
            let x = base
                .silk
                .process(bank, &mut state.silk, ch, x, params.silk_amount);
            *s = sanitize(x);
        }

        let os = oversampler.upsample(ch, chunk);
        for y in os.iter_mut() {
            let mut v = oversampled.clipper.process(
                params.clip_mode,
                &mut state.transient,
                &mut state.clip,
                *y,
            );
            if analog {
                v = oversampled.tone.process(&mut state.tone, v, tone_amount);
            }
            *y = state.post_lp.process(v);
        }
        oversampler.downsample(ch, chunk);

        for s in chunk.iter_mut() {
            let y = if analog { state.dsm.process(*s) } else { *s };
            *s = sanitize(y);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::limiter::LIMITER_CEILING_DB;
    use crate::dsp::loudness::LUFS_FLOOR;
    use std::f32::consts::PI;

    const SR: f32 = 48_000.0;

    fn engine(channels: usize) -> ClipEngine {
        let mut e = ClipEngine::new(Arc::new(Meters::new()));
        e.prepare(SR, 512, channels).unwrap();
        e
    }

    fn sine(amp: f32, freq: f32, sr: f32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| amp * (2.0 * PI * freq * i as f32 / sr).sin())
            .collect()
    }

    /// Runs a stereo signal (same on both channels) in blocks of `block`.
    fn render(e: &mut ClipEngine, input: &[f32], block: usize, params: &EngineParams) -> Vec<f32> {
        let mut left = input.to_vec();
        let mut right = input.to_vec();
        for (l, r) in left.chunks_mut(block).zip(right.chunks_mut(block)) {
            let mut chans: [&mut [f32]; 2] = [l, r];
            e.process(&mut chans, params);
        }
        left
    }

    fn peak(x: &[f32]) -> f32 {
        x.iter().fold(0.0f32, |m, v| m.max(v.abs()))
    }

    fn rms(x: &[f32]) -> f32 {
        (x.iter().map(|v| v * v).sum::<f32>() / x.len().max(1) as f32).sqrt()
    }

    fn all_modes() -> Vec<EngineParams> {
        let mut out = Vec::new();
        for &clip_mode in &[ClipMode::Digital, ClipMode::Analog] {
            for &silk_amount in &[0.0, 0.3, 1.0] {
                for oversample_index in 0..=MAX_FACTOR_INDEX {
                    out.push(EngineParams {
                        clip_mode,
                        silk_amount,
                        oversample_index,
                        ott_amount: 0.5,
                        sat_amount: 0.5,
                        ..EngineParams::default()
                    });
                }
            }
        }
        out
    }

    #[test]
    fn test_unprepared_is_passthrough() {
        let mut e = ClipEngine::new(Arc::new(Meters::new()));
        let input = sine(2.0, 440.0, SR, 256);
        let mut buf = input.clone();
        let mut chans: [&mut [f32]; 1] = [&mut buf];
        e.process(&mut chans, &EngineParams::default());
        assert_eq!(buf, input);
    }

    #[test]
    fn test_prepare_rejects_bad_configuration() {
        let mut e = engine(2);
        assert!(matches!(
            e.prepare(0.0, 512, 2),
            Err(PrepareError::InvalidSampleRate(_))
        ));
        assert!(!e.is_prepared());
        assert!(matches!(
            e.prepare(SR, 0, 2),
            Err(PrepareError::InvalidBlockSize(0))
        ));
        assert!(matches!(
            e.prepare(SR, 512, MAX_CHANNELS + 1),
            Err(PrepareError::UnsupportedChannelCount(_))
        ));
        assert!(matches!(
            e.prepare(f32::NAN, 512, 2),
            Err(PrepareError::InvalidSampleRate(_))
        ));

        // Rejected configuration degrades to passthrough
        let input = sine(1.5, 100.0, SR, 512);
        let out = render(&mut e, &input, 512, &EngineParams::reference_null());
        assert_eq!(out, input);

        e.prepare(SR, 512, 2).unwrap();
        assert!(e.is_prepared());
        assert_eq!(e.num_channels(), 2);
    }

    #[test]
    fn test_bypass_applies_only_input_gain() {
        let mut e = engine(2);
        let input = sine(0.9, 1_000.0, SR, 2_048);
        let gain = db_to_lin(6.0);

        for (i, mode) in all_modes().iter().enumerate().take(12) {
            let params = EngineParams {
                gain_bypass: true,
                input_gain_db: 6.0,
                use_limiter: i % 2 == 0,
                ..*mode
            };
            let out = render(&mut e, &input, 512, &params);
            for (y, x) in out.iter().zip(input.iter()) {
                assert_eq!(*y, *x * gain);
            }
            assert!(e.meters().get_gain_bypass());
        }
    }

    #[test]
    fn test_silence_stays_silent() {
        for params in all_modes() {
            let mut e = engine(2);
            let zeros = vec![0.0; 2_048];
            let out = render(&mut e, &zeros, 256, &params);
            assert!(out.iter().all(|&v| v == 0.0), "{params:?}");
        }
    }

    #[test]
    fn test_no_self_oscillation_after_signal() {
        for params in all_modes() {
            let mut e = engine(2);
            render(&mut e, &sine(0.9, 3_000.0, SR, 4_800), 512, &params);
            let tail = render(&mut e, &vec![0.0; 24_000], 512, &params);
            // Half a second later everything has decayed
            assert!(peak(&tail[tail.len() - 4_800..]) < 1e-4, "{params:?}");
        }
    }

    #[test]
    fn test_loudness_is_monotonic() {
        let reading = |amp: f32| {
            let mut e = engine(2);
            let params = EngineParams {
                use_limiter: false,
                ..EngineParams::default()
            };
            render(&mut e, &sine(amp, 1_000.0, SR, 96_000), 480, &params);
            e.meters().get_lufs()
        };
        let quiet = reading(0.1);
        let mid = reading(0.4);
        let loud = reading(0.9);
        assert!(quiet > LUFS_FLOOR);
        assert!(mid > quiet);
        assert!(loud >= mid);
    }

    #[test]
    fn test_display_values_in_range() {
        let mut e = engine(2);
        let params = EngineParams {
            clip_mode: ClipMode::Analog,
            silk_amount: 0.5,
            input_gain_db: 12.0,
            ..EngineParams::default()
        };
        render(&mut e, &sine(0.9, 200.0, SR, 96_000), 512, &params);
        let m = e.meters();
        assert!(m.get_signal_present());
        assert!((0.0..=1.0).contains(&m.get_burn()));
        assert!((0.0..=1.0).contains(&m.get_lufs_burn()));
        assert!(m.get_lufs() > -20.0 && m.get_lufs() < 6.0);
        assert!(m.get_limiter_gain_reduction_db() >= 0.0);

        render(&mut e, &vec![0.0; 8 * 48_000], 512, &params);
        assert!(!m.get_signal_present());
        assert_eq!(m.get_lufs_burn(), 0.0);
    }

    #[test]
    fn test_limiter_containment() {
        let ceiling = db_to_lin(LIMITER_CEILING_DB);
        let params = EngineParams {
            use_limiter: true,
            input_gain_db: 12.0,
            clip_mode: ClipMode::Analog,
            silk_amount: 1.0,
            sat_amount: 1.0,
            ott_amount: 1.0,
            oversample_index: 3,
            ..EngineParams::default()
        };
        let mut e = engine(2);

        // Burst, silence, burst: covers attack and the whole release
        let mut input = sine(0.9, 60.0, SR, 24_000);
        input.extend(vec![0.0; 12_000]);
        input.extend(sine(0.95, 5_000.0, SR, 24_000));
        let out = render(&mut e, &input, 512, &params);

        assert!(peak(&out) <= ceiling + 1e-6, "peak {}", peak(&out));
        assert!(e.meters().get_limiter_gain_reduction_db() >= 0.0);
    }

    #[test]
    fn test_limiter_off_is_zero_reduction() {
        let mut e = engine(1);
        let params = EngineParams {
            use_limiter: false,
            input_gain_db: 12.0,
            ..EngineParams::default()
        };
        let mut buf = sine(0.9, 100.0, SR, 512);
        let mut chans: [&mut [f32]; 1] = [&mut buf];
        e.process(&mut chans, &params);
        assert_eq!(e.meters().get_limiter_gain_reduction_db(), 0.0);
    }

    #[test]
    fn test_chunking_does_not_change_output() {
        let input: Vec<f32> = sine(0.8, 330.0, SR, 9_600)
            .iter()
            .zip(sine(0.3, 7_100.0, SR, 9_600))
            .map(|(a, b)| a + b)
            .collect();
        let params = EngineParams::reference_null();

        let reference = render(&mut engine(2), &input, 512, &params);
        for &block in &[64, 100, 4_800] {
            let out = render(&mut engine(2), &input, block, &params);
            for (a, b) in reference.iter().zip(out.iter()) {
                assert!((a - b).abs() < 1e-6, "block {block}");
            }
        }
    }

    #[derive(serde::Deserialize)]
    struct Tone {
        amplitude: f32,
        frequency: f32,
    }

    /// Decimated capture of a reference-null render.
    #[derive(serde::Deserialize)]
    struct NullCapture {
        sample_rate: f32,
        length: usize,
        tones: Vec<Tone>,
        stride: usize,
        tolerance: f32,
        samples: Vec<f32>,
    }

    #[test]
    fn test_reference_null_scenario() {
        let capture: NullCapture =
            serde_json::from_str(include_str!("../assets/fixtures/reference_null.json")).unwrap();
        assert_eq!(capture.sample_rate, SR);

        let mut input = vec![0.0f32; capture.length];
        for tone in &capture.tones {
            let wave = sine(tone.amplitude, tone.frequency, SR, capture.length);
            for (x, w) in input.iter_mut().zip(wave) {
                *x += w;
            }
        }
        let params = EngineParams::reference_null();
        assert_eq!(factor_for(params.oversample_index), 8);

        let first = render(&mut engine(2), &input, 512, &params);
        let second = render(&mut engine(2), &input, 512, &params);
        assert_eq!(first, second);
        assert!(first.iter().all(|v| v.is_finite()));

        let snapshot: Vec<f32> = first.iter().step_by(capture.stride).copied().collect();
        assert_eq!(snapshot.len(), capture.samples.len());
        for (i, (got, want)) in snapshot.iter().zip(capture.samples.iter()).enumerate() {
            assert!(
                (got - want).abs() <= capture.tolerance,
                "sample {}: got {got}, captured {want}",
                i * capture.stride
            );
        }

        // The analog path colours the signal but keeps its level
        let ratio = rms(&first[4_800..]) / rms(&input[4_800..]);
        assert!(ratio > 0.7 && ratio < 1.3, "level ratio {ratio}");
    }

    fn factor_for(index: usize) -> usize {
        crate::dsp::oversampler::factor_for_index(index)
    }

    #[test]
    fn test_prepare_zeroes_state() {
        let params = EngineParams {
            clip_mode: ClipMode::Analog,
            silk_amount: 1.0,
            ott_amount: 1.0,
            sat_amount: 1.0,
            ..EngineParams::default()
        };
        let mut e = engine(2);
        render(&mut e, &sine(0.9, 220.0, SR, 24_000), 512, &params);

        e.prepare(96_000.0, 1_024, 2).unwrap();
        assert_eq!(e.sample_rate(), Some(96_000.0));
        let out = render(&mut e, &vec![0.0; 4_096], 1_024, &params);
        assert!(out.iter().all(|&v| v == 0.0));
        assert_eq!(e.meters().get_lufs(), LUFS_FLOOR);
    }

    #[test]
    fn test_reconfiguration_has_no_burst() {
        let params = EngineParams {
            clip_mode: ClipMode::Analog,
            silk_amount: 0.5,
            ..EngineParams::default()
        };
        let mut e = engine(2);
        let steady = render(&mut e, &sine(0.5, 440.0, SR, 48_000), 512, &params);
        let steady_peak = peak(&steady[24_000..]);
        let steady_rms = rms(&steady[24_000..]);

        e.prepare(96_000.0, 512, 2).unwrap();
        let after = render(&mut e, &sine(0.5, 440.0, 96_000.0, 9_600), 512, &params);
        let first_block = &after[..512];
        assert!(peak(first_block) <= steady_peak * 1.5);
        assert!(rms(&after) < steady_rms * 1.5);

        // Runtime factor switch mid-stream
        let switched = EngineParams {
            oversample_index: 5,
            ..params
        };
        let out = render(&mut e, &sine(0.5, 440.0, 96_000.0, 2_048), 512, &switched);
        assert!(peak(&out) <= steady_peak * 1.5);
        assert_eq!(e.oversampling_factor(), 32);
    }

    #[test]
    fn test_process_does_not_allocate() {
        let mut e = engine(2);
        let mut left = sine(0.9, 440.0, SR, 512);
        let mut right = left.clone();
        let variants = all_modes();

        assert_no_alloc::assert_no_alloc(|| {
            for params in variants.iter() {
                let mut chans: [&mut [f32]; 2] = [&mut left, &mut right];
                e.process(&mut chans, params);
            }
            e.reset();
        });
    }

    #[test]
    fn test_non_finite_input_is_contained() {
        let mut e = engine(2);
        let params = EngineParams::reference_null();
        let mut input = sine(0.5, 440.0, SR, 2_048);
        input[100] = f32::NAN;
        input[700] = f32::INFINITY;
        input[701] = f32::NEG_INFINITY;
        let out = render(&mut e, &input, 512, &params);
        assert!(out.iter().all(|v| v.is_finite()));
        let next = render(&mut e, &sine(0.5, 440.0, SR, 2_048), 512, &params);
        assert!(next.iter().all(|v| v.is_finite()));
        assert!(peak(&next) > 0.1);
    }

    #[test]
    fn test_extra_channels_pass_through() {
        let mut e = engine(2);
        let input = sine(0.9, 440.0, SR, 512);
        let mut a = input.clone();
        let mut b = input.clone();
        let mut c = input.clone();
        let mut chans: [&mut [f32]; 3] = [&mut a, &mut b, &mut c];
        e.process(&mut chans, &EngineParams::reference_null());
        assert_eq!(c, input);
        assert_ne!(a, input);
    }

    #[test]
    fn test_input_gain_ramps_within_block() {
        let mut e = engine(1);
        let params = EngineParams {
            gain_bypass: true,
            ..EngineParams::default()
        };
        let mut buf = vec![1.0; 256];
        let mut chans: [&mut [f32]; 1] = [&mut buf];
        e.process(&mut chans, &params);

        let louder = EngineParams {
            input_gain_db: 6.0,
            ..params
        };
        let mut buf = vec![1.0; 256];
        let mut chans: [&mut [f32]; 1] = [&mut buf];
        e.process(&mut chans, &louder);
        for w in buf.windows(2) {
            assert!(w[1] >= w[0]);
        }
        assert!(buf[0] < 1.01);
        assert!((buf[255] - db_to_lin(6.0)).abs() < 1e-5);
    }

    #[test]
    fn test_reset_clears_meters() {
        let mut e = engine(2);
        render(&mut e, &sine(0.9, 440.0, SR, 48_000), 512, &EngineParams::default());
        assert!(e.meters().get_lufs() > LUFS_FLOOR);
        e.reset();
        assert_eq!(e.meters().get_lufs(), LUFS_FLOOR);
        assert!(!e.meters().get_signal_present());
    }

    #[test]
    fn test_params_are_sanitized() {
        let wild = EngineParams {
            ott_amount: f32::NAN,
            silk_amount: 3.0,
            input_gain_db: 90.0,
            oversample_index: 40,
            ..EngineParams::default()
        };
        let s = wild.sanitized();
        assert_eq!(s.ott_amount, 0.0);
        assert_eq!(s.silk_amount, 1.0);
        assert_eq!(s.input_gain_db, INPUT_GAIN_MAX_DB);
        assert_eq!(s.oversample_index, MAX_FACTOR_INDEX);
    }
}
