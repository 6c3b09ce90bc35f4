//! Oversampling Manager
//!
//! Converts between the base rate and the internal processing rate by a
//! runtime-selectable power of two (1x..64x). The rate change is a cascade of
//! 2x stages; each stage is a two-path polyphase IIR half-band (allpass pairs
//! in z^-2), so DC passes at unity, the stage Nyquist is nulled and magnitude
//! never exceeds unity regardless of coefficient rounding.
//!
//! ```text
//! up:   x ─► [zero-stuff ×2 ─► half-band] ×k ─► (N · 2^k samples)
//! down: y ─► [half-band ─► decimate ×2] ×k ─► (N samples)
//! ```
//!
//! # Lifecycle
//! - `Oversampler::new` is the only allocation point. Buffers are sized for the
//!   worst-case factor over `MAX_CHUNK` base samples, so later factor changes
//!   (`set_factor_index`) only reset filter memories.
//! - Callers feed at most `MAX_CHUNK` base samples per call.

use std::collections::TryReserveError;

/// Largest factor index (64x).
pub const MAX_FACTOR_INDEX: usize = 6;

/// Base-rate samples processed per upsample/downsample pass.
pub const MAX_CHUNK: usize = 512;

/// Allpass coefficients for the two half-band paths (12th-order steep design).
const PATH_A: [f64; 6] = [
    0.036_681_502_163_648_017,
    0.274_631_759_379_454_1,
    0.561_098_969_787_919_48,
    0.769_741_833_862_266,
    0.892_260_818_003_878_9,
    0.962_094_548_378_084,
];
const PATH_B: [f64; 6] = [
    0.136_547_624_631_957_71,
    0.423_138_617_436_566_67,
    0.677_540_049_974_161_6,
    0.839_889_624_849_638,
    0.931_541_959_963_183_9,
    0.987_816_370_732_897_1,
];

/// Factor for a factor index (`0..=6` → 1, 2, 4 .. 64).
#[inline]
pub fn factor_for_index(index: usize) -> usize {
    1 << index.min(MAX_FACTOR_INDEX)
}

/// Second-order allpass section in z^-2.
#[derive(Debug, Clone, Copy, Default)]
struct AllpassZ2 {
    a: f64,
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl AllpassZ2 {
    fn new(a: f64) -> Self {
        Self {
            a,
            ..Self::default()
        }
    }

    #[inline]
    fn process(&mut self, x: f64) -> f64 {
        let y = self.x2 + (x - self.y2) * self.a;
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }

    fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }
}

/// Half-band lowpass at a stage's own (higher) rate.
#[derive(Debug, Clone, Copy)]
struct HalfBand {
    path_a: [AllpassZ2; 6],
    path_b: [AllpassZ2; 6],
    delayed_b: f64,
}

impl HalfBand {
    fn new() -> Self {
        Self {
            path_a: PATH_A.map(AllpassZ2::new),
            path_b: PATH_B.map(AllpassZ2::new),
            delayed_b: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, x: f64) -> f64 {
        let a = self.path_a.iter_mut().fold(x, |acc, ap| ap.process(acc));
        let out = 0.5 * (a + self.delayed_b);
        self.delayed_b = self.path_b.iter_mut().fold(x, |acc, ap| ap.process(acc));
        out
    }

    fn reset(&mut self) {
        self.path_a.iter_mut().for_each(AllpassZ2::reset);
        self.path_b.iter_mut().for_each(AllpassZ2::reset);
        self.delayed_b = 0.0;
    }
}

/// Per-channel resampler memories and work buffer.
struct ChannelResampler {
    up: [HalfBand; MAX_FACTOR_INDEX],
    down: [HalfBand; MAX_FACTOR_INDEX],
    buffer: Vec<f32>,
}

impl ChannelResampler {
    fn new() -> Result<Self, TryReserveError> {
        let len = MAX_CHUNK << MAX_FACTOR_INDEX;
        let mut buffer = Vec::new();
        buffer.try_reserve_exact(len)?;
        buffer.resize(len, 0.0);
        Ok(Self {
            up: [HalfBand::new(); MAX_FACTOR_INDEX],
            down: [HalfBand::new(); MAX_FACTOR_INDEX],
            buffer,
        })
    }

    fn reset(&mut self) {
        self.up.iter_mut().for_each(HalfBand::reset);
        self.down.iter_mut().for_each(HalfBand::reset);
    }
}

pub struct Oversampler {
    factor_index: usize,
    channels: Vec<ChannelResampler>,
}

impl Oversampler {
    /// Allocates buffers for `num_channels` at the worst-case factor.
    pub fn new(num_channels: usize, factor_index: usize) -> Result<Self, TryReserveError> {
        let mut channels = Vec::new();
        channels.try_reserve_exact(num_channels)?;
        for _ in 0..num_channels {
            channels.push(ChannelResampler::new()?);
        }
        Ok(Self {
            factor_index: factor_index.min(MAX_FACTOR_INDEX),
            channels,
        })
    }

    pub fn factor_index(&self) -> usize {
        self.factor_index
    }

    pub fn factor(&self) -> usize {
        factor_for_index(self.factor_index)
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Switch factor without allocating. Memories are cleared so no stale
    /// energy from the previous rate leaks into the new one.
    pub fn set_factor_index(&mut self, index: usize) {
        self.factor_index = index.min(MAX_FACTOR_INDEX);
        self.reset();
    }

    pub fn reset(&mut self) {
        self.channels.iter_mut().for_each(ChannelResampler::reset);
    }

    /// Upsample one channel's chunk. Returns the oversampled block, which the
    /// caller may process in place before handing it to [`Self::downsample`].
    pub fn upsample(&mut self, channel: usize, input: &[f32]) -> &mut [f32] {
        let stages = self.factor_index;
        let ch = &mut self.channels[channel];
        let mut len = input.len().min(MAX_CHUNK);
        ch.buffer[..len].copy_from_slice(&input[..len]);

        for stage in ch.up.iter_mut().take(stages) {
            // Zero-stuff from the back so unread samples are never overwritten
            for i in (0..len).rev() {
                let v = ch.buffer[i];
                ch.buffer[2 * i + 1] = 0.0;
                ch.buffer[2 * i] = 2.0 * v;
            }
            len *= 2;
            for s in &mut ch.buffer[..len] {
                *s = stage.process(*s as f64) as f32;
            }
        }

        &mut ch.buffer[..len]
    }

    /// Filter and decimate the channel's oversampled block into `output`.
    pub fn downsample(&mut self, channel: usize, output: &mut [f32]) {
        let stages = self.factor_index;
        let ch = &mut self.channels[channel];
        let out_len = output.len().min(MAX_CHUNK);
        let mut len = out_len << stages;

        for stage in ch.down.iter_mut().take(stages).rev() {
            for s in &mut ch.buffer[..len] {
                *s = stage.process(*s as f64) as f32;
            }
            len /= 2;
            for i in 0..len {
                ch.buffer[i] = ch.buffer[2 * i];
            }
        }

        output[..out_len].copy_from_slice(&ch.buffer[..out_len]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn run(os: &mut Oversampler, input: &[f32]) -> Vec<f32> {
        let mut out = vec![0.0; input.len()];
        for (i_chunk, o_chunk) in input.chunks(MAX_CHUNK).zip(out.chunks_mut(MAX_CHUNK)) {
            os.upsample(0, i_chunk);
            os.downsample(0, o_chunk);
        }
        out
    }

    #[test]
    fn test_factor_table() {
        let factors: Vec<usize> = (0..=6).map(factor_for_index).collect();
        assert_eq!(factors, vec![1, 2, 4, 8, 16, 32, 64]);
        assert_eq!(factor_for_index(99), 64);
    }

    #[test]
    fn test_unity_factor_is_transparent() {
        let mut os = Oversampler::new(1, 0).unwrap();
        let input: Vec<f32> = (0..700).map(|i| (i as f32 * 0.01).sin()).collect();
        assert_eq!(run(&mut os, &input), input);
    }

    #[test]
    fn test_upsampled_length() {
        let mut os = Oversampler::new(2, 3).unwrap();
        assert_eq!(os.upsample(1, &[0.0; 100]).len(), 800);
    }

    #[test]
    fn test_round_trip_preserves_low_frequency_level() {
        for index in 1..=MAX_FACTOR_INDEX {
            let mut os = Oversampler::new(1, index).unwrap();
            let sr = 48_000.0;
            let input: Vec<f32> = (0..9600)
                .map(|i| 0.5 * (2.0 * PI * 1000.0 * i as f32 / sr).sin())
                .collect();
            let out = run(&mut os, &input);
            let peak = out[4800..].iter().fold(0.0f32, |m, v| m.max(v.abs()));
            assert!((peak - 0.5).abs() < 0.02, "factor index {index}: peak {peak}");
        }
    }

    #[test]
    fn test_silence_stays_silent() {
        let mut os = Oversampler::new(1, MAX_FACTOR_INDEX).unwrap();
        let out = run(&mut os, &[0.0; 2048]);
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_factor_change_clears_memory() {
        let mut os = Oversampler::new(1, 2).unwrap();
        run(&mut os, &[1.0; 512]);
        os.set_factor_index(4);
        assert_eq!(os.factor(), 16);
        let out = run(&mut os, &[0.0; 512]);
        assert!(out.iter().all(|&v| v == 0.0));
    }
}
