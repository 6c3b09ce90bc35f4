pub mod dsp;
pub mod engine;
pub mod meters;

use crate::dsp::ClipMode;
use crate::engine::{
    ClipEngine, EngineParams, DEFAULT_OVERSAMPLE_INDEX, INPUT_GAIN_MAX_DB, INPUT_GAIN_MIN_DB,
};
use crate::meters::{LookMode, Meters};
use assert_no_alloc::permit_alloc;
use nih_plug::prelude::*;
use std::sync::Arc;

const DEFAULT_SAMPLE_RATE: f32 = 44100.0;

// -----------------------------------------------------------------------------
// PARAMETERS
// -----------------------------------------------------------------------------

/// Internal processing rate as a multiple of the host rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Enum)]
pub enum OversampleMode {
    #[name = "1x"]
    X1,
    #[name = "2x"]
    X2,
    #[name = "4x"]
    X4,
    #[name = "8x"]
    X8,
    #[name = "16x"]
    X16,
    #[name = "32x"]
    X32,
    #[name = "64x"]
    X64,
}

impl OversampleMode {
    /// Factor index understood by the engine (`0..=6`).
    pub fn index(self) -> usize {
        self as usize
    }
}

#[derive(Params)]
pub struct SilkClipParams {
    #[id = "clip_mode"]
    pub clip_mode: EnumParam<ClipMode>,

    #[id = "use_limiter"]
    pub use_limiter: BoolParam,

    #[id = "ott_amount"]
    pub ott_amount: FloatParam,

    #[id = "sat_amount"]
    pub sat_amount: FloatParam,

    #[id = "silk_amount"]
    pub silk_amount: FloatParam,

    #[id = "input_gain"]
    pub input_gain: FloatParam,

    #[id = "oversample_mode"]
    pub oversample_mode: EnumParam<OversampleMode>,

    #[id = "gain_bypass"]
    pub gain_bypass: BoolParam,

    // Display only, never reaches the signal path
    #[id = "look_mode"]
    pub look_mode: EnumParam<LookMode>,
}

// Helper to format 0..1 amounts as percent
fn format_percent(v: f32) -> String {
    format!("{:.0}%", v * 100.0)
}

// Helper to format gain in dB
fn format_db(v: f32) -> String {
    format!("{:.1} dB", v)
}

fn amount_param(name: &str) -> FloatParam {
    FloatParam::new(name, 0.0, FloatRange::Linear { min: 0.0, max: 1.0 })
        .with_smoother(SmoothingStyle::Linear(50.0))
        .with_value_to_string(Arc::new(format_percent))
}

impl Default for SilkClipParams {
    fn default() -> Self {
        Self {
            clip_mode: EnumParam::new("Clip Mode", ClipMode::Digital),
            use_limiter: BoolParam::new("Limiter", true),
            ott_amount: amount_param("OTT"),
            sat_amount: amount_param("SAT"),
            silk_amount: amount_param("SILK"),
            input_gain: FloatParam::new(
                "Input Gain",
                0.0,
                FloatRange::Linear {
                    min: INPUT_GAIN_MIN_DB,
                    max: INPUT_GAIN_MAX_DB,
                },
            )
            .with_smoother(SmoothingStyle::Linear(50.0))
            .with_value_to_string(Arc::new(format_db)),
            oversample_mode: EnumParam::new("Oversampling", OversampleMode::X4),
            gain_bypass: BoolParam::new("Gain Bypass", false),
            look_mode: EnumParam::new("Look", LookMode::Classic).non_automatable(),
        }
    }
}

impl SilkClipParams {
    /// Atomic reads of every parameter, taken once per block.
    pub fn snapshot(&self) -> EngineParams {
        EngineParams {
            clip_mode: self.clip_mode.value(),
            use_limiter: self.use_limiter.value(),
            ott_amount: self.ott_amount.value(),
            sat_amount: self.sat_amount.value(),
            silk_amount: self.silk_amount.value(),
            input_gain_db: self.input_gain.value(),
            oversample_index: self.oversample_mode.value().index(),
            gain_bypass: self.gain_bypass.value(),
            look_mode: self.look_mode.value(),
        }
    }
}

// -----------------------------------------------------------------------------
// PLUGIN STRUCT
// -----------------------------------------------------------------------------
struct SilkClipPlugin {
    params: Arc<SilkClipParams>,
    engine: ClipEngine,
    sample_rate: f32,
}

impl Default for SilkClipPlugin {
    fn default() -> Self {
        Self {
            params: Arc::new(SilkClipParams::default()),
            engine: ClipEngine::new(Arc::new(Meters::new())),
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

impl Plugin for SilkClipPlugin {
    const NAME: &'static str = "SilkClip";
    const VENDOR: &'static str = "Andrzej Marczewski";
    const URL: &'static str = "";
    const EMAIL: &'static str = "";
    const VERSION: &'static str = env!("CARGO_PKG_VERSION");

    const AUDIO_IO_LAYOUTS: &'static [AudioIOLayout] = &[
        AudioIOLayout {
            main_input_channels: NonZeroU32::new(2),
            main_output_channels: NonZeroU32::new(2),
            ..AudioIOLayout::const_default()
        },
        AudioIOLayout {
            main_input_channels: NonZeroU32::new(1),
            main_output_channels: NonZeroU32::new(1),
            ..AudioIOLayout::const_default()
        },
    ];

    const MIDI_INPUT: MidiConfig = MidiConfig::None;
    const SAMPLE_ACCURATE_AUTOMATION: bool = false;

    type SysExMessage = ();
    type BackgroundTask = ();

    fn params(&self) -> Arc<dyn Params> {
        self.params.clone()
    }

    fn initialize(
        &mut self,
        audio_io_layout: &AudioIOLayout,
        buffer_config: &BufferConfig,
        context: &mut impl InitContext<Self>,
    ) -> bool {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.sample_rate = buffer_config.sample_rate;
            let channels = audio_io_layout
                .main_output_channels
                .map(NonZeroU32::get)
                .unwrap_or(2) as usize;

            self.engine
                .set_oversampling(self.params.oversample_mode.value().index());

            let prepared = permit_alloc(|| {
                self.engine.prepare(
                    self.sample_rate,
                    buffer_config.max_buffer_size as usize,
                    channels,
                )
            });
            if let Err(e) = prepared {
                log::error!("SilkClip failed to initialize: {e}");
                return false;
            }

            context.set_latency_samples(self.engine.latency_samples());
            true
        }))
        .unwrap_or(false)
    }

    fn process(
        &mut self,
        buffer: &mut Buffer,
        _aux: &mut AuxiliaryBuffers,
        _context: &mut impl ProcessContext<Self>,
    ) -> ProcessStatus {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let params = self.params.snapshot();
            self.engine.process(buffer.as_slice(), &params);
            ProcessStatus::Normal
        }))
        .unwrap_or(ProcessStatus::Normal)
    }

    fn reset(&mut self) {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.engine.reset();
        }))
        .unwrap_or(());
    }
}

impl ClapPlugin for SilkClipPlugin {
    const CLAP_ID: &'static str = "com.andrzej.silkclip";
    const CLAP_DESCRIPTION: Option<&'static str> = Some("Analog-modelled clipper and limiter");
    const CLAP_MANUAL_URL: Option<&'static str> = None;
    const CLAP_SUPPORT_URL: Option<&'static str> = None;
    const CLAP_FEATURES: &'static [ClapFeature] = &[
        ClapFeature::AudioEffect,
        ClapFeature::Distortion,
        ClapFeature::Limiter,
        ClapFeature::Stereo,
        ClapFeature::Mono,
    ];
}

impl Vst3Plugin for SilkClipPlugin {
    const VST3_CLASS_ID: [u8; 16] = *b"SilkClipAnalog01";
    const VST3_SUBCATEGORIES: &'static [Vst3SubCategory] = &[
        Vst3SubCategory::Fx,
        Vst3SubCategory::Distortion,
        Vst3SubCategory::Dynamics,
    ];
}

nih_export_clap!(SilkClipPlugin);
nih_export_vst3!(SilkClipPlugin);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oversample_mode_indices() {
        assert_eq!(OversampleMode::X1.index(), 0);
        assert_eq!(OversampleMode::X8.index(), 3);
        assert_eq!(OversampleMode::X64.index(), 6);
        assert_eq!(
            SilkClipParams::default().oversample_mode.value().index(),
            DEFAULT_OVERSAMPLE_INDEX
        );
    }

    #[test]
    fn test_continuous_params_are_smoothed() {
        let params = SilkClipParams::default();
        for p in [
            &params.ott_amount,
            &params.sat_amount,
            &params.silk_amount,
            &params.input_gain,
        ] {
            assert!(matches!(p.smoothed.style, SmoothingStyle::Linear(ms) if ms == 50.0));
        }
    }

    #[test]
    fn test_default_snapshot() {
        let snap = SilkClipParams::default().snapshot();
        assert_eq!(snap, EngineParams::default());
    }
}
