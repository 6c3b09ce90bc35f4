pub mod analog_model;
pub mod biquad;
pub mod clipper;
pub mod dsm_eq;
pub mod limiter;
pub mod loudness;
pub mod ott;
pub mod oversampler;
pub mod post_filter;
pub mod saturation;
pub mod silk;
pub mod tone_match;
pub mod utils;

pub use analog_model::{AnalogModel, ModelBank, ModelError};
pub use biquad::Biquad;
pub use clipper::{AnalogClipState, AnalogTransientState, ClipMode, ClipperCore};
pub use dsm_eq::DsmState;
pub use limiter::LinkedLimiter;
pub use loudness::{KFilterState, LoudnessMeter, LoudnessReading};
pub use ott::{OttStage, OttState};
pub use oversampler::Oversampler;
pub use post_filter::PostLpState;
pub use saturation::{SatState, SaturationStage};
pub use silk::{SilkStage, SilkState};
pub use tone_match::{AnalogToneState, ToneMatch};
