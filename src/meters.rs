//! Thread-safe display values shared between the audio thread and readers.
//!
//! The audio thread is the only writer; every value is stored once per block.
//! Readers may see a value from the previous block and must not assume any
//! ordering between two different fields.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use nih_plug::prelude::Enum;
use serde::{Deserialize, Serialize};

use crate::dsp::loudness::LUFS_FLOOR;

/// How an external display should render the meters. Never touches audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Enum)]
#[repr(usize)]
pub enum LookMode {
    #[serde(rename = "Classic")]
    #[name = "Classic"]
    Classic,
    #[serde(rename = "Burn")]
    #[name = "Burn"]
    Burn,
    #[serde(rename = "Loudness")]
    #[name = "Loudness"]
    Loudness,
}

impl Default for LookMode {
    fn default() -> Self {
        LookMode::Classic
    }
}

impl LookMode {
    fn from_index(index: usize) -> Self {
        match index {
            1 => LookMode::Burn,
            2 => LookMode::Loudness,
            _ => LookMode::Classic,
        }
    }
}

pub struct Meters {
    lufs: AtomicU32,
    burn: AtomicU32,
    lufs_burn: AtomicU32,
    limiter_gain_reduction_db: AtomicU32,
    signal_present: AtomicBool,
    gain_bypass: AtomicBool,
    look_mode: AtomicUsize,
}

impl Default for Meters {
    fn default() -> Self {
        Self {
            lufs: AtomicU32::new(LUFS_FLOOR.to_bits()),
            burn: AtomicU32::new(0.0f32.to_bits()),
            lufs_burn: AtomicU32::new(0.0f32.to_bits()),
            limiter_gain_reduction_db: AtomicU32::new(0.0f32.to_bits()),
            signal_present: AtomicBool::new(false),
            gain_bypass: AtomicBool::new(false),
            look_mode: AtomicUsize::new(LookMode::Classic as usize),
        }
    }
}

impl Meters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Back to the silent state (floor LUFS, no burn, nothing present).
    pub fn clear(&self) {
        self.set_lufs(LUFS_FLOOR);
        self.set_burn(0.0);
        self.set_lufs_burn(0.0);
        self.set_limiter_gain_reduction_db(0.0);
        self.set_signal_present(false);
    }

    pub fn set_lufs(&self, val: f32) {
        self.lufs.store(val.to_bits(), Ordering::Relaxed);
    }

    pub fn set_burn(&self, val: f32) {
        self.burn.store(val.to_bits(), Ordering::Relaxed);
    }

    pub fn set_lufs_burn(&self, val: f32) {
        self.lufs_burn.store(val.to_bits(), Ordering::Relaxed);
    }

    pub fn set_limiter_gain_reduction_db(&self, val: f32) {
        self.limiter_gain_reduction_db
            .store(val.to_bits(), Ordering::Relaxed);
    }

    pub fn set_signal_present(&self, val: bool) {
        self.signal_present.store(val, Ordering::Relaxed);
    }

    pub fn set_gain_bypass(&self, val: bool) {
        self.gain_bypass.store(val, Ordering::Relaxed);
    }

    pub fn set_look_mode(&self, mode: LookMode) {
        self.look_mode.store(mode as usize, Ordering::Relaxed);
    }

    pub fn get_lufs(&self) -> f32 {
        f32::from_bits(self.lufs.load(Ordering::Relaxed))
    }

    pub fn get_burn(&self) -> f32 {
        f32::from_bits(self.burn.load(Ordering::Relaxed))
    }

    pub fn get_lufs_burn(&self) -> f32 {
        f32::from_bits(self.lufs_burn.load(Ordering::Relaxed))
    }

    pub fn get_limiter_gain_reduction_db(&self) -> f32 {
        f32::from_bits(self.limiter_gain_reduction_db.load(Ordering::Relaxed))
    }

    pub fn get_signal_present(&self) -> bool {
        self.signal_present.load(Ordering::Relaxed)
    }

    pub fn get_gain_bypass(&self) -> bool {
        self.gain_bypass.load(Ordering::Relaxed)
    }

    pub fn get_look_mode(&self) -> LookMode {
        LookMode::from_index(self.look_mode.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_silent() {
        let m = Meters::new();
        assert_eq!(m.get_lufs(), LUFS_FLOOR);
        assert_eq!(m.get_burn(), 0.0);
        assert!(!m.get_signal_present());
        assert_eq!(m.get_look_mode(), LookMode::Classic);
    }

    #[test]
    fn test_store_and_clear() {
        let m = Meters::new();
        m.set_lufs(-9.5);
        m.set_burn(0.7);
        m.set_signal_present(true);
        m.set_look_mode(LookMode::Loudness);
        assert_eq!(m.get_lufs(), -9.5);
        assert_eq!(m.get_burn(), 0.7);
        assert_eq!(m.get_look_mode(), LookMode::Loudness);

        m.clear();
        assert_eq!(m.get_lufs(), LUFS_FLOOR);
        assert!(!m.get_signal_present());
        // Look mode is a user choice, not a reading
        assert_eq!(m.get_look_mode(), LookMode::Loudness);
    }
}
