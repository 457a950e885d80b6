//! Runtime separation parameters shared with the control thread.
//!
//! Each knob is an independent atomic (`f32` bits in an `AtomicU32`). Writers
//! never wait on the audio thread, and the audio thread snapshots all three once
//! per hop. A torn read across knobs is harmless: each is consumed on its own.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

pub const DEFAULT_BASS_CUTOFF_HZ: f32 = 150.0;
pub const DEFAULT_VOCALS_FOCUS: f32 = 0.5;
pub const DEFAULT_DRUM_SENSITIVITY: f32 = 0.5;

// Upper bound on the bass crossover.
pub const BASS_CUTOFF_MAX_HZ: f32 = 20_000.0;

/// Values read by one hop of mask computation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamSnapshot {
    pub bass_cutoff_hz: f32,
    pub vocals_focus: f32,
    pub drum_sensitivity: f32,
}

impl Default for ParamSnapshot {
    fn default() -> Self {
        Self {
            bass_cutoff_hz: DEFAULT_BASS_CUTOFF_HZ,
            vocals_focus: DEFAULT_VOCALS_FOCUS,
            drum_sensitivity: DEFAULT_DRUM_SENSITIVITY,
        }
    }
}

pub struct SeparationParams {
    bass_cutoff_hz: AtomicU32,
    vocals_focus: AtomicU32,
    drum_sensitivity: AtomicU32,
}

impl Default for SeparationParams {
    fn default() -> Self {
        Self::from_snapshot(ParamSnapshot::default())
    }
}

impl SeparationParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(s: ParamSnapshot) -> Self {
        let params = Self {
            bass_cutoff_hz: AtomicU32::new(DEFAULT_BASS_CUTOFF_HZ.to_bits()),
            vocals_focus: AtomicU32::new(DEFAULT_VOCALS_FOCUS.to_bits()),
            drum_sensitivity: AtomicU32::new(DEFAULT_DRUM_SENSITIVITY.to_bits()),
        };
        params.set_bass_cutoff(s.bass_cutoff_hz);
        params.set_vocals_focus(s.vocals_focus);
        params.set_drum_sensitivity(s.drum_sensitivity);
        params
    }

    /// Bass crossover in Hz, clamped to `[0, 20000]`. Non-finite values are ignored.
    pub fn set_bass_cutoff(&self, hz: f32) {
        if hz.is_finite() {
            let v = hz.clamp(0.0, BASS_CUTOFF_MAX_HZ);
            self.bass_cutoff_hz.store(v.to_bits(), Ordering::Relaxed);
        }
    }

    /// 0 = flat 0.5 vocal gain, 1 = pure centre weighting.
    pub fn set_vocals_focus(&self, focus: f32) {
        if focus.is_finite() {
            self.vocals_focus
                .store(focus.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
        }
    }

    pub fn set_drum_sensitivity(&self, sensitivity: f32) {
        if sensitivity.is_finite() {
            self.drum_sensitivity
                .store(sensitivity.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
        }
    }

    pub fn bass_cutoff(&self) -> f32 {
        f32::from_bits(self.bass_cutoff_hz.load(Ordering::Relaxed))
    }

    pub fn vocals_focus(&self) -> f32 {
        f32::from_bits(self.vocals_focus.load(Ordering::Relaxed))
    }

    pub fn drum_sensitivity(&self) -> f32 {
        f32::from_bits(self.drum_sensitivity.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn snapshot(&self) -> ParamSnapshot {
        ParamSnapshot {
            bass_cutoff_hz: self.bass_cutoff(),
            vocals_focus: self.vocals_focus(),
            drum_sensitivity: self.drum_sensitivity(),
        }
    }
}
