//! Per-stem gain, mute and solo for monitoring the separated stems.
//!
//! Settings are atomics so a control thread can change them while the audio
//! thread mixes. When any stem is soloed only soloed stems play and mute is
//! ignored; otherwise every unmuted stem plays.

use crate::stem::{Stem, StemBuffers};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

pub const MAX_STEM_GAIN: f32 = 4.0;

pub struct StemMixer {
    gains: [AtomicU32; Stem::COUNT],
    mutes: [AtomicBool; Stem::COUNT],
    solos: [AtomicBool; Stem::COUNT],
}

impl Default for StemMixer {
    fn default() -> Self {
        Self {
            gains: std::array::from_fn(|_| AtomicU32::new(1.0f32.to_bits())),
            mutes: Default::default(),
            solos: Default::default(),
        }
    }
}

impl StemMixer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Linear gain, clamped to `[0, 4]`. Non-finite values are ignored.
    pub fn set_gain(&self, stem: Stem, gain: f32) {
        if gain.is_finite() {
            self.gains[stem.index()].store(gain.clamp(0.0, MAX_STEM_GAIN).to_bits(), Ordering::Relaxed);
        }
    }

    pub fn gain(&self, stem: Stem) -> f32 {
        f32::from_bits(self.gains[stem.index()].load(Ordering::Relaxed))
    }

    pub fn set_mute(&self, stem: Stem, muted: bool) {
        self.mutes[stem.index()].store(muted, Ordering::Relaxed);
    }

    pub fn is_muted(&self, stem: Stem) -> bool {
        self.mutes[stem.index()].load(Ordering::Relaxed)
    }

    pub fn set_solo(&self, stem: Stem, soloed: bool) {
        self.solos[stem.index()].store(soloed, Ordering::Relaxed);
    }

    pub fn is_soloed(&self, stem: Stem) -> bool {
        self.solos[stem.index()].load(Ordering::Relaxed)
    }

    /// Whether `stem` is heard given the current mute/solo state.
    pub fn is_audible(&self, stem: Stem) -> bool {
        let any_solo = Stem::ALL.iter().any(|&s| self.is_soloed(s));
        if any_solo {
            self.is_soloed(stem)
        } else {
            !self.is_muted(stem)
        }
    }

    /// Overwrites `out` with the gained sum of the audible stems.
    ///
    /// Output channels the stems do not have are silenced; at most
    /// `stems.len()` samples per channel are written.
    pub fn mix_into(&self, stems: &StemBuffers, out: &mut [&mut [f32]]) {
        let n = stems.len();
        let stem_channels = stems.num_channels();
        for (ch, dst) in out.iter_mut().enumerate() {
            let len = n.min(dst.len());
            let dst = &mut dst[..len];
            dst.fill(0.0);
            if ch >= stem_channels {
                continue;
            }
            for stem in Stem::ALL {
                if !self.is_audible(stem) {
                    continue;
                }
                let g = self.gain(stem);
                for (d, &s) in dst.iter_mut().zip(stems.channel(stem, ch)) {
                    *d += s * g;
                }
            }
        }
    }
}
