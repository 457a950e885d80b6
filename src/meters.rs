//! Lock-free level meters shared with the UI thread.
//!
//! Peaks are stored as `f32` bits in `AtomicU32` and written once per block by
//! the audio thread.

use crate::stem::Stem;
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Default)]
pub struct StemMeters {
    input_peak: AtomicU32,
    stem_peaks: [AtomicU32; Stem::COUNT],
}

impl StemMeters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_input_peak(&self, val: f32) {
        self.input_peak.store(val.to_bits(), Ordering::Relaxed);
    }

    pub fn set_stem_peak(&self, stem: Stem, val: f32) {
        self.stem_peaks[stem.index()].store(val.to_bits(), Ordering::Relaxed);
    }

    pub fn get_input_peak(&self) -> f32 {
        f32::from_bits(self.input_peak.load(Ordering::Relaxed))
    }

    pub fn get_stem_peak(&self, stem: Stem) -> f32 {
        f32::from_bits(self.stem_peaks[stem.index()].load(Ordering::Relaxed))
    }

    pub fn reset(&self) {
        self.set_input_peak(0.0);
        for stem in Stem::ALL {
            self.set_stem_peak(stem, 0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_and_reset() {
        let m = StemMeters::new();
        m.set_input_peak(0.75);
        m.set_stem_peak(Stem::Vocals, 0.5);
        assert_eq!(m.get_input_peak(), 0.75);
        assert_eq!(m.get_stem_peak(Stem::Vocals), 0.5);
        assert_eq!(m.get_stem_peak(Stem::Other), 0.0);
        m.reset();
        assert_eq!(m.get_stem_peak(Stem::Vocals), 0.0);
    }
}
