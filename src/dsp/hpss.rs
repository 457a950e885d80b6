//! Harmonic / Percussive Classifier (median filtering)
//!
//! Classifies each bin of a delayed frame as sustained (harmonic) or broadband
//! instantaneous (percussive):
//!
//! - **Harmonic strength**: median of the bin's magnitude across the time window.
//! - **Percussive strength**: median across a frequency neighbourhood of the same
//!   frame, edges replicated.
//!
//! The classified frame sits `depth / 2` hops behind the newest, which adds
//! `depth / 2 * hop` samples of latency.
//!
//! # Warm-up
//! Until the classified frame exists (`depth / 2 + 1` frames pushed) the
//! classifier reports passthrough (harmonic 1, percussive 0). After that, time
//! windows reaching past the oldest stored frame are padded with that frame,
//! never with zeros.

use crate::dsp::history::SpectrogramHistory;
use crate::dsp::median::{median_in_place, neighbourhood_median};
use crate::dsp::utils::MAG_EPS;

/// Soft masks for the most recently classified frame.
#[derive(Debug, Clone)]
pub struct HpssMasks {
    pub harmonic: Vec<f32>,
    pub percussive: Vec<f32>,
}

impl HpssMasks {
    fn passthrough(bins: usize) -> Self {
        Self {
            harmonic: vec![1.0; bins],
            percussive: vec![0.0; bins],
        }
    }

    fn set_passthrough(&mut self) {
        self.harmonic.fill(1.0);
        self.percussive.fill(0.0);
    }
}

pub struct HpssClassifier {
    depth: usize,
    kernel: usize,
    masks: HpssMasks,
    ready: bool,
    time_scratch: Vec<f32>,
    freq_scratch: Vec<f32>,
}

impl HpssClassifier {
    /// `depth` and `kernel` must be odd so each median is a single sample.
    pub fn new(depth: usize, kernel: usize, bins: usize) -> Self {
        debug_assert!(depth % 2 == 1);
        debug_assert!(kernel % 2 == 1);
        Self {
            depth,
            kernel,
            masks: HpssMasks::passthrough(bins),
            ready: false,
            time_scratch: vec![0.0; depth],
            freq_scratch: vec![0.0; kernel],
        }
    }

    /// Frames behind the newest that are classified.
    #[inline]
    pub fn center_age(&self) -> usize {
        self.depth / 2
    }

    /// Whether the last `classify` produced real masks (not passthrough).
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn masks(&self) -> &HpssMasks {
        &self.masks
    }

    /// Recomputes the masks for the frame `center_age()` behind the newest.
    /// Returns `false` (and passthrough masks) while the history is cold.
    pub fn classify(&mut self, history: &SpectrogramHistory) -> bool {
        let center = self.center_age();
        if history.len() <= center {
            self.masks.set_passthrough();
            self.ready = false;
            return false;
        }

        let bins = self.masks.harmonic.len().min(history.bins());
        let row = history.magnitude(center);

        for bin in 0..bins {
            for (age, slot) in self.time_scratch.iter_mut().enumerate() {
                *slot = history.magnitude_padded(age, bin);
            }
            let h = median_in_place(&mut self.time_scratch);
            let p = neighbourhood_median(row, bin, self.kernel, &mut self.freq_scratch);

            let denom = h + p + MAG_EPS;
            self.masks.harmonic[bin] = h / denom;
            self.masks.percussive[bin] = p / denom;
        }

        self.ready = true;
        true
    }

    pub fn reset(&mut self) {
        self.masks.set_passthrough();
        self.ready = false;
    }
}
