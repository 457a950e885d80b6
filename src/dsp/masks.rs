//! Heuristic Stem Masks
//!
//! Per-bin gain masks for four stems from one stereo spectral frame:
//!
//! 1. **Bass**: low-pass ramp in bin index. Full gain up to the cutoff bin, linear
//!    fall to zero over one more cutoff width.
//! 2. **Vocals**: centre-panned energy inside the vocal band, blended toward a
//!    flat 0.5 by the focus knob, emphasised in the presence band.
//! 3. **Drums**: onset ratio of `|L| + |R|` against a smoothed previous frame
//!    (or the HPSS percussive mask), emphasised in kick and cymbal bands.
//! 4. **Other**: residual.
//!
//! # Conservation
//! Bass, vocals and drums are rescaled together when they exceed 1, and other
//! takes the remainder, so every bin sums to exactly 1. Masks multiply the raw
//! L/R spectra, so the four stems sum back to the input spectrum.

use crate::dsp::utils::{bin_to_hz, hz_to_bin, in_band, lerp, MAG_EPS};
use crate::params::ParamSnapshot;
use rustfft::num_complex::Complex;

// Constants: tunable unless marked otherwise.

// Vocal band (Hz).
const VOCAL_LOW_HZ: f32 = 100.0;
const VOCAL_HIGH_HZ: f32 = 8000.0;
// Presence band and its boost.
const VOCAL_PRESENCE_LOW_HZ: f32 = 300.0;
const VOCAL_PRESENCE_HIGH_HZ: f32 = 3500.0;
const VOCAL_PRESENCE_BOOST: f32 = 1.3;
// Vocal gain at zero focus.
const VOCAL_FLAT_GAIN: f32 = 0.5;

// Kick band (Hz).
const DRUM_KICK_LOW_HZ: f32 = 50.0;
const DRUM_KICK_HIGH_HZ: f32 = 400.0;
// Snare/cymbal transient band (Hz).
const DRUM_CYMBAL_LOW_HZ: f32 = 4000.0;
const DRUM_CYMBAL_HIGH_HZ: f32 = 12000.0;
const DRUM_BAND_BOOST: f32 = 1.2;

// prev <- PREV_CUR_WEIGHT * cur + (1 - PREV_CUR_WEIGHT) * prev
const PREV_CUR_WEIGHT: f32 = 0.9;
// Below this `|L| + |R|` the onset ratio is forced to zero.
const ONSET_SILENCE_FLOOR: f32 = 1e-7;

/// Four per-bin masks, each of `bins` gains in [0, 1].
#[derive(Debug, Clone)]
pub struct StemMasks {
    pub vocals: Vec<f32>,
    pub drums: Vec<f32>,
    pub bass: Vec<f32>,
    pub other: Vec<f32>,
}

impl StemMasks {
    pub fn new(bins: usize) -> Self {
        Self {
            vocals: vec![0.0; bins],
            drums: vec![0.0; bins],
            bass: vec![0.0; bins],
            other: vec![1.0; bins],
        }
    }

    pub fn bins(&self) -> usize {
        self.other.len()
    }

    /// Mask for stem index `0..4` in `Stem::ALL` order.
    pub fn get(&self, stem: usize) -> &[f32] {
        match stem {
            0 => &self.vocals,
            1 => &self.drums,
            2 => &self.bass,
            _ => &self.other,
        }
    }

    pub fn clear(&mut self) {
        self.vocals.fill(0.0);
        self.drums.fill(0.0);
        self.bass.fill(0.0);
        self.other.fill(1.0);
    }
}

/// Bass ramp gain for `bin` with the cutoff at fractional bin `cutoff_bin`.
#[inline]
pub fn bass_gain(bin: usize, cutoff_bin: f32) -> f32 {
    if cutoff_bin <= 0.0 {
        return 0.0;
    }
    let b = bin as f32;
    if b <= cutoff_bin {
        1.0
    } else if b < 2.0 * cutoff_bin {
        1.0 - (b - cutoff_bin) / cutoff_bin
    } else {
        0.0
    }
}

pub struct MaskComputer {
    frame_len: usize,
    sample_rate: f32,
    prev_mag: Vec<f32>,
    masks: StemMasks,
}

impl MaskComputer {
    pub fn new(frame_len: usize, sample_rate: f32) -> Self {
        let bins = frame_len / 2 + 1;
        Self {
            frame_len,
            sample_rate,
            prev_mag: vec![0.0; bins],
            masks: StemMasks::new(bins),
        }
    }

    pub fn masks(&self) -> &StemMasks {
        &self.masks
    }

    /// Computes all four masks for one frame.
    ///
    /// With `percussive = Some(..)` the drums raw gain comes from that mask and
    /// the onset detector state is left untouched.
    pub fn compute(
        &mut self,
        left: &[Complex<f32>],
        right: &[Complex<f32>],
        params: &ParamSnapshot,
        percussive: Option<&[f32]>,
    ) {
        let bins = self.masks.bins();
        debug_assert_eq!(left.len(), bins);
        debug_assert_eq!(right.len(), bins);

        let cutoff_bin = hz_to_bin(params.bass_cutoff_hz, self.frame_len, self.sample_rate);
        let focus = params.vocals_focus.clamp(0.0, 1.0);
        let sensitivity = params.drum_sensitivity.clamp(0.0, 1.0);

        for bin in 0..bins {
            let l = left[bin];
            let r = right[bin];
            let freq = bin_to_hz(bin, self.frame_len, self.sample_rate);

            // Bass
            let bass = bass_gain(bin, cutoff_bin);

            // Vocals
            let mut vocals = 0.0;
            if in_band(freq, VOCAL_LOW_HZ, VOCAL_HIGH_HZ) {
                let mid = ((l + r) * 0.5).norm();
                let side = ((l - r) * 0.5).norm();
                let center = mid / (mid + side + MAG_EPS);
                vocals = lerp(VOCAL_FLAT_GAIN, center, focus);
                if in_band(freq, VOCAL_PRESENCE_LOW_HZ, VOCAL_PRESENCE_HIGH_HZ) {
                    vocals *= VOCAL_PRESENCE_BOOST;
                }
                vocals = vocals.min(1.0) * (1.0 - bass);
            }

            // Drums
            let raw = match percussive {
                Some(p) => p[bin],
                None => {
                    let cur = l.norm() + r.norm();
                    let prev = self.prev_mag[bin];
                    let ratio = if cur < ONSET_SILENCE_FLOOR {
                        0.0
                    } else {
                        (cur - prev).max(0.0) / (cur + MAG_EPS)
                    };
                    self.prev_mag[bin] = PREV_CUR_WEIGHT * cur + (1.0 - PREV_CUR_WEIGHT) * prev;
                    ratio
                }
            };
            let mut drums = raw * sensitivity;
            if in_band(freq, DRUM_KICK_LOW_HZ, DRUM_KICK_HIGH_HZ)
                || in_band(freq, DRUM_CYMBAL_LOW_HZ, DRUM_CYMBAL_HIGH_HZ)
            {
                drums *= DRUM_BAND_BOOST;
            }
            drums = drums.min(1.0) * (1.0 - bass - vocals).max(0.0);

            // Normalize
            let mut total = bass + vocals + drums;
            let (mut b, mut v, mut d) = (bass, vocals, drums);
            if total > 1.0 {
                let scale = 1.0 / total;
                b *= scale;
                v *= scale;
                d *= scale;
                total = 1.0;
            }

            self.masks.bass[bin] = b;
            self.masks.vocals[bin] = v;
            self.masks.drums[bin] = d;
            self.masks.other[bin] = (1.0 - total).max(0.0);
        }
    }

    pub fn reset(&mut self) {
        self.prev_mag.fill(0.0);
        self.masks.clear();
    }
}

/// Writes `mask * spectrum` for both channels.
#[inline]
pub fn apply_mask(
    mask: &[f32],
    left: &[Complex<f32>],
    right: &[Complex<f32>],
    out_l: &mut [Complex<f32>],
    out_r: &mut [Complex<f32>],
) {
    debug_assert_eq!(mask.len(), left.len());
    for (((g, l), r), (ol, or)) in mask
        .iter()
        .zip(left)
        .zip(right)
        .zip(out_l.iter_mut().zip(out_r.iter_mut()))
    {
        *ol = *l * *g;
        *or = *r * *g;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const N: usize = 2048;
    const SR: f32 = 44100.0;
    const BINS: usize = N / 2 + 1;

    fn spectrum(f: impl Fn(usize) -> Complex<f32>) -> Vec<Complex<f32>> {
        (0..BINS).map(f).collect()
    }

    fn assert_conserved(m: &StemMasks) {
        for bin in 0..m.bins() {
            let parts = [m.vocals[bin], m.drums[bin], m.bass[bin], m.other[bin]];
            for &p in &parts {
                assert!((0.0..=1.0).contains(&p), "bin {bin}: {parts:?}");
            }
            let sum: f32 = parts.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5, "bin {bin}: sum {sum}");
        }
    }

    #[test]
    fn test_bass_ramp() {
        let c = 10.0;
        assert_eq!(bass_gain(0, c), 1.0);
        assert_eq!(bass_gain(10, c), 1.0);
        assert!((bass_gain(15, c) - 0.5).abs() < 1e-6);
        assert_eq!(bass_gain(20, c), 0.0);
        assert_eq!(bass_gain(3, 0.0), 0.0);
    }

    #[test]
    fn test_conservation_on_varied_frames() {
        let mut mc = MaskComputer::new(N, SR);
        let params = ParamSnapshot {
            bass_cutoff_hz: 150.0,
            vocals_focus: 1.0,
            drum_sensitivity: 1.0,
        };
        for k in 0..6 {
            let l = spectrum(|b| Complex::new(((b * 13 + k * 7) % 17) as f32, (b % 5) as f32));
            let r = spectrum(|b| Complex::new(((b * 3 + k) % 11) as f32 * 0.5, -((b % 3) as f32)));
            mc.compute(&l, &r, &params, None);
            assert_conserved(mc.masks());
        }
    }

    #[test]
    fn test_silence_is_finite() {
        let mut mc = MaskComputer::new(N, SR);
        let zero = spectrum(|_| Complex::new(0.0, 0.0));
        mc.compute(&zero, &zero, &ParamSnapshot::default(), None);
        let m = mc.masks();
        assert!(m.drums.iter().all(|&d| d == 0.0));
        assert_conserved(m);
    }

    #[test]
    fn test_centered_vocal_band() {
        let mut mc = MaskComputer::new(N, SR);
        let params = ParamSnapshot {
            vocals_focus: 1.0,
            drum_sensitivity: 0.0,
            ..ParamSnapshot::default()
        };
        let x = spectrum(|_| Complex::new(1.0, 0.0));
        mc.compute(&x, &x, &params, None);
        let m = mc.masks();
        // 1 kHz sits in the presence band: centred content saturates at 1.
        let bin_1k = hz_to_bin(1000.0, N, SR).round() as usize;
        assert!(m.vocals[bin_1k] > 0.99);
        // 10 kHz is outside the vocal band.
        let bin_10k = hz_to_bin(10_000.0, N, SR).round() as usize;
        assert_eq!(m.vocals[bin_10k], 0.0);
        assert!(m.other[bin_10k] > 0.99);
    }

    #[test]
    fn test_side_only_gets_flat_vocal_gain_at_zero_focus() {
        let mut mc = MaskComputer::new(N, SR);
        let params = ParamSnapshot {
            vocals_focus: 0.0,
            drum_sensitivity: 0.0,
            ..ParamSnapshot::default()
        };
        let l = spectrum(|_| Complex::new(1.0, 0.0));
        let r = spectrum(|_| Complex::new(-1.0, 0.0));
        mc.compute(&l, &r, &params, None);
        let bin = hz_to_bin(5000.0, N, SR).round() as usize;
        assert!((mc.masks().vocals[bin] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_onset_then_decay() {
        let mut mc = MaskComputer::new(N, SR);
        let params = ParamSnapshot {
            drum_sensitivity: 1.0,
            ..ParamSnapshot::default()
        };
        let bin = hz_to_bin(6000.0, N, SR).round() as usize;
        let x = spectrum(|_| Complex::new(1.0, 0.0));
        let zero = spectrum(|_| Complex::new(0.0, 0.0));

        mc.compute(&x, &zero, &params, None);
        let onset = mc.masks().drums[bin];
        assert!(onset > 0.4, "onset {onset}");

        // Steady level: prev has nearly caught up.
        mc.compute(&x, &zero, &params, None);
        assert!(mc.masks().drums[bin] < 0.15);
    }

    #[test]
    fn test_percussive_override() {
        let mut mc = MaskComputer::new(N, SR);
        let params = ParamSnapshot {
            drum_sensitivity: 1.0,
            ..ParamSnapshot::default()
        };
        let x = spectrum(|_| Complex::new(1.0, 0.0));
        let perc = vec![0.0; BINS];
        mc.compute(&x, &x, &params, Some(&perc));
        assert!(mc.masks().drums.iter().all(|&d| d == 0.0));
        assert_conserved(mc.masks());
    }

    #[test]
    fn test_apply_mask_sums_to_input() {
        let mut mc = MaskComputer::new(N, SR);
        let l = spectrum(|b| Complex::new(b as f32 * 0.01, 1.0));
        let r = spectrum(|b| Complex::new(0.3, -(b as f32) * 0.02));
        mc.compute(&l, &r, &ParamSnapshot::default(), None);

        let mut sum_l = vec![Complex::new(0.0, 0.0); BINS];
        let mut sum_r = vec![Complex::new(0.0, 0.0); BINS];
        let mut out_l = vec![Complex::new(0.0, 0.0); BINS];
        let mut out_r = vec![Complex::new(0.0, 0.0); BINS];
        for stem in 0..4 {
            apply_mask(mc.masks().get(stem), &l, &r, &mut out_l, &mut out_r);
            for b in 0..BINS {
                sum_l[b] += out_l[b];
                sum_r[b] += out_r[b];
            }
        }
        for b in 0..BINS {
            assert!((sum_l[b] - l[b]).norm() < 1e-4);
            assert!((sum_r[b] - r[b]).norm() < 1e-4);
        }
    }
}
