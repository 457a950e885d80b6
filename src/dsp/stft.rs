//! STFT Stem Engine (analysis, separation, overlap-add synthesis)
//!
//! # Schedule
//! Per input sample:
//! 1. Write the sample into each channel's input ring.
//! 2. Read (and zero) one sample from every stem output ring.
//! 3. Every `hop` samples: take the latest `frame_len` samples oldest first,
//!    window, forward transform, compute masks, and for each stem inverse
//!    transform, window again, and overlap-add into its output rings starting at
//!    the read cursor.
//!
//! Synthesis divides out the squared-window overlap gain, so the four stems sum
//! to the input delayed by `frame_len` samples. In HPSS mode the resynthesised
//! frame is the classified one, `depth / 2` hops older than the newest.
//!
//! # Channels
//! Analysis is always stereo. A single input is analysed as a centred signal
//! (right = left). Output channels beyond the supplied inputs stay silent.

use crate::backend::ComputeBackend;
use crate::config::{PercussionMode, SeparatorConfig};
use crate::dsp::history::SpectrogramHistory;
use crate::dsp::hpss::{HpssClassifier, HpssMasks};
use crate::dsp::masks::{apply_mask, MaskComputer, StemMasks};
use crate::dsp::ring::SampleRing;
use crate::dsp::window::WindowTable;
use crate::params::SeparationParams;
use crate::stem::{Stem, StemBuffers};
use rustfft::num_complex::Complex;

// Analysis channels (left, right).
const ANALYSIS_CHANNELS: usize = 2;

struct HpssState {
    history: SpectrogramHistory,
    classifier: HpssClassifier,
}

pub struct StftEngine {
    frame_len: usize,
    hop_len: usize,
    window: WindowTable,
    // 1 / overlap-add gain.
    synth_scale: f32,

    input: [SampleRing; ANALYSIS_CHANNELS],
    // [stem * ANALYSIS_CHANNELS + ch]
    output: Vec<SampleRing>,
    hop_pos: usize,

    frame_l: Vec<f32>,
    frame_r: Vec<f32>,
    spec_l: Vec<Complex<f32>>,
    spec_r: Vec<Complex<f32>>,
    stem_spec_l: Vec<Complex<f32>>,
    stem_spec_r: Vec<Complex<f32>>,

    masks: MaskComputer,
    hpss: Option<HpssState>,
}

impl StftEngine {
    pub fn new(config: &SeparatorConfig, sample_rate: f32) -> Self {
        let n = config.frame_len;
        let bins = config.bins();
        let window = WindowTable::hann(n);
        let ola_gain = window.overlap_add_gain(config.hop_len);

        let hpss = match config.percussion {
            PercussionMode::Transient => None,
            PercussionMode::Hpss => Some(HpssState {
                history: SpectrogramHistory::new(config.history_depth, bins),
                classifier: HpssClassifier::new(config.history_depth, config.freq_kernel, bins),
            }),
        };

        let zero = Complex::new(0.0, 0.0);
        Self {
            frame_len: n,
            hop_len: config.hop_len,
            window,
            synth_scale: 1.0 / ola_gain,
            input: [SampleRing::new(n), SampleRing::new(n)],
            output: (0..Stem::COUNT * ANALYSIS_CHANNELS)
                .map(|_| SampleRing::new(n))
                .collect(),
            hop_pos: 0,
            frame_l: vec![0.0; n],
            frame_r: vec![0.0; n],
            spec_l: vec![zero; bins],
            spec_r: vec![zero; bins],
            stem_spec_l: vec![zero; bins],
            stem_spec_r: vec![zero; bins],
            masks: MaskComputer::new(n, sample_rate),
            hpss,
        }
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    pub fn hop_len(&self) -> usize {
        self.hop_len
    }

    /// Masks of the most recent separated frame.
    pub fn masks(&self) -> &StemMasks {
        self.masks.masks()
    }

    /// Harmonic/percussive masks, in HPSS mode.
    pub fn hpss_masks(&self) -> Option<&HpssMasks> {
        self.hpss.as_ref().map(|h| h.classifier.masks())
    }

    /// Whether the HPSS classifier has left warm-up.
    pub fn hpss_ready(&self) -> bool {
        self.hpss.as_ref().is_some_and(|h| h.classifier.is_ready())
    }

    /// Runs `n` samples through the engine, writing stems into `out`.
    ///
    /// `out` must already be sized for `n` samples (see `StemBuffers::begin_block`).
    /// Output channel `ch` is written only when an input exists for it.
    pub fn process(
        &mut self,
        inputs: &[&[f32]],
        n: usize,
        out: &mut StemBuffers,
        backend: &mut dyn ComputeBackend,
        params: &SeparationParams,
    ) {
        debug_assert!(inputs.iter().all(|x| x.len() >= n));
        let mapped = inputs.len().min(out.num_channels()).min(ANALYSIS_CHANNELS);

        for i in 0..n {
            let l = inputs.first().map_or(0.0, |x| x[i]);
            let r = match inputs.get(1) {
                Some(x) => x[i],
                None => l,
            };
            self.input[0].push(l);
            self.input[1].push(r);

            for stem in Stem::ALL {
                for ch in 0..ANALYSIS_CHANNELS {
                    let v = self.output[stem.index() * ANALYSIS_CHANNELS + ch].pop_clear();
                    if ch < mapped {
                        out.channel_mut(stem, ch)[i] = v;
                    }
                }
            }

            self.hop_pos += 1;
            if self.hop_pos == self.hop_len {
                self.hop_pos = 0;
                self.process_frame(backend, params);
            }
        }
    }

    fn process_frame(&mut self, backend: &mut dyn ComputeBackend, params: &SeparationParams) {
        let window = self.window.gains();

        // 1. Window + forward
        self.input[0].copy_latest(&mut self.frame_l);
        self.input[1].copy_latest(&mut self.frame_r);
        for ((l, r), w) in self.frame_l.iter_mut().zip(&mut self.frame_r).zip(window) {
            *l *= w;
            *r *= w;
        }
        backend.forward_batch(
            &self.frame_l,
            &self.frame_r,
            &mut self.spec_l,
            &mut self.spec_r,
        );

        // 2. Masks (on the classified frame in HPSS mode)
        let snapshot = params.snapshot();
        let (src_l, src_r): (&[Complex<f32>], &[Complex<f32>]) = match self.hpss.as_mut() {
            None => {
                self.masks
                    .compute(&self.spec_l, &self.spec_r, &snapshot, None);
                (self.spec_l.as_slice(), self.spec_r.as_slice())
            }
            Some(state) => {
                state.history.push(&self.spec_l, &self.spec_r);
                if !state.classifier.classify(&state.history) {
                    // Classified frame predates the stream: nothing to add.
                    return;
                }
                let (l, r) = state.history.spectra(state.classifier.center_age());
                self.masks.compute(
                    l,
                    r,
                    &snapshot,
                    Some(state.classifier.masks().percussive.as_slice()),
                );
                (l, r)
            }
        };

        // 3. Per stem: mask, inverse, window, overlap-add
        for stem in Stem::ALL {
            apply_mask(
                self.masks.masks().get(stem.index()),
                src_l,
                src_r,
                &mut self.stem_spec_l,
                &mut self.stem_spec_r,
            );
            backend.inverse_batch(
                &self.stem_spec_l,
                &self.stem_spec_r,
                &mut self.frame_l,
                &mut self.frame_r,
            );
            for ((l, r), w) in self.frame_l.iter_mut().zip(&mut self.frame_r).zip(window) {
                *l *= w;
                *r *= w;
            }
            let base = stem.index() * ANALYSIS_CHANNELS;
            self.output[base].overlap_add(&self.frame_l, self.synth_scale);
            self.output[base + 1].overlap_add(&self.frame_r, self.synth_scale);
        }
    }

    /// Zeroes rings, cursors, detector state and history.
    pub fn reset(&mut self) {
        for ring in self.input.iter_mut().chain(self.output.iter_mut()) {
            ring.clear();
        }
        self.hop_pos = 0;
        self.frame_l.fill(0.0);
        self.frame_r.fill(0.0);
        self.masks.reset();
        if let Some(state) = self.hpss.as_mut() {
            state.history.clear();
            state.classifier.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuFftBackend;

    fn config(frame_len: usize) -> SeparatorConfig {
        SeparatorConfig {
            frame_len,
            hop_len: frame_len / 4,
            ..Default::default()
        }
    }

    fn signal(len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| {
                let t = i as f32;
                0.4 * (t * 0.031).sin() + 0.2 * (t * 0.27).sin() + 0.1 * (t * 1.3).cos()
            })
            .collect()
    }

    fn sum_stems(out: &StemBuffers, ch: usize) -> Vec<f32> {
        let mut sum = vec![0.0; out.len()];
        for stem in Stem::ALL {
            for (s, v) in sum.iter_mut().zip(out.channel(stem, ch)) {
                *s += v;
            }
        }
        sum
    }

    #[test]
    fn test_stems_sum_to_delayed_input() {
        let n = 256;
        let cfg = config(n);
        let mut engine = StftEngine::new(&cfg, 44100.0);
        let mut backend = CpuFftBackend::try_new(n).unwrap();
        let params = SeparationParams::new();

        let len = 4096;
        let left = signal(len);
        let right: Vec<f32> = left.iter().map(|v| v * -0.5).collect();
        let mut out = StemBuffers::new(2, len);
        out.begin_block(len);
        engine.process(&[&left[..], &right[..]], len, &mut out, &mut backend, &params);

        let sum_l = sum_stems(&out, 0);
        let sum_r = sum_stems(&out, 1);
        for t in n..len {
            assert!((sum_l[t] - left[t - n]).abs() < 1e-4, "L sample {t}");
            assert!((sum_r[t] - right[t - n]).abs() < 1e-4, "R sample {t}");
        }
        // Nothing leaks out before the latency has elapsed.
        assert!(sum_l[..n].iter().all(|v| v.abs() < 1e-5));
    }

    #[test]
    fn test_mono_input_leaves_second_channel_silent() {
        let n = 256;
        let mut engine = StftEngine::new(&config(n), 44100.0);
        let mut backend = CpuFftBackend::try_new(n).unwrap();
        let params = SeparationParams::new();

        let len = 2048;
        let mono = signal(len);
        let mut out = StemBuffers::new(2, len);
        out.begin_block(len);
        engine.process(&[&mono[..]], len, &mut out, &mut backend, &params);

        let sum = sum_stems(&out, 0);
        for t in n..len {
            assert!((sum[t] - mono[t - n]).abs() < 1e-4);
        }
        for stem in Stem::ALL {
            assert!(out.channel(stem, 1).iter().all(|&v| v == 0.0));
        }
    }

    #[test]
    fn test_hpss_adds_classification_delay() {
        let n = 256;
        let cfg = SeparatorConfig {
            percussion: PercussionMode::Hpss,
            history_depth: 5,
            freq_kernel: 5,
            ..config(n)
        };
        let latency = cfg.latency_samples();
        assert_eq!(latency, n + 2 * (n / 4));

        let mut engine = StftEngine::new(&cfg, 44100.0);
        let mut backend = CpuFftBackend::try_new(n).unwrap();
        let params = SeparationParams::new();

        let len = 4096;
        let x = signal(len);
        let mut out = StemBuffers::new(2, len);
        out.begin_block(len);
        engine.process(&[&x[..], &x[..]], len, &mut out, &mut backend, &params);

        assert!(engine.hpss_ready());
        let sum = sum_stems(&out, 0);
        for t in latency..len {
            assert!((sum[t] - x[t - latency]).abs() < 1e-4, "sample {t}");
        }
    }
}
