//! Host-facing stem separator.
//!
//! # Lifecycle
//! - `new`: validates the configuration, nothing is allocated for audio yet.
//! - `prepare`: selects the transform backend and allocates every buffer.
//! - `process_block`: real-time path, no allocation (CPU backend).
//! - `reset`: returns to the freshly prepared state without reallocating.
//!
//! Knobs, meters and the monitor mixer live behind `Arc`s so a control thread
//! can hold them while the audio thread owns the separator.

use crate::backend::{BackendHandle, ComputeBackend};
use crate::config::{ConfigError, SeparatorConfig};
use crate::debug;
use crate::dsp::hpss::HpssMasks;
use crate::dsp::masks::StemMasks;
use crate::dsp::stft::StftEngine;
use crate::dsp::utils::peak_abs;
use crate::meters::StemMeters;
use crate::mixer::StemMixer;
use crate::params::SeparationParams;
use crate::sep_log;
use crate::stem::{Stem, StemBuffers};
use log::{info, warn};
use std::sync::Arc;

// Used when the host reports a nonsensical rate.
const FALLBACK_SAMPLE_RATE: f32 = 44100.0;

struct Prepared {
    sample_rate: f32,
    max_block: usize,
    backend: BackendHandle,
    engine: StftEngine,
    stems: StemBuffers,
}

pub struct StemSeparator {
    config: SeparatorConfig,
    params: Arc<SeparationParams>,
    meters: Arc<StemMeters>,
    mixer: Arc<StemMixer>,
    prepared: Option<Prepared>,
    // Lent out by `process_block` before `prepare`.
    idle_stems: StemBuffers,
}

impl StemSeparator {
    pub fn new(config: SeparatorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let params = Arc::new(SeparationParams::from_snapshot(config.params));
        let idle_stems = StemBuffers::new(config.channels, 0);
        Ok(Self {
            config,
            params,
            meters: Arc::new(StemMeters::new()),
            mixer: Arc::new(StemMixer::new()),
            prepared: None,
            idle_stems,
        })
    }

    pub fn config(&self) -> &SeparatorConfig {
        &self.config
    }

    /// Selects the backend named by the configuration and allocates all state.
    pub fn prepare(&mut self, sample_rate: f32, max_block: usize) {
        let backend = BackendHandle::select(self.config.backend, self.config.frame_len);
        self.prepare_inner(sample_rate, max_block, backend);
    }

    /// Like `prepare`, but tries `backend` first. A backend that fails to
    /// initialize is replaced by the CPU transform.
    pub fn prepare_with_backend(
        &mut self,
        sample_rate: f32,
        max_block: usize,
        backend: Box<dyn ComputeBackend>,
    ) {
        let backend = BackendHandle::with_backend(backend, self.config.frame_len);
        self.prepare_inner(sample_rate, max_block, backend);
    }

    fn prepare_inner(&mut self, sample_rate: f32, max_block: usize, backend: BackendHandle) {
        debug::init();

        let sample_rate = if sample_rate.is_finite() && sample_rate > 0.0 {
            sample_rate
        } else {
            warn!(
                "Invalid sample rate {}, using {}",
                sample_rate, FALLBACK_SAMPLE_RATE
            );
            FALLBACK_SAMPLE_RATE
        };

        info!(
            "Preparing separator: sr={} max_block={} N={} hop={} mode={:?} backend={}",
            sample_rate,
            max_block,
            self.config.frame_len,
            self.config.hop_len,
            self.config.percussion,
            backend.description()
        );

        self.prepared = Some(Prepared {
            sample_rate,
            max_block,
            engine: StftEngine::new(&self.config, sample_rate),
            stems: StemBuffers::new(self.config.channels, max_block),
            backend,
        });
        self.meters.reset();
        debug::drain();
    }

    /// Zeroes rings, history and detector state. Output after `reset` matches a
    /// fresh `prepare` sample for sample.
    pub fn reset(&mut self) {
        if let Some(p) = self.prepared.as_mut() {
            p.engine.reset();
            p.stems.clear();
        }
        self.meters.reset();
        debug::drain();
    }

    /// Separates one block. Every input channel must hold the same number of
    /// samples; the shortest one sets the block length, capped at `max_block`.
    ///
    /// Before `prepare` an empty set is returned.
    pub fn process_block(&mut self, inputs: &[&[f32]]) -> &StemBuffers {
        let Some(p) = self.prepared.as_mut() else {
            return &self.idle_stems;
        };

        let mut n = inputs.iter().map(|x| x.len()).min().unwrap_or(0);
        if n > p.max_block {
            sep_log!("block of {} samples truncated to {}", n, p.max_block);
            n = p.max_block;
        }
        if inputs.len() != self.config.channels {
            sep_log!(
                "got {} input channels, configured for {}",
                inputs.len(),
                self.config.channels
            );
        }

        p.stems.begin_block(n);
        p.engine.process(
            inputs,
            n,
            &mut p.stems,
            p.backend.backend_mut(),
            &self.params,
        );

        let input_peak = inputs
            .iter()
            .map(|x| peak_abs(&x[..n]))
            .fold(0.0f32, f32::max);
        self.meters.set_input_peak(input_peak);
        for stem in Stem::ALL {
            let peak = (0..p.stems.num_channels())
                .map(|ch| peak_abs(p.stems.channel(stem, ch)))
                .fold(0.0f32, f32::max);
            self.meters.set_stem_peak(stem, peak);
        }

        &p.stems
    }

    pub fn set_bass_cutoff(&self, hz: f32) {
        self.params.set_bass_cutoff(hz);
    }

    pub fn set_vocals_focus(&self, focus: f32) {
        self.params.set_vocals_focus(focus);
    }

    pub fn set_drum_sensitivity(&self, sensitivity: f32) {
        self.params.set_drum_sensitivity(sensitivity);
    }

    /// Shared knobs, for a control thread.
    pub fn params(&self) -> Arc<SeparationParams> {
        Arc::clone(&self.params)
    }

    pub fn meters(&self) -> Arc<StemMeters> {
        Arc::clone(&self.meters)
    }

    pub fn mixer(&self) -> Arc<StemMixer> {
        Arc::clone(&self.mixer)
    }

    pub fn is_using_accelerated_backend(&self) -> bool {
        self.prepared
            .as_ref()
            .is_some_and(|p| p.backend.is_accelerated())
    }

    /// Reflects a backend fault after prepare. Allocates; control thread only.
    pub fn backend_description(&self) -> String {
        self.prepared
            .as_ref()
            .map_or_else(|| "Not prepared".to_string(), |p| p.backend.description())
    }

    /// Delay from input to stems, for host latency compensation.
    pub fn latency_samples(&self) -> usize {
        self.config.latency_samples()
    }

    pub fn sample_rate(&self) -> Option<f32> {
        self.prepared.as_ref().map(|p| p.sample_rate)
    }

    /// Masks of the last separated frame, for visualisation.
    pub fn masks(&self) -> Option<&StemMasks> {
        self.prepared.as_ref().map(|p| p.engine.masks())
    }

    pub fn hpss_masks(&self) -> Option<&HpssMasks> {
        self.prepared.as_ref().and_then(|p| p.engine.hpss_masks())
    }

    pub fn hpss_ready(&self) -> bool {
        self.prepared.as_ref().is_some_and(|p| p.engine.hpss_ready())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendPreference, FailingBackend, FaultingBackend};
    use crate::config::PercussionMode;
    use crate::dsp::utils::hz_to_bin;
    use std::f32::consts::PI;

    const SR: f32 = 44100.0;

    fn cpu_config() -> SeparatorConfig {
        SeparatorConfig {
            backend: BackendPreference::Cpu,
            ..Default::default()
        }
    }

    fn prepared(config: SeparatorConfig, max_block: usize) -> StemSeparator {
        let mut sep = StemSeparator::new(config).unwrap();
        sep.prepare(SR, max_block);
        sep
    }

    // Deterministic broadband test material: two tones plus LCG noise.
    fn test_signal(len: usize, seed: u32) -> (Vec<f32>, Vec<f32>) {
        let mut state = seed;
        let mut noise = move || {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 8) as f32 / (1u32 << 24) as f32 - 0.5
        };
        let mut l = Vec::with_capacity(len);
        let mut r = Vec::with_capacity(len);
        for i in 0..len {
            let t = i as f32 / SR;
            let tone = 0.3 * (2.0 * PI * 220.0 * t).sin();
            let hat = 0.2 * (2.0 * PI * 5000.0 * t).sin();
            l.push(tone + hat + 0.1 * noise());
            r.push(tone - hat + 0.1 * noise());
        }
        (l, r)
    }

    /// Runs `input` through in `block` sized pieces, collecting every stem.
    fn run(sep: &mut StemSeparator, l: &[f32], r: &[f32], block: usize) -> Vec<[Vec<f32>; 2]> {
        let mut out: Vec<[Vec<f32>; 2]> = (0..Stem::COUNT).map(|_| [Vec::new(), Vec::new()]).collect();
        for (bl, br) in l.chunks(block).zip(r.chunks(block)) {
            let stems = sep.process_block(&[bl, br]);
            for stem in Stem::ALL {
                for ch in 0..2 {
                    out[stem.index()][ch].extend_from_slice(stems.channel(stem, ch));
                }
            }
        }
        out
    }

    fn energy(x: &[f32]) -> f64 {
        x.iter().map(|&v| (v as f64) * (v as f64)).sum()
    }

    #[test]
    fn test_reconstruction_below_minus_60_db() {
        let mut sep = prepared(cpu_config(), 512);
        let latency = sep.latency_samples();
        let (l, r) = test_signal(SR as usize / 2, 1);
        let out = run(&mut sep, &l, &r, 512);

        for (ch, input) in [&l, &r].into_iter().enumerate() {
            let mut err = 0.0f64;
            let mut sig = 0.0f64;
            for t in latency..input.len() {
                let sum: f32 = (0..Stem::COUNT).map(|s| out[s][ch][t]).sum();
                let d = (sum - input[t - latency]) as f64;
                err += d * d;
                sig += (input[t - latency] as f64).powi(2);
            }
            let db = 10.0 * (err / sig).log10();
            assert!(db < -60.0, "channel {ch}: {db} dB");
        }
    }

    #[test]
    fn test_mask_conservation_in_engine() {
        let mut sep = prepared(cpu_config(), 512);
        let (l, r) = test_signal(8192, 7);
        for (bl, br) in l.chunks(512).zip(r.chunks(512)) {
            sep.process_block(&[bl, br]);
            let m = sep.masks().unwrap();
            for bin in 0..m.bins() {
                let parts = [m.vocals[bin], m.drums[bin], m.bass[bin], m.other[bin]];
                assert!(parts.iter().all(|p| (0.0..=1.0).contains(p)));
                let sum: f32 = parts.iter().sum();
                assert!((sum - 1.0).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_reset_is_bit_identical() {
        let mut sep = prepared(cpu_config(), 1024);
        let (l, r) = test_signal(16384, 3);
        let first = run(&mut sep, &l, &r, 700);
        sep.reset();
        let second = run(&mut sep, &l, &r, 700);
        for stem in 0..Stem::COUNT {
            for ch in 0..2 {
                let a = &first[stem][ch];
                let b = &second[stem][ch];
                assert!(a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits()));
            }
        }
    }

    #[test]
    fn test_bass_isolation() {
        let mut sep = prepared(cpu_config(), 512);
        let len = SR as usize;
        let tone: Vec<f32> = (0..len)
            .map(|i| 0.5 * (2.0 * PI * 80.0 * i as f32 / SR).sin())
            .collect();
        let out = run(&mut sep, &tone, &tone, 512);

        // Skip the latency and the onset frames.
        let start = sep.latency_samples() + 2 * 2048;
        let e = |s: Stem| energy(&out[s.index()][0][start..]) + energy(&out[s.index()][1][start..]);
        let total: f64 = Stem::ALL.iter().map(|&s| e(s)).sum();
        assert!(e(Stem::Bass) / total >= 0.9, "bass share {}", e(Stem::Bass) / total);
        assert!((e(Stem::Vocals) + e(Stem::Drums)) / total < 0.05);
    }

    #[test]
    fn test_drum_mask_spikes_on_impulse() {
        let mut sep = prepared(cpu_config(), 512);
        sep.set_drum_sensitivity(0.5);
        let bin = hz_to_bin(10_000.0, 2048, SR).round() as usize;

        let len = 512 * 20;
        let mut x = vec![0.0f32; len];
        x[5220] = 1.0;
        let mut drums = Vec::new();
        // Blocks of one hop: one frame per call.
        for block in x.chunks(512) {
            sep.process_block(&[block, block]);
            drums.push(sep.masks().unwrap().drums[bin]);
        }

        // Frames before the impulse see silence.
        assert!(drums[..10].iter().all(|&d| d == 0.0));
        let spike = drums[10..13].iter().cloned().fold(0.0f32, f32::max);
        assert!(spike > 0.3, "spike {spike}");
        // Near zero within three frames of the onset.
        assert!(drums[13..].iter().all(|&d| d < 0.05), "{drums:?}");
    }

    #[test]
    fn test_block_size_independence() {
        let (l, r) = test_signal(4096 * 3, 11);

        let mut a = prepared(cpu_config(), 4096);
        let one = run(&mut a, &l, &r, 4096);
        let mut b = prepared(cpu_config(), 4096);
        let two = run(&mut b, &l, &r, 2048);

        for stem in 0..Stem::COUNT {
            for ch in 0..2 {
                for (x, y) in one[stem][ch].iter().zip(&two[stem][ch]) {
                    assert!((x - y).abs() < 1e-6);
                }
            }
        }
    }

    #[test]
    fn test_reset_is_bit_identical_in_hpss_mode() {
        let config = SeparatorConfig {
            percussion: PercussionMode::Hpss,
            ..cpu_config()
        };
        let mut sep = prepared(config, 1024);
        let (l, r) = test_signal(16384, 9);
        let first = run(&mut sep, &l, &r, 700);
        assert!(sep.hpss_ready());
        sep.reset();
        assert!(!sep.hpss_ready());
        let second = run(&mut sep, &l, &r, 700);
        for stem in 0..Stem::COUNT {
            for ch in 0..2 {
                let a = &first[stem][ch];
                let b = &second[stem][ch];
                assert_eq!(a.len(), b.len());
                assert!(a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits()));
            }
        }
    }

    #[test]
    fn test_failed_backend_matches_cpu() {
        let (l, r) = test_signal(8192, 5);

        let mut cpu = prepared(cpu_config(), 512);
        let expected = run(&mut cpu, &l, &r, 512);

        let mut sep = StemSeparator::new(cpu_config()).unwrap();
        sep.prepare_with_backend(SR, 512, Box::new(FailingBackend));
        assert!(!sep.is_using_accelerated_backend());
        assert!(sep.backend_description().contains("CPU"));
        let got = run(&mut sep, &l, &r, 512);

        for stem in 0..Stem::COUNT {
            for ch in 0..2 {
                assert_eq!(expected[stem][ch], got[stem][ch]);
            }
        }
    }

    #[test]
    fn test_backend_fault_after_prepare_is_reported() {
        let (l, r) = test_signal(8192, 5);

        let mut cpu = prepared(cpu_config(), 512);
        let expected = run(&mut cpu, &l, &r, 512);

        let mut sep = StemSeparator::new(cpu_config()).unwrap();
        sep.prepare_with_backend(SR, 512, Box::new(FaultingBackend::new()));
        assert!(sep.is_using_accelerated_backend());
        assert_eq!(sep.backend_description(), "Test accelerator (ok)");

        let got = run(&mut sep, &l, &r, 512);
        assert!(!sep.is_using_accelerated_backend());
        assert!(sep.backend_description().contains("faulted"));
        for stem in 0..Stem::COUNT {
            for ch in 0..2 {
                assert_eq!(expected[stem][ch], got[stem][ch]);
            }
        }
    }

    #[test]
    fn test_process_block_does_not_allocate() {
        let mut sep = prepared(cpu_config(), 512);
        let (l, r) = test_signal(4096, 9);
        for (bl, br) in l.chunks(300).zip(r.chunks(300)) {
            assert_no_alloc::assert_no_alloc(|| {
                sep.process_block(&[bl, br]);
            });
        }
    }

    #[test]
    fn test_hpss_warm_up_then_harmonic_tone() {
        let config = SeparatorConfig {
            percussion: PercussionMode::Hpss,
            ..cpu_config()
        };
        let mut sep = prepared(config, 512);
        let bin = hz_to_bin(440.0, 2048, SR).round() as usize;
        let tone: Vec<f32> = (0..512 * 20)
            .map(|i| 0.5 * (2.0 * PI * 440.0 * i as f32 / SR).sin())
            .collect();

        for (hop, block) in tone.chunks(512).enumerate() {
            sep.process_block(&[block, block]);
            let masks = sep.hpss_masks().unwrap();
            // Hops 1..=8 leave the classified frame before the stream start.
            if hop < 8 {
                assert!(!sep.hpss_ready(), "hop {}", hop + 1);
                assert_eq!(masks.harmonic[bin], 1.0);
                assert_eq!(masks.percussive[bin], 0.0);
            } else {
                assert!(sep.hpss_ready());
                assert!(
                    masks.harmonic[bin] > masks.percussive[bin],
                    "hop {}: h={} p={}",
                    hop + 1,
                    masks.harmonic[bin],
                    masks.percussive[bin]
                );
            }
        }
    }

    #[test]
    fn test_channel_mismatch_is_tolerated() {
        let mut sep = prepared(cpu_config(), 512);
        let (l, _) = test_signal(512, 2);
        let stems = sep.process_block(&[&l[..]]);
        assert_eq!(stems.len(), 512);
        for stem in Stem::ALL {
            assert!(stems.channel(stem, 1).iter().all(|&v| v == 0.0));
        }

        let stems = sep.process_block(&[]);
        assert_eq!(stems.len(), 0);

        // Extra inputs beyond the configured channels are ignored.
        let stems = sep.process_block(&[&l[..], &l[..], &l[..]]);
        assert_eq!(stems.num_channels(), 2);
    }

    #[test]
    fn test_oversized_block_is_truncated() {
        let mut sep = prepared(cpu_config(), 256);
        let x = vec![0.1f32; 1000];
        let stems = sep.process_block(&[&x[..], &x[..]]);
        assert_eq!(stems.len(), 256);
    }

    #[test]
    fn test_unprepared_and_diagnostics() {
        let mut sep = StemSeparator::new(cpu_config()).unwrap();
        assert_eq!(sep.backend_description(), "Not prepared");
        assert!(!sep.is_using_accelerated_backend());
        let z = [0.0f32; 8];
        assert!(sep.process_block(&[&z[..], &z[..]]).is_empty());

        sep.prepare(SR, 128);
        assert!(sep.backend_description().contains("CPU"));
        assert_eq!(sep.latency_samples(), 2048);
        assert_eq!(sep.sample_rate(), Some(SR));
    }

    #[test]
    fn test_meters_and_mixer_follow_output() {
        let mut sep = prepared(cpu_config(), 512);
        let meters = sep.meters();
        let mixer = sep.mixer();
        let (l, r) = test_signal(8192, 4);
        let mut mixed = [vec![0.0f32; 512], vec![0.0f32; 512]];
        let mut last_sum = [vec![0.0f32; 512], vec![0.0f32; 512]];
        for (bl, br) in l.chunks(512).zip(r.chunks(512)) {
            let stems = sep.process_block(&[bl, br]);
            let [m0, m1] = &mut mixed;
            mixer.mix_into(stems, &mut [&mut m0[..], &mut m1[..]]);
            for ch in 0..2 {
                last_sum[ch].fill(0.0);
                for stem in Stem::ALL {
                    for (s, v) in last_sum[ch].iter_mut().zip(stems.channel(stem, ch)) {
                        *s += v;
                    }
                }
            }
        }
        assert!(meters.get_input_peak() > 0.0);
        assert!(meters.get_stem_peak(Stem::Other) > 0.0);
        for ch in 0..2 {
            for (a, b) in mixed[ch].iter().zip(&last_sum[ch]) {
                assert!((a - b).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SeparatorConfig {
            frame_len: 3000,
            ..Default::default()
        };
        assert!(matches!(
            StemSeparator::new(config),
            Err(ConfigError::FrameLength(3000))
        ));
    }
}
