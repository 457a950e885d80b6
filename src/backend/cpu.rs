//! Portable transform on `rustfft`.

use super::ComputeBackend;
use anyhow::{ensure, Result};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

struct Plan {
    frame_len: usize,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex<f32>>,
    fft_scratch: Vec<Complex<f32>>,
    ifft_scratch: Vec<Complex<f32>>,
}

impl Plan {
    fn new(frame_len: usize) -> Result<Self> {
        ensure!(
            frame_len >= 2 && frame_len.is_power_of_two(),
            "frame length {} is not a power of two >= 2",
            frame_len
        );
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(frame_len);
        let ifft = planner.plan_fft_inverse(frame_len);
        let fft_scratch = vec![Complex::default(); fft.get_inplace_scratch_len()];
        let ifft_scratch = vec![Complex::default(); ifft.get_inplace_scratch_len()];
        Ok(Self {
            frame_len,
            fft,
            ifft,
            scratch: vec![Complex::default(); frame_len],
            fft_scratch,
            ifft_scratch,
        })
    }

    fn forward(&mut self, input: &[f32], output: &mut [Complex<f32>]) {
        let n = self.frame_len;
        debug_assert_eq!(input.len(), n);
        debug_assert_eq!(output.len(), n / 2 + 1);

        for (s, &x) in self.scratch.iter_mut().zip(input) {
            *s = Complex::new(x, 0.0);
        }
        #[cfg(debug_assertions)]
        assert_no_alloc::assert_no_alloc(|| {
            self.fft
                .process_with_scratch(&mut self.scratch, &mut self.fft_scratch);
        });
        #[cfg(not(debug_assertions))]
        self.fft
            .process_with_scratch(&mut self.scratch, &mut self.fft_scratch);

        output.copy_from_slice(&self.scratch[..=n / 2]);
    }

    fn inverse(&mut self, input: &[Complex<f32>], output: &mut [f32]) {
        let n = self.frame_len;
        let nyq = n / 2;
        debug_assert_eq!(input.len(), nyq + 1);
        debug_assert_eq!(output.len(), n);

        self.scratch[..=nyq].copy_from_slice(input);
        // Hermite
        self.scratch[0].im = 0.0;
        self.scratch[nyq].im = 0.0;
        for k in 1..nyq {
            self.scratch[n - k] = self.scratch[k].conj();
        }

        #[cfg(debug_assertions)]
        assert_no_alloc::assert_no_alloc(|| {
            self.ifft
                .process_with_scratch(&mut self.scratch, &mut self.ifft_scratch);
        });
        #[cfg(not(debug_assertions))]
        self.ifft
            .process_with_scratch(&mut self.scratch, &mut self.ifft_scratch);

        let norm = 1.0 / n as f32;
        for (y, s) in output.iter_mut().zip(&self.scratch) {
            *y = s.re * norm;
        }
    }
}

/// Complex FFT of the real frame with Hermitian completion on the way back.
#[derive(Default)]
pub struct CpuFftBackend {
    plan: Option<Plan>,
}

impl CpuFftBackend {
    /// Unplanned backend; call `initialize` before use.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_new(frame_len: usize) -> Result<Self> {
        Ok(Self {
            plan: Some(Plan::new(frame_len)?),
        })
    }

    pub fn frame_len(&self) -> usize {
        self.plan.as_ref().map_or(0, |p| p.frame_len)
    }
}

impl ComputeBackend for CpuFftBackend {
    fn initialize(&mut self, frame_len: usize) -> bool {
        if self.plan.is_some() && self.frame_len() == frame_len {
            return true;
        }
        match Plan::new(frame_len) {
            Ok(plan) => {
                self.plan = Some(plan);
                true
            }
            Err(e) => {
                log::warn!("CPU transform init failed: {:#}", e);
                self.plan = None;
                false
            }
        }
    }

    fn forward(&mut self, input: &[f32], output: &mut [Complex<f32>]) {
        match self.plan.as_mut() {
            Some(plan) => plan.forward(input, output),
            None => output.fill(Complex::default()),
        }
    }

    fn inverse(&mut self, input: &[Complex<f32>], output: &mut [f32]) {
        match self.plan.as_mut() {
            Some(plan) => plan.inverse(input, output),
            None => output.fill(0.0),
        }
    }

    fn is_available(&self) -> bool {
        self.plan.is_some()
    }

    fn describe(&self) -> String {
        format!("CPU (rustfft, N={})", self.frame_len())
    }
}
