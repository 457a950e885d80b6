//! Compute backends for the spectral transform.
//!
//! The separation engine depends only on [`ComputeBackend`]. A backend is
//! chosen once at prepare time; if the preferred accelerator cannot be brought
//! up the engine runs on the CPU transform for the rest of its lifetime.

use log::{info, warn};
use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};

pub mod cpu;
#[cfg(feature = "gpu")]
pub mod gpu;

pub use cpu::CpuFftBackend;
#[cfg(feature = "gpu")]
pub use gpu::GpuFftBackend;

/// Real-signal transform of a fixed power-of-two length.
///
/// Spectra hold `frame_len / 2 + 1` bins. `inverse` includes the `1/N` scale so
/// that `inverse(forward(x)) == x`.
pub trait ComputeBackend: Send {
    /// Prepares plans and buffers for `frame_len`. Returns `false` when the
    /// backend cannot run; never panics.
    fn initialize(&mut self, frame_len: usize) -> bool;

    fn forward(&mut self, input: &[f32], output: &mut [Complex<f32>]);

    fn inverse(&mut self, input: &[Complex<f32>], output: &mut [f32]);

    /// Both channels of one frame. Backends with per-dispatch overhead override
    /// this to submit them together.
    fn forward_batch(
        &mut self,
        left: &[f32],
        right: &[f32],
        out_left: &mut [Complex<f32>],
        out_right: &mut [Complex<f32>],
    ) {
        self.forward(left, out_left);
        self.forward(right, out_right);
    }

    fn inverse_batch(
        &mut self,
        left: &[Complex<f32>],
        right: &[Complex<f32>],
        out_left: &mut [f32],
        out_right: &mut [f32],
    ) {
        self.inverse(left, out_left);
        self.inverse(right, out_right);
    }

    fn is_available(&self) -> bool;

    fn is_accelerated(&self) -> bool {
        false
    }

    fn describe(&self) -> String;
}

/// Which backend to try first at prepare time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// Always the CPU transform.
    Cpu,
    /// Accelerator when compiled in and present, CPU otherwise.
    #[default]
    Auto,
}

/// The backend chosen for one prepared engine.
pub struct BackendHandle {
    backend: Box<dyn ComputeBackend>,
    accelerated: bool,
}

impl BackendHandle {
    /// Selects a backend for `frame_len` according to `preference`.
    pub fn select(preference: BackendPreference, frame_len: usize) -> Self {
        match preference {
            BackendPreference::Cpu => Self::cpu(frame_len),
            BackendPreference::Auto => Self::auto(frame_len),
        }
    }

    #[cfg(feature = "gpu")]
    fn auto(frame_len: usize) -> Self {
        info!("Attempting to initialize GPU transform backend...");
        Self::with_backend(Box::new(GpuFftBackend::new()), frame_len)
    }

    #[cfg(not(feature = "gpu"))]
    fn auto(frame_len: usize) -> Self {
        info!("Built without the gpu feature, using CPU transform backend.");
        Self::cpu(frame_len)
    }

    /// Uses `backend` if it initializes, the CPU transform otherwise.
    pub fn with_backend(mut backend: Box<dyn ComputeBackend>, frame_len: usize) -> Self {
        if backend.initialize(frame_len) && backend.is_available() {
            let accelerated = backend.is_accelerated();
            info!("Transform backend initialized: {}", backend.describe());
            return Self {
                backend,
                accelerated,
            };
        }
        warn!(
            "Transform backend '{}' unavailable, falling back to CPU.",
            backend.describe()
        );
        Self::cpu(frame_len)
    }

    pub fn cpu(frame_len: usize) -> Self {
        let mut backend = CpuFftBackend::new();
        if !backend.initialize(frame_len) {
            warn!("CPU transform could not be planned for frame length {}", frame_len);
        }
        info!("Transform backend initialized: {}", backend.describe());
        Self {
            backend: Box::new(backend),
            accelerated: false,
        }
    }

    #[inline]
    pub fn backend_mut(&mut self) -> &mut dyn ComputeBackend {
        self.backend.as_mut()
    }

    /// True while an accelerator is selected and has not faulted.
    pub fn is_accelerated(&self) -> bool {
        self.accelerated && self.backend.is_available()
    }

    /// Current state of the backend, including a fault after prepare.
    /// Allocates; not for the audio thread.
    pub fn description(&self) -> String {
        self.backend.describe()
    }
}

/// Backend whose initialization always fails.
#[cfg(test)]
pub(crate) struct FailingBackend;

#[cfg(test)]
impl ComputeBackend for FailingBackend {
    fn initialize(&mut self, _frame_len: usize) -> bool {
        false
    }

    fn forward(&mut self, _input: &[f32], output: &mut [Complex<f32>]) {
        output.fill(Complex::new(f32::NAN, f32::NAN));
    }

    fn inverse(&mut self, _input: &[Complex<f32>], output: &mut [f32]) {
        output.fill(f32::NAN);
    }

    fn is_available(&self) -> bool {
        false
    }

    fn is_accelerated(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        "Failing test backend".to_string()
    }
}

/// Accelerated test backend that faults on its second transform and then
/// answers from a CPU plan, the way the GPU backend does after a device fault.
#[cfg(test)]
pub(crate) struct FaultingBackend {
    cpu: CpuFftBackend,
    calls: usize,
    faulted: bool,
}

#[cfg(test)]
impl FaultingBackend {
    pub(crate) fn new() -> Self {
        Self {
            cpu: CpuFftBackend::new(),
            calls: 0,
            faulted: false,
        }
    }

    fn tick(&mut self) {
        self.calls += 1;
        if self.calls > 1 {
            self.faulted = true;
        }
    }
}

#[cfg(test)]
impl ComputeBackend for FaultingBackend {
    fn initialize(&mut self, frame_len: usize) -> bool {
        self.calls = 0;
        self.faulted = false;
        self.cpu.initialize(frame_len)
    }

    fn forward(&mut self, input: &[f32], output: &mut [Complex<f32>]) {
        self.tick();
        self.cpu.forward(input, output);
    }

    fn inverse(&mut self, input: &[Complex<f32>], output: &mut [f32]) {
        self.tick();
        self.cpu.inverse(input, output);
    }

    fn is_available(&self) -> bool {
        !self.faulted
    }

    fn is_accelerated(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        if self.faulted {
            "Test accelerator (faulted, CPU plan)".to_string()
        } else {
            "Test accelerator (ok)".to_string()
        }
    }
}
