//! Stemperator: real-time spectral stem separation.
//!
//! Splits a stereo stream into vocals, drums, bass and other with an STFT
//! overlap-add engine, heuristic per-bin masks and an optional
//! harmonic/percussive median classifier. No trained model is involved, so
//! the path is deterministic and has bounded per-block cost.
//!
//! ```no_run
//! use stemperator::{SeparatorConfig, Stem, StemSeparator};
//!
//! let mut sep = StemSeparator::new(SeparatorConfig::default())?;
//! sep.prepare(48000.0, 512);
//! let left = [0.0f32; 512];
//! let right = [0.0f32; 512];
//! let stems = sep.process_block(&[&left[..], &right[..]]);
//! let vocals_left = stems.channel(Stem::Vocals, 0);
//! # let _ = vocals_left;
//! # Ok::<(), stemperator::ConfigError>(())
//! ```

pub mod backend;
pub mod config;
mod debug;
pub mod dsp;
pub mod meters;
pub mod mixer;
pub mod params;
pub mod separator;
pub mod stem;

pub use backend::{BackendHandle, BackendPreference, ComputeBackend, CpuFftBackend};
#[cfg(feature = "gpu")]
pub use backend::GpuFftBackend;
pub use config::{ConfigError, PercussionMode, SeparatorConfig};
pub use dsp::{HpssMasks, StemMasks};
pub use meters::StemMeters;
pub use mixer::StemMixer;
pub use params::{ParamSnapshot, SeparationParams};
pub use separator::StemSeparator;
pub use stem::{Stem, StemBuffers};

// Makes `assert_no_alloc` blocks in tests actually trap allocations.
#[cfg(test)]
#[global_allocator]
static A: assert_no_alloc::AllocDisabler = assert_no_alloc::AllocDisabler;
