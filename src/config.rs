//! Construction-time configuration.

use crate::backend::BackendPreference;
use crate::params::ParamSnapshot;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_FRAME_LEN: usize = 2048;
pub const DEFAULT_HISTORY_DEPTH: usize = 17;
pub const DEFAULT_FREQ_KERNEL: usize = 17;

pub const MIN_FRAME_LEN: usize = 64;
pub const MAX_FRAME_LEN: usize = 16384;
pub const MAX_CHANNELS: usize = 2;
// Squared Hann only sums flat when the frame spans at least this many hops.
const MIN_OVERLAP: usize = 4;

/// Source of the drums raw gain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PercussionMode {
    /// Single-frame onset ratio.
    #[default]
    Transient,
    /// Median-filter percussive mask over the spectrogram history.
    Hpss,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("frame length {0} must be a power of two in 64..=16384")]
    FrameLength(usize),
    #[error("hop {hop} must be a power of two no larger than a quarter of frame length {frame_len}")]
    Hop { hop: usize, frame_len: usize },
    #[error("channel count {0} must be 1 or 2")]
    Channels(usize),
    #[error("history depth {0} must be odd and at least 3")]
    HistoryDepth(usize),
    #[error("frequency kernel {kernel} must be odd and no wider than {bins} bins")]
    FreqKernel { kernel: usize, bins: usize },
    #[error("invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeparatorConfig {
    pub frame_len: usize,
    pub hop_len: usize,
    pub channels: usize,
    pub backend: BackendPreference,
    pub percussion: PercussionMode,
    pub history_depth: usize,
    pub freq_kernel: usize,
    /// Initial knob values.
    pub params: ParamSnapshot,
}

impl Default for SeparatorConfig {
    fn default() -> Self {
        Self {
            frame_len: DEFAULT_FRAME_LEN,
            hop_len: DEFAULT_FRAME_LEN / MIN_OVERLAP,
            channels: 2,
            backend: BackendPreference::Auto,
            percussion: PercussionMode::Transient,
            history_depth: DEFAULT_HISTORY_DEPTH,
            freq_kernel: DEFAULT_FREQ_KERNEL,
            params: ParamSnapshot::default(),
        }
    }
}

impl SeparatorConfig {
    /// Parses a (possibly partial) JSON object over the defaults and validates it.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let n = self.frame_len;
        if !n.is_power_of_two() || !(MIN_FRAME_LEN..=MAX_FRAME_LEN).contains(&n) {
            return Err(ConfigError::FrameLength(n));
        }
        if self.hop_len == 0 || !self.hop_len.is_power_of_two() || self.hop_len * MIN_OVERLAP > n {
            return Err(ConfigError::Hop {
                hop: self.hop_len,
                frame_len: n,
            });
        }
        if self.channels == 0 || self.channels > MAX_CHANNELS {
            return Err(ConfigError::Channels(self.channels));
        }
        if self.history_depth < 3 || self.history_depth % 2 == 0 {
            return Err(ConfigError::HistoryDepth(self.history_depth));
        }
        let bins = self.bins();
        if self.freq_kernel % 2 == 0 || self.freq_kernel > bins {
            return Err(ConfigError::FreqKernel {
                kernel: self.freq_kernel,
                bins,
            });
        }
        Ok(())
    }

    pub fn bins(&self) -> usize {
        self.frame_len / 2 + 1
    }

    /// Input-to-output delay in samples.
    pub fn latency_samples(&self) -> usize {
        match self.percussion {
            PercussionMode::Transient => self.frame_len,
            PercussionMode::Hpss => self.frame_len + (self.history_depth / 2) * self.hop_len,
        }
    }
}
