//! Analysis/synthesis window table.

use std::f32::consts::PI;

/// Periodic Hann window shared by analysis and synthesis.
///
/// Periodic (not symmetric) so that the squared window sums to a constant at
/// any hop of `len / 2^k` with `k >= 2`.
#[derive(Debug, Clone)]
pub struct WindowTable {
    gains: Box<[f32]>,
}

impl WindowTable {
    pub fn hann(len: usize) -> Self {
        let gains = (0..len)
            .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / len as f32).cos())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { gains }
    }

    #[inline]
    pub fn gains(&self) -> &[f32] {
        &self.gains
    }

    pub fn len(&self) -> usize {
        self.gains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gains.is_empty()
    }

    /// Gain introduced by windowing twice and overlap-adding every `hop` samples.
    ///
    /// Computed as the mean over hop phases of the summed squared window, which is
    /// exactly the per-sample gain for windows satisfying COLA on `w^2`.
    pub fn overlap_add_gain(&self, hop: usize) -> f32 {
        if hop == 0 || self.gains.is_empty() {
            return 1.0;
        }
        let sum_sq: f64 = self.gains.iter().map(|&w| (w as f64) * (w as f64)).sum();
        (sum_sq / hop as f64) as f32
    }
}
