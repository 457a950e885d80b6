//! Rolling spectrogram history for time-axis statistics.
//!
//! Holds up to `depth` frames of per-bin magnitude (`|L| + |R|`) together with
//! the complex spectrum of each channel, so a delayed frame can be resynthesised
//! once it has been classified. Storage is a fixed ring: pushing when full
//! overwrites the oldest frame. Nothing is allocated after construction.

use rustfft::num_complex::Complex;

pub struct SpectrogramHistory {
    depth: usize,
    bins: usize,
    // Flattened [depth][bins] rows.
    magnitudes: Vec<f32>,
    spectra_l: Vec<Complex<f32>>,
    spectra_r: Vec<Complex<f32>>,
    // Slot the next push writes to.
    next: usize,
    len: usize,
}

impl SpectrogramHistory {
    pub fn new(depth: usize, bins: usize) -> Self {
        assert!(depth > 0, "history depth must be > 0");
        let zero = Complex::new(0.0, 0.0);
        Self {
            depth,
            bins,
            magnitudes: vec![0.0; depth * bins],
            spectra_l: vec![zero; depth * bins],
            spectra_r: vec![zero; depth * bins],
            next: 0,
            len: 0,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    /// Number of frames currently held (saturates at `depth`).
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.depth
    }

    /// Appends a frame, evicting the oldest when full. Magnitudes are derived
    /// from the two spectra.
    pub fn push(&mut self, left: &[Complex<f32>], right: &[Complex<f32>]) {
        debug_assert_eq!(left.len(), self.bins);
        debug_assert_eq!(right.len(), self.bins);
        let row = self.next * self.bins..(self.next + 1) * self.bins;

        self.spectra_l[row.clone()].copy_from_slice(left);
        self.spectra_r[row.clone()].copy_from_slice(right);
        for ((m, l), r) in self.magnitudes[row].iter_mut().zip(left).zip(right) {
            *m = l.norm() + r.norm();
        }

        self.next = (self.next + 1) % self.depth;
        self.len = (self.len + 1).min(self.depth);
    }

    fn slot(&self, age: usize) -> usize {
        debug_assert!(age < self.len);
        // `next` is one past the newest.
        (self.next + self.depth - 1 - age) % self.depth
    }

    /// Magnitude row `age` frames behind the newest (0 = newest).
    pub fn magnitude(&self, age: usize) -> &[f32] {
        let s = self.slot(age) * self.bins;
        &self.magnitudes[s..s + self.bins]
    }

    /// Stored stereo spectrum `age` frames behind the newest.
    pub fn spectra(&self, age: usize) -> (&[Complex<f32>], &[Complex<f32>]) {
        let s = self.slot(age) * self.bins;
        (
            &self.spectra_l[s..s + self.bins],
            &self.spectra_r[s..s + self.bins],
        )
    }

    /// Magnitude of `bin` at `age`, padding ages beyond the stored frames with
    /// the oldest available one.
    #[inline]
    pub fn magnitude_padded(&self, age: usize, bin: usize) -> f32 {
        if self.len == 0 {
            return 0.0;
        }
        let age = age.min(self.len - 1);
        self.magnitudes[self.slot(age) * self.bins + bin]
    }

    pub fn clear(&mut self) {
        self.magnitudes.fill(0.0);
        self.spectra_l.fill(Complex::new(0.0, 0.0));
        self.spectra_r.fill(Complex::new(0.0, 0.0));
        self.next = 0;
        self.len = 0;
    }
}
