//! Fixed-length sample rings with explicit wraparound cursors.
//!
//! An input ring is written one sample at a time and read back a whole frame
//! at once (oldest first). An output ring is read one sample at a time, each
//! position being zeroed as it is read, while whole synthesis frames are added
//! in starting at the read cursor. Both cursors wrap modulo the ring length.
//!
//! Invariant: a synthesis frame never extends past `len` samples ahead of the
//! read cursor, so the reader never laps pending overlap-add data.

#[derive(Debug, Clone)]
pub struct SampleRing {
    buf: Box<[f32]>,
    write: usize,
    read: usize,
}

impl SampleRing {
    pub fn new(len: usize) -> Self {
        assert!(len > 0, "ring length must be > 0");
        Self {
            buf: vec![0.0; len].into_boxed_slice(),
            write: 0,
            read: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Writes one sample at the write cursor and advances it.
    #[inline]
    pub fn push(&mut self, sample: f32) {
        self.buf[self.write] = sample;
        self.write = (self.write + 1) % self.buf.len();
    }

    /// Copies the most recent `len` samples, oldest first.
    pub fn copy_latest(&self, dst: &mut [f32]) {
        debug_assert_eq!(dst.len(), self.buf.len());
        // After a push the write cursor points at the oldest sample.
        let (newer, older) = self.buf.split_at(self.write);
        dst[..older.len()].copy_from_slice(older);
        dst[older.len()..].copy_from_slice(newer);
    }

    /// Reads the sample at the read cursor, clears it and advances.
    #[inline]
    pub fn pop_clear(&mut self) -> f32 {
        let v = self.buf[self.read];
        self.buf[self.read] = 0.0;
        self.read = (self.read + 1) % self.buf.len();
        v
    }

    /// Adds `frame[i] * gain` at `read + i` (mod len).
    pub fn overlap_add(&mut self, frame: &[f32], gain: f32) {
        debug_assert!(frame.len() <= self.buf.len());
        let n = self.buf.len();
        let first = (n - self.read).min(frame.len());
        for (dst, &src) in self.buf[self.read..self.read + first]
            .iter_mut()
            .zip(&frame[..first])
        {
            *dst += src * gain;
        }
        for (dst, &src) in self.buf.iter_mut().zip(&frame[first..]) {
            *dst += src * gain;
        }
    }

    pub fn clear(&mut self) {
        self.buf.fill(0.0);
        self.write = 0;
        self.read = 0;
    }
}
