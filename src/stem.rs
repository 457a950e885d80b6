//! Stem labels and the per-block output set.

/// Instrument group produced by the separator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stem {
    Vocals,
    Drums,
    Bass,
    Other,
}

impl Stem {
    pub const COUNT: usize = 4;
    pub const ALL: [Stem; Stem::COUNT] = [Stem::Vocals, Stem::Drums, Stem::Bass, Stem::Other];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            Stem::Vocals => "Vocals",
            Stem::Drums => "Drums",
            Stem::Bass => "Bass",
            Stem::Other => "Other",
        }
    }
}

/// Four labelled `channels x max_block` buffers, refilled by every
/// `process_block` and lent to the caller until the next call.
pub struct StemBuffers {
    // [stem][channel], each max_block long.
    data: Vec<Vec<Vec<f32>>>,
    len: usize,
}

impl StemBuffers {
    pub fn new(channels: usize, max_block: usize) -> Self {
        Self {
            data: (0..Stem::COUNT)
                .map(|_| vec![vec![0.0; max_block]; channels])
                .collect(),
            len: 0,
        }
    }

    /// Samples per channel in the last processed block.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn num_channels(&self) -> usize {
        self.data.first().map_or(0, |s| s.len())
    }

    pub fn channel(&self, stem: Stem, channel: usize) -> &[f32] {
        &self.data[stem.index()][channel][..self.len]
    }

    pub(crate) fn channel_mut(&mut self, stem: Stem, channel: usize) -> &mut [f32] {
        let len = self.len;
        &mut self.data[stem.index()][channel][..len]
    }

    /// Zeroes `len` samples of every buffer and makes them the current block.
    pub(crate) fn begin_block(&mut self, len: usize) {
        self.len = len;
        for stem in &mut self.data {
            for ch in stem {
                ch[..len].fill(0.0);
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        self.len = 0;
        for stem in &mut self.data {
            for ch in stem {
                ch.fill(0.0);
            }
        }
    }
}
