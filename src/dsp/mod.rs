pub mod history;
pub mod hpss;
pub mod masks;
pub mod median;
pub mod ring;
pub mod stft;
pub mod utils;
pub mod window;

pub use history::SpectrogramHistory;
pub use hpss::{HpssClassifier, HpssMasks};
pub use masks::{MaskComputer, StemMasks};
pub use ring::SampleRing;
pub use stft::StftEngine;
pub use window::WindowTable;
