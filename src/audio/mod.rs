pub mod decode;
pub mod features;
pub mod spectrogram;
