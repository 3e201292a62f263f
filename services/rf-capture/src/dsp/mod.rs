//! Signal pipeline
//!
//! 1. Window the block and compute its power spectrum (dBFS)
//! 2. Compare against the threshold and locate the strongest bin
//! 3. Estimate the half-power bandwidth around it

pub mod burst;
pub mod spectrum;

pub use burst::{block_duration, detect_peak, SpectralPeak};
pub use spectrum::{FftFrame, SpectrumAnalyzer};
