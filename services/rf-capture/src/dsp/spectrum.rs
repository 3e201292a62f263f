//! Windowed FFT power spectrum
//!
//! Block → Hamming window → forward FFT → fftshift → dBFS.
//! Power is normalized by the window's coherent gain so a full-scale tone
//! reads 0 dBFS regardless of block length.

use std::f32::consts::PI;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};

use crate::error::{CaptureError, Result};

/// Floor for empty bins, keeps `log10(0)` out of the spectrum
pub const POWER_FLOOR_DB: f32 = -200.0;

/// Power spectrum of one acquisition block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FftFrame {
    pub device_index: u32,
    pub timestamp: DateTime<Utc>,
    pub center_frequency: u64,
    pub sample_rate: u32,
    /// Absolute bin frequencies in Hz, ascending
    pub frequencies: Vec<f64>,
    /// Bin power in dBFS, parallel to `frequencies`
    pub power: Vec<f32>,
}

impl FftFrame {
    pub fn len(&self) -> usize {
        self.power.len()
    }

    pub fn is_empty(&self) -> bool {
        self.power.is_empty()
    }

    /// Width of one bin in Hz (of the full-resolution spectrum)
    pub fn bin_resolution(&self) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            self.sample_rate as f64 / self.len() as f64
        }
    }

    /// (frequency, power) pairs in ascending frequency order
    pub fn bins(&self) -> impl Iterator<Item = (f64, f32)> + '_ {
        self.frequencies.iter().copied().zip(self.power.iter().copied())
    }

    /// Stride-based decimation to at most `max_points` bins
    pub fn decimate(&self, max_points: usize) -> FftFrame {
        if max_points == 0 || self.len() <= max_points {
            return self.clone();
        }
        let stride = self.len().div_ceil(max_points);
        FftFrame {
            frequencies: self.frequencies.iter().copied().step_by(stride).collect(),
            power: self.power.iter().copied().step_by(stride).collect(),
            ..self.metadata()
        }
    }

    fn metadata(&self) -> FftFrame {
        FftFrame {
            device_index: self.device_index,
            timestamp: self.timestamp,
            center_frequency: self.center_frequency,
            sample_rate: self.sample_rate,
            frequencies: Vec::new(),
            power: Vec::new(),
        }
    }
}

/// Hamming window coefficients
pub fn hamming(n: usize) -> Vec<f32> {
    if n == 1 {
        return vec![1.0];
    }
    let denom = (n - 1) as f32;
    (0..n)
        .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f32 / denom).cos())
        .collect()
}

/// Absolute frequency of shifted bin `k` in an `n`-point spectrum
pub fn bin_frequency(k: usize, n: usize, center_hz: u64, sample_rate: u32) -> f64 {
    let offset = k as i64 - (n / 2) as i64;
    center_hz as f64 + offset as f64 * sample_rate as f64 / n as f64
}

/// Reusable spectrum calculator. Caches the FFT plan and window for the
/// last block length seen.
pub struct SpectrumAnalyzer {
    planner: FftPlanner<f32>,
    fft: Option<(usize, Arc<dyn Fft<f32>>)>,
    window: Vec<f32>,
    window_sum: f32,
    scratch: Vec<Complex32>,
}

impl SpectrumAnalyzer {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
            fft: None,
            window: Vec::new(),
            window_sum: 0.0,
            scratch: Vec::new(),
        }
    }

    fn prepare(&mut self, n: usize) -> Arc<dyn Fft<f32>> {
        match &self.fft {
            Some((len, fft)) if *len == n => fft.clone(),
            _ => {
                let fft = self.planner.plan_fft_forward(n);
                self.window = hamming(n);
                self.window_sum = self.window.iter().sum();
                self.scratch = vec![Complex32::new(0.0, 0.0); fft.get_inplace_scratch_len()];
                self.fft = Some((n, fft.clone()));
                fft
            }
        }
    }

    /// Compute the power spectrum of `block`
    pub fn compute(
        &mut self,
        device_index: u32,
        block: &[Complex32],
        center_hz: u64,
        sample_rate: u32,
    ) -> Result<FftFrame> {
        let n = block.len();
        if n == 0 {
            return Err(CaptureError::Spectrum("empty sample block".to_string()));
        }
        if sample_rate == 0 {
            return Err(CaptureError::Spectrum("sample rate is zero".to_string()));
        }

        let fft = self.prepare(n);
        let mut buffer: Vec<Complex32> = block
            .iter()
            .zip(self.window.iter())
            .map(|(s, w)| *s * *w)
            .collect();
        fft.process_with_scratch(&mut buffer, &mut self.scratch);

        // dBFS: readings (and thresholds) sit 20*log10(sum(w)) below raw 10*log10(|X|^2)
        let norm = self.window_sum * self.window_sum;
        let half = n / 2;
        let mut frequencies = Vec::with_capacity(n);
        let mut power = Vec::with_capacity(n);
        for k in 0..n {
            let x = buffer[(k + n - half) % n];
            let db = 10.0 * (x.norm_sqr() / norm).log10();
            power.push(if db.is_finite() { db.max(POWER_FLOOR_DB) } else { POWER_FLOOR_DB });
            frequencies.push(bin_frequency(k, n, center_hz, sample_rate));
        }

        Ok(FftFrame {
            device_index,
            timestamp: Utc::now(),
            center_frequency: center_hz,
            sample_rate,
            frequencies,
            power,
        })
    }
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(n: usize, bin_offset: i64, amplitude: f32) -> Vec<Complex32> {
        (0..n)
            .map(|i| {
                let phase = 2.0 * PI * bin_offset as f32 * i as f32 / n as f32;
                Complex32::from_polar(amplitude, phase)
            })
            .collect()
    }

    #[test]
    fn test_hamming_shape() {
        let w = hamming(5);
        assert!((w[0] - 0.08).abs() < 1e-6);
        assert!((w[2] - 1.0).abs() < 1e-6);
        assert!((w[4] - 0.08).abs() < 1e-6);
    }

    #[test]
    fn test_bin_frequency_mapping() {
        // 4 bins at 4 Hz: -2, -1, 0, +1 Hz around center
        assert_eq!(bin_frequency(0, 4, 100, 4), 98.0);
        assert_eq!(bin_frequency(2, 4, 100, 4), 100.0);
        assert_eq!(bin_frequency(3, 4, 100, 4), 101.0);
        // Odd length keeps DC in the middle
        assert_eq!(bin_frequency(2, 5, 0, 5), 0.0);
        assert_eq!(bin_frequency(0, 5, 0, 5), -2.0);
    }

    #[test]
    fn test_full_scale_tone_reads_zero_dbfs() {
        let mut analyzer = SpectrumAnalyzer::new();
        let block = tone(1024, 100, 1.0);
        let frame = analyzer.compute(0, &block, 433_920_000, 2_048_000).unwrap();

        assert_eq!(frame.len(), 1024);
        let (peak_bin, peak_db) = frame
            .power
            .iter()
            .enumerate()
            .fold((0, f32::MIN), |acc, (i, &p)| if p > acc.1 { (i, p) } else { acc });
        assert_eq!(peak_bin, 512 + 100);
        assert!(peak_db.abs() < 0.1, "peak at {} dBFS", peak_db);
        let expected = 433_920_000.0 + 100.0 * 2000.0;
        assert!((frame.frequencies[peak_bin] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_attenuated_tone_level() {
        let mut analyzer = SpectrumAnalyzer::new();
        let frame = analyzer.compute(0, &tone(2048, 0, 0.1), 0, 2_048_000).unwrap();
        assert!((frame.power[1024] + 20.0).abs() < 0.1);
    }

    #[test]
    fn test_offset_from_raw_power_is_window_gain() {
        let n = 1024;
        let block = tone(n, 37, 0.5);
        let mut analyzer = SpectrumAnalyzer::new();
        let frame = analyzer.compute(0, &block, 0, 1_024_000).unwrap();

        // Direct DFT of the windowed block at the tone's bin
        let window = hamming(n);
        let raw: Complex32 = block
            .iter()
            .zip(window.iter())
            .enumerate()
            .map(|(i, (s, w))| *s * *w * Complex32::from_polar(1.0, -2.0 * PI * 37.0 * i as f32 / n as f32))
            .sum();
        let raw_db = 10.0 * raw.norm_sqr().log10();

        let offset = 20.0 * analyzer.window_sum.log10();
        assert!((raw_db - frame.power[n / 2 + 37] - offset).abs() < 0.05);
    }

    #[test]
    fn test_silence_hits_floor() {
        let mut analyzer = SpectrumAnalyzer::new();
        let block = vec![Complex32::new(0.0, 0.0); 64];
        let frame = analyzer.compute(0, &block, 0, 1000).unwrap();
        assert!(frame.power.iter().all(|&p| p == POWER_FLOOR_DB));
    }

    #[test]
    fn test_empty_block_is_error() {
        let mut analyzer = SpectrumAnalyzer::new();
        assert!(analyzer.compute(0, &[], 0, 1000).is_err());
    }

    #[test]
    fn test_plan_follows_block_length() {
        let mut analyzer = SpectrumAnalyzer::new();
        assert_eq!(analyzer.compute(0, &tone(256, 3, 0.5), 0, 1000).unwrap().len(), 256);
        assert_eq!(analyzer.compute(0, &tone(512, 3, 0.5), 0, 1000).unwrap().len(), 512);
    }

    #[test]
    fn test_decimate_bounds_points() {
        let mut analyzer = SpectrumAnalyzer::new();
        let frame = analyzer.compute(7, &tone(4096, 0, 0.5), 1_000_000, 2_048_000).unwrap();

        let small = frame.decimate(1000);
        assert!(small.len() <= 1000);
        assert_eq!(small.frequencies.len(), small.power.len());
        assert_eq!(small.device_index, 7);
        assert_eq!(small.frequencies[0], frame.frequencies[0]);

        let same = frame.decimate(8192);
        assert_eq!(same.len(), 4096);
    }
}
