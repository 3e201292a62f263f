//! Threshold burst detection with half-power bandwidth estimate
//!
//! A frame holds a burst iff any bin is above the threshold. Only the
//! strongest bin is reported: a frame with several disjoint signals above
//! threshold still yields one detection (the first global maximum, scanning
//! from low to high frequency).

use super::spectrum::FftFrame;

/// Drop from the peak that bounds the bandwidth estimate
pub const HALF_POWER_DB: f32 = 3.0;

/// Strongest bin of a frame that crossed the threshold
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralPeak {
    pub bin: usize,
    pub frequency: f64,
    pub power_dbfs: f32,
    /// Bins where the outward scans stopped
    pub left_bin: usize,
    pub right_bin: usize,
    pub bandwidth_hz: f64,
}

/// Index of the first global maximum, ignoring NaN bins
fn first_global_max(power: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &p) in power.iter().enumerate() {
        if p.is_nan() {
            continue;
        }
        match best {
            Some((_, max)) if p <= max => {}
            _ => best = Some((i, p)),
        }
    }
    best.map(|(i, _)| i)
}

/// Scan outward from `peak` until power is no longer above `peak - 3 dB`,
/// stopping at the spectrum edges. Returns the two stopping bins.
pub fn half_power_edges(power: &[f32], peak: usize) -> (usize, usize) {
    let level = power[peak] - HALF_POWER_DB;

    let mut left = peak;
    while left > 0 && power[left] > level {
        left -= 1;
    }

    let mut right = peak;
    while right < power.len() - 1 && power[right] > level {
        right += 1;
    }

    (left, right)
}

/// Run detection against one frame
pub fn detect_peak(frame: &FftFrame, threshold_dbfs: f32) -> Option<SpectralPeak> {
    if !frame.power.iter().any(|&p| p > threshold_dbfs) {
        return None;
    }

    let bin = first_global_max(&frame.power)?;
    let (left_bin, right_bin) = half_power_edges(&frame.power, bin);
    let bandwidth_hz = (frame.frequencies[right_bin] - frame.frequencies[left_bin]).abs();

    Some(SpectralPeak {
        bin,
        frequency: frame.frequencies[bin],
        power_dbfs: frame.power[bin],
        left_bin,
        right_bin,
        bandwidth_hz,
    })
}

/// Burst duration implied by one block
pub fn block_duration(samples: usize, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        0.0
    } else {
        samples as f64 / sample_rate as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::spectrum::bin_frequency;
    use chrono::Utc;

    const N: usize = 1024;
    const RATE: u32 = 1_024_000;
    const CENTER: u64 = 433_920_000;

    fn frame_from(power: Vec<f32>) -> FftFrame {
        let n = power.len();
        FftFrame {
            device_index: 0,
            timestamp: Utc::now(),
            center_frequency: CENTER,
            sample_rate: RATE,
            frequencies: (0..n).map(|k| bin_frequency(k, n, CENTER, RATE)).collect(),
            power,
        }
    }

    #[test]
    fn test_no_burst_below_threshold() {
        let frame = frame_from(vec![-60.0; N]);
        assert!(detect_peak(&frame, -35.0).is_none());

        // Equal to threshold is not above it
        let frame = frame_from(vec![-35.0; N]);
        assert!(detect_peak(&frame, -35.0).is_none());
    }

    #[test]
    fn test_single_bin_above_threshold() {
        for bin in [0, 1, 300, 512, N - 1] {
            let mut power = vec![-60.0; N];
            power[bin] = -20.0;
            let frame = frame_from(power);

            let peak = detect_peak(&frame, -35.0).expect("burst expected");
            assert_eq!(peak.bin, bin);
            assert_eq!(peak.frequency, frame.frequencies[bin]);
            assert_eq!(peak.power_dbfs, -20.0);
        }
    }

    #[test]
    fn test_ties_take_first_bin() {
        let mut power = vec![-60.0; N];
        power[100] = -10.0;
        power[700] = -10.0;
        let peak = detect_peak(&frame_from(power), -35.0).unwrap();
        assert_eq!(peak.bin, 100);
    }

    #[test]
    fn test_only_strongest_of_disjoint_signals() {
        let mut power = vec![-60.0; N];
        power[200] = -25.0;
        power[800] = -15.0;
        let peak = detect_peak(&frame_from(power), -35.0).unwrap();
        assert_eq!(peak.bin, 800);
    }

    #[test]
    fn test_gaussian_bandwidth_within_one_bin() {
        // Parabola in dB == Gaussian in linear power; 3 dB half-width of 9.9 bins
        let center_bin = 512.0;
        let half_width_bins = 9.9;
        let curvature = HALF_POWER_DB / (half_width_bins * half_width_bins);
        let power: Vec<f32> = (0..N)
            .map(|k| {
                let d = k as f32 - center_bin;
                (-10.0 - curvature * d * d).max(-80.0)
            })
            .collect();
        let frame = frame_from(power);
        let resolution = frame.bin_resolution();
        let known_width = 2.0 * half_width_bins as f64 * resolution;

        let peak = detect_peak(&frame, -35.0).unwrap();
        assert_eq!(peak.bin, 512);
        assert!(
            (peak.bandwidth_hz - known_width).abs() <= resolution,
            "estimated {} Hz, expected {} Hz",
            peak.bandwidth_hz,
            known_width
        );
    }

    #[test]
    fn test_bandwidth_stops_at_edges() {
        let mut power = vec![-60.0; N];
        power[0] = -10.0;
        power[1] = -11.0;
        let peak = detect_peak(&frame_from(power), -35.0).unwrap();
        assert_eq!(peak.left_bin, 0);
        assert_eq!(peak.right_bin, 2);

        let flat = frame_from(vec![-10.0; N]);
        let peak = detect_peak(&flat, -35.0).unwrap();
        assert_eq!((peak.left_bin, peak.right_bin), (0, N - 1));
        assert!((peak.bandwidth_hz - (N - 1) as f64 * flat.bin_resolution()).abs() < 1e-6);
    }

    #[test]
    fn test_block_duration() {
        assert!((block_duration(262_144, 2_048_000) - 0.128).abs() < 1e-9);
        assert_eq!(block_duration(10, 0), 0.0);
    }
}
