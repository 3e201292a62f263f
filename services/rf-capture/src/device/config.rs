//! Device configuration and partial tuning

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::sdr::{DriverError, RadioHandle};

/// Full configuration snapshot of one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Center frequency in Hz
    pub center_frequency: u64,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Tuner gain in dB
    pub gain: f32,
    /// Frequency correction in ppm
    pub ppm: i32,
    /// Burst threshold in dBFS
    pub threshold_dbfs: f32,
    /// Minimum burst duration in seconds. Stored and reported, not used as a filter
    pub min_burst_duration: f32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            center_frequency: 433_920_000,
            sample_rate: 2_048_000,
            gain: 40.0,
            ppm: 0,
            threshold_dbfs: -35.0,
            min_burst_duration: 0.1,
        }
    }
}

impl DeviceConfig {
    /// Push every hardware field to `handle`. Each field is applied
    /// independently; failures are returned, never fatal.
    pub fn apply_to(&self, handle: &mut dyn RadioHandle) -> Vec<(TuneField, DriverError)> {
        let results = [
            (TuneField::CenterFrequency, handle.set_center_frequency(self.center_frequency)),
            (TuneField::SampleRate, handle.set_sample_rate(self.sample_rate)),
            (TuneField::Gain, handle.set_gain(self.gain)),
            (TuneField::Ppm, handle.set_freq_correction(self.ppm)),
        ];

        let mut failures = Vec::new();
        for (field, result) in results {
            if let Err(e) = result {
                failures.push((field, e));
            }
        }
        failures
    }
}

/// Partial configuration update; absent fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuneRequest {
    pub center_frequency: Option<u64>,
    pub sample_rate: Option<u32>,
    pub gain: Option<f32>,
    pub ppm: Option<i32>,
    pub threshold_dbfs: Option<f32>,
    pub min_burst_duration: Option<f32>,
}

impl TuneRequest {
    pub fn is_empty(&self) -> bool {
        self == &TuneRequest::default()
    }

    /// Apply the supplied fields to `handle` and `config`, one at a time.
    ///
    /// A hardware field only lands in `config` if the handle accepted it.
    pub fn apply(&self, config: &mut DeviceConfig, handle: &mut dyn RadioHandle) -> TuneReport {
        let mut report = TuneReport::default();

        if let Some(hz) = self.center_frequency {
            let result = handle.set_center_frequency(hz);
            report.push(
                TuneField::CenterFrequency,
                format!("{:.3}MHz", config.center_frequency as f64 / 1e6),
                format!("{:.3}MHz", hz as f64 / 1e6),
                &result,
            );
            if result.is_ok() {
                config.center_frequency = hz;
            }
        }

        if let Some(db) = self.gain {
            let result = handle.set_gain(db);
            report.push(TuneField::Gain, format!("{}dB", config.gain), format!("{}dB", db), &result);
            if result.is_ok() {
                config.gain = db;
            }
        }

        if let Some(hz) = self.sample_rate {
            let result = handle.set_sample_rate(hz);
            report.push(
                TuneField::SampleRate,
                format!("{:.3}MHz", config.sample_rate as f64 / 1e6),
                format!("{:.3}MHz", hz as f64 / 1e6),
                &result,
            );
            if result.is_ok() {
                config.sample_rate = hz;
            }
        }

        if let Some(ppm) = self.ppm {
            let result = handle.set_freq_correction(ppm);
            report.push(TuneField::Ppm, config.ppm.to_string(), ppm.to_string(), &result);
            if result.is_ok() {
                config.ppm = ppm;
            }
        }

        // Software-only fields always apply
        if let Some(threshold) = self.threshold_dbfs {
            report.push(
                TuneField::Threshold,
                format!("{}dBFS", config.threshold_dbfs),
                format!("{}dBFS", threshold),
                &Ok(()),
            );
            config.threshold_dbfs = threshold;
        }

        if let Some(secs) = self.min_burst_duration {
            report.push(
                TuneField::MinBurstDuration,
                format!("{}s", config.min_burst_duration),
                format!("{}s", secs),
                &Ok(()),
            );
            config.min_burst_duration = secs;
        }

        report
    }
}

/// Tunable fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TuneField {
    CenterFrequency,
    SampleRate,
    Gain,
    Ppm,
    Threshold,
    MinBurstDuration,
}

impl fmt::Display for TuneField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TuneField::CenterFrequency => "Frequency",
            TuneField::SampleRate => "Sample rate",
            TuneField::Gain => "Gain",
            TuneField::Ppm => "PPM",
            TuneField::Threshold => "Threshold",
            TuneField::MinBurstDuration => "Min burst duration",
        };
        f.write_str(label)
    }
}

/// Outcome of one field of a tune request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: TuneField,
    pub from: String,
    pub to: String,
    /// Driver error text if the field was rejected
    pub error: Option<String>,
}

impl FieldChange {
    pub fn applied(&self) -> bool {
        self.error.is_none()
    }
}

impl fmt::Display for FieldChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            None => write!(f, "{}: {} → {}", self.field, self.from, self.to),
            Some(e) => write!(f, "{}: {} → {} failed ({})", self.field, self.from, self.to, e),
        }
    }
}

/// Per-field results of a tune request, in application order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TuneReport {
    pub changes: Vec<FieldChange>,
}

impl TuneReport {
    fn push(&mut self, field: TuneField, from: String, to: String, result: &Result<(), DriverError>) {
        self.changes.push(FieldChange {
            field,
            from,
            to,
            error: result.as_ref().err().map(|e| e.to_string()),
        });
    }

    pub fn all_applied(&self) -> bool {
        self.changes.iter().all(FieldChange::applied)
    }

    pub fn failed(&self) -> impl Iterator<Item = &FieldChange> {
        self.changes.iter().filter(|c| !c.applied())
    }

    /// Human-readable summary, e.g. `Frequency: 433.920MHz → 434.000MHz, Gain: 40dB → 30dB`
    pub fn summary(&self) -> String {
        self.changes
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}
