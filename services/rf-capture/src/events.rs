//! Events published by devices and pushed to subscribers

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dsp::FftFrame;

/// A detected burst. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurstRecord {
    pub id: String,
    pub device_index: u32,
    /// Peak frequency in Hz
    pub frequency: f64,
    /// Peak power in dBFS
    pub power: f32,
    /// Half-power bandwidth in Hz
    pub bandwidth: f64,
    pub timestamp: DateTime<Utc>,
    /// Seconds, derived from block length and sample rate
    pub duration: f64,
    /// File name of the IQ capture, relative to the data directory
    pub iq_file: Option<String>,
}

/// Outbound event, tagged for the wire as `fft_data` / `burst_detected`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceEvent {
    FftData(FftFrame),
    BurstDetected(BurstRecord),
}

impl DeviceEvent {
    pub fn device_index(&self) -> u32 {
        match self {
            DeviceEvent::FftData(frame) => frame.device_index,
            DeviceEvent::BurstDetected(burst) => burst.device_index,
        }
    }

    pub fn is_fft(&self) -> bool {
        matches!(self, DeviceEvent::FftData(_))
    }
}

static BURST_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Generate a burst id such as `burst_1a2b3c4d`
pub fn new_burst_id(device_index: u32, timestamp: &DateTime<Utc>) -> String {
    let mut hasher = DefaultHasher::new();
    device_index.hash(&mut hasher);
    timestamp.timestamp_nanos_opt().unwrap_or_default().hash(&mut hasher);
    BURST_SEQUENCE.fetch_add(1, Ordering::Relaxed).hash(&mut hasher);
    format!("burst_{:08x}", hasher.finish() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_ids_are_distinct() {
        let now = Utc::now();
        let a = new_burst_id(0, &now);
        let b = new_burst_id(0, &now);
        assert!(a.starts_with("burst_"));
        assert_eq!(a.len(), "burst_".len() + 8);
        assert_ne!(a, b);
    }

    #[test]
    fn test_burst_event_wire_format() {
        let event = DeviceEvent::BurstDetected(BurstRecord {
            id: "burst_00c0ffee".to_string(),
            device_index: 1,
            frequency: 433_920_000.0,
            power: -20.0,
            bandwidth: 12_000.0,
            timestamp: Utc::now(),
            duration: 0.128,
            iq_file: None,
        });

        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "burst_detected");
        assert_eq!(json["id"], "burst_00c0ffee");
        assert_eq!(json["device_index"], 1);
        assert!(json["iq_file"].is_null());
        assert_eq!(event.device_index(), 1);
        assert!(!event.is_fft());
    }
}
