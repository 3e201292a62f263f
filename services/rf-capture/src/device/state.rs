//! Per-device state tracking

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use super::config::DeviceConfig;

/// Lifecycle state of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    /// Never opened since discovery
    Disconnected,
    /// Opening the radio
    Connecting,
    /// Not acquiring; the handle may still be open after a tune, stop releases it
    Idle,
    /// Acquisition thread running
    Scanning,
    /// Connect or reconnect failed; needs an explicit start
    Error,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceState::Disconnected => "disconnected",
            DeviceState::Connecting => "connecting",
            DeviceState::Idle => "idle",
            DeviceState::Scanning => "scanning",
            DeviceState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Current state plus the reason for the last failure
#[derive(Debug, Clone)]
pub(crate) struct Status {
    pub state: DeviceState,
    pub last_error: Option<String>,
}

impl Default for Status {
    fn default() -> Self {
        Self {
            state: DeviceState::Disconnected,
            last_error: None,
        }
    }
}

/// Runtime counters for a single device
#[derive(Debug, Default)]
pub struct DeviceStats {
    pub blocks_read: AtomicU64,
    pub read_errors: AtomicU64,
    pub reconnects: AtomicU64,
    pub bursts_detected: AtomicU64,
    pub events_dropped: AtomicU64,
}

impl DeviceStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_block(&self) {
        self.blocks_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read_error(&self) {
        self.read_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_burst(&self) {
        self.bursts_detected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            blocks_read: self.blocks_read.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            bursts_detected: self.bursts_detected.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`DeviceStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub blocks_read: u64,
    pub read_errors: u64,
    pub reconnects: u64,
    pub bursts_detected: u64,
    pub events_dropped: u64,
}

/// Published view of a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub index: u32,
    pub name: String,
    pub serial: String,
    pub status: DeviceState,
    pub last_error: Option<String>,
    pub config: DeviceConfig,
    /// Raw sample blocks currently buffered
    pub buffered_blocks: usize,
    /// Bursts currently in history
    pub burst_count: usize,
    pub stats: StatsSnapshot,
}

/// Short listing entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub index: u32,
    pub name: String,
    pub serial: String,
    pub status: DeviceState,
}

impl From<&DeviceInfo> for DeviceSummary {
    fn from(info: &DeviceInfo) -> Self {
        Self {
            index: info.index,
            name: info.name.clone(),
            serial: info.serial.clone(),
            status: info.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_snapshot() {
        let stats = DeviceStats::new();
        stats.record_block();
        stats.record_block();
        stats.record_read_error();
        stats.record_dropped();

        let snap = stats.snapshot();
        assert_eq!(snap.blocks_read, 2);
        assert_eq!(snap.read_errors, 1);
        assert_eq!(snap.events_dropped, 1);
        assert_eq!(snap.reconnects, 0);
    }

    #[test]
    fn test_state_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&DeviceState::Scanning).unwrap(), "\"scanning\"");
        assert_eq!(DeviceState::Error.to_string(), "error");
    }
}
