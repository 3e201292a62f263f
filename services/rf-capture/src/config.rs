//! Tunables for acquisition, streaming and control calls
//!
//! All structs deserialize with per-field defaults so a partial settings
//! file (or none at all) yields a working configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-device acquisition loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionSettings {
    /// Complex samples per read (also the FFT size)
    pub block_size: usize,

    /// Raw sample blocks kept per device
    pub sample_history: usize,

    /// Burst records kept per device
    pub burst_history: usize,

    /// Waterfall rows kept per device
    pub waterfall_rows: usize,

    /// Points per waterfall row (rows are decimated from the full spectrum)
    pub waterfall_points: usize,

    /// Capacity of each device's outbound event channel
    pub event_channel_capacity: usize,

    /// Directory for IQ captures
    pub data_dir: PathBuf,

    /// Open attempts per connect
    pub connect_attempts: u32,

    /// Fixed pause between open attempts in milliseconds
    pub connect_backoff_ms: u64,

    /// Consecutive read failures before the reconnect path runs
    pub max_read_errors: u32,

    /// Base of the incremental backoff between failed reads in milliseconds
    pub read_backoff_ms: u64,

    /// Longest tolerated gap between successful reads in milliseconds
    pub silence_timeout_ms: u64,

    /// Reconnect attempts after a fatal read condition
    pub reconnect_attempts: u32,

    /// Base of the incremental reconnect backoff in milliseconds
    pub reconnect_backoff_ms: u64,

    /// Pause after each processed block in milliseconds
    pub yield_interval_ms: u64,

    /// Upper bound on joining the acquisition thread during stop
    pub join_timeout_ms: u64,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            block_size: 256 * 1024,
            sample_history: 10,
            burst_history: 1000,
            waterfall_rows: 100,
            waterfall_points: 1024,
            event_channel_capacity: 16,
            data_dir: PathBuf::from("data"),
            connect_attempts: 3,
            connect_backoff_ms: 1000,
            max_read_errors: 5,
            read_backoff_ms: 1000,
            silence_timeout_ms: 30_000,
            reconnect_attempts: 3,
            reconnect_backoff_ms: 1000,
            yield_interval_ms: 10,
            join_timeout_ms: 2000,
        }
    }
}

impl AcquisitionSettings {
    pub fn connect_backoff(&self) -> Duration {
        Duration::from_millis(self.connect_backoff_ms)
    }

    pub fn read_backoff(&self) -> Duration {
        Duration::from_millis(self.read_backoff_ms)
    }

    pub fn silence_timeout(&self) -> Duration {
        Duration::from_millis(self.silence_timeout_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn yield_interval(&self) -> Duration {
        Duration::from_millis(self.yield_interval_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

/// Event bridge settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// Capacity of each subscriber's queue
    pub queue_capacity: usize,

    /// Capacity of each client's outbound sink
    pub sink_capacity: usize,

    /// Events forwarded per client per draining pass
    pub drain_batch: usize,

    /// Pause between draining passes in milliseconds
    pub drain_interval_ms: u64,

    /// FFT emission interval with no clients, in milliseconds
    pub base_delay_ms: u64,

    /// Upper bound of the FFT emission interval in milliseconds
    pub max_delay_ms: u64,

    /// Points per FFT frame sent to clients
    pub max_fft_points: usize,

    /// Period of the streaming task watchdog in milliseconds
    pub watchdog_interval_ms: u64,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            sink_capacity: 64,
            drain_batch: 8,
            drain_interval_ms: 10,
            base_delay_ms: 100,
            max_delay_ms: 1000,
            max_fft_points: 1024,
            watchdog_interval_ms: 2000,
        }
    }
}

impl BridgeSettings {
    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }
}

/// Time budgets for control calls made from the network side
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlTimeouts {
    pub info_ms: u64,
    pub discover_ms: u64,
    pub start_ms: u64,
    pub stop_ms: u64,
    pub tune_ms: u64,
}

impl Default for ControlTimeouts {
    fn default() -> Self {
        Self {
            info_ms: 3000,
            discover_ms: 10_000,
            start_ms: 10_000,
            stop_ms: 5000,
            tune_ms: 5000,
        }
    }
}
