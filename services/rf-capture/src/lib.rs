//! RF Capture - RTL-SDR acquisition core
//!
//! Manages one or more SDR dongles, acquires IQ blocks on dedicated
//! threads, computes power spectra, detects bursts above a threshold and
//! streams the results to async subscribers.
//!
//! Entry points:
//! - [`DeviceManager`]: discovery and per-device lifecycle
//! - [`EventBridge`]: moves device events to subscribed clients
//! - [`ControlService`]: async facade with per-call time budgets

pub mod bridge;
pub mod config;
pub mod device;
pub mod dsp;
pub mod error;
pub mod events;
pub mod recorder;
pub mod sdr;
pub mod service;

pub use bridge::{BridgeTasks, ClientId, EventBridge, StreamRate};
pub use config::{AcquisitionSettings, BridgeSettings, ControlTimeouts};
pub use device::{
    Device, DeviceConfig, DeviceInfo, DeviceManager, DeviceState, DeviceSummary, TuneReport, TuneRequest,
    WaterfallRow,
};
pub use dsp::FftFrame;
pub use error::{CaptureError, ControlError, Result};
pub use events::{BurstRecord, DeviceEvent};
pub use recorder::IqRecorder;
pub use sdr::{DeviceDescriptor, DriverError, RadioDriver, RadioHandle, SimulatedDriver, SimulatedScene};
pub use service::ControlService;
