//! Async control facade over the device registry
//!
//! Every call runs on the blocking pool under its own time budget, so a
//! stuck USB transfer never stalls the async side. A call that runs out of
//! budget keeps running in the background; only the caller stops waiting.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::config::ControlTimeouts;
use crate::device::{
    DeviceConfig, DeviceInfo, DeviceManager, DeviceSummary, TuneReport, TuneRequest, WaterfallRow,
};
use crate::dsp::FftFrame;
use crate::error::{ControlError, Result};
use crate::events::BurstRecord;

/// Cloneable handle for the network layer
#[derive(Clone)]
pub struct ControlService {
    registry: Arc<DeviceManager>,
    timeouts: ControlTimeouts,
}

impl ControlService {
    pub fn new(registry: Arc<DeviceManager>, timeouts: ControlTimeouts) -> Self {
        Self { registry, timeouts }
    }

    pub fn registry(&self) -> &Arc<DeviceManager> {
        &self.registry
    }

    async fn call<T, F>(&self, operation: &'static str, budget_ms: u64, f: F) -> std::result::Result<T, ControlError>
    where
        T: Send + 'static,
        F: FnOnce(&DeviceManager) -> Result<T> + Send + 'static,
    {
        let registry = self.registry.clone();
        let budget = Duration::from_millis(budget_ms);
        let task = tokio::task::spawn_blocking(move || f(&registry));

        match tokio::time::timeout(budget, task).await {
            Ok(Ok(result)) => result.map_err(ControlError::from),
            Ok(Err(e)) => Err(ControlError::Join {
                operation,
                reason: e.to_string(),
            }),
            Err(_) => {
                warn!("{} timed out after {:?}", operation, budget);
                Err(ControlError::Timeout {
                    operation,
                    after: budget,
                })
            }
        }
    }

    pub async fn list_devices(&self) -> std::result::Result<Vec<DeviceSummary>, ControlError> {
        self.call("list_devices", self.timeouts.info_ms, |r| Ok(r.list_devices()))
            .await
    }

    pub async fn get_device_info(&self, index: u32) -> std::result::Result<DeviceInfo, ControlError> {
        self.call("get_device_info", self.timeouts.info_ms, move |r| r.get_device_info(index))
            .await
    }

    /// With `cached`, returns the last snapshot without touching any device
    pub async fn get_all_device_info(&self, cached: bool) -> std::result::Result<Vec<DeviceInfo>, ControlError> {
        if cached {
            return Ok(self.registry.get_all_device_info_cached());
        }
        self.call("get_all_device_info", self.timeouts.info_ms, |r| {
            Ok(r.get_all_device_info())
        })
        .await
    }

    pub async fn rescan(&self) -> std::result::Result<Vec<u32>, ControlError> {
        self.call("rescan", self.timeouts.discover_ms, |r| Ok(r.discover()))
            .await
    }

    pub async fn start_scan(&self, index: u32, config: DeviceConfig) -> std::result::Result<(), ControlError> {
        self.call("start_scan", self.timeouts.start_ms, move |r| r.start_scan(index, config))
            .await
    }

    pub async fn stop_scan(&self, index: u32) -> std::result::Result<(), ControlError> {
        self.call("stop_scan", self.timeouts.stop_ms, move |r| r.stop_scan(index))
            .await
    }

    pub async fn tune(&self, index: u32, request: TuneRequest) -> std::result::Result<TuneReport, ControlError> {
        self.call("tune", self.timeouts.tune_ms, move |r| r.tune(index, &request))
            .await
    }

    pub async fn latest_fft(&self, index: u32) -> std::result::Result<Option<FftFrame>, ControlError> {
        self.call("latest_fft", self.timeouts.info_ms, move |r| r.latest_fft(index))
            .await
    }

    pub async fn waterfall(&self, index: u32) -> std::result::Result<Vec<WaterfallRow>, ControlError> {
        self.call("waterfall", self.timeouts.info_ms, move |r| r.waterfall(index))
            .await
    }

    pub async fn bursts(&self, index: u32) -> std::result::Result<Vec<BurstRecord>, ControlError> {
        self.call("bursts", self.timeouts.info_ms, move |r| r.bursts(index))
            .await
    }

    pub async fn all_bursts(&self) -> std::result::Result<Vec<BurstRecord>, ControlError> {
        self.call("all_bursts", self.timeouts.info_ms, |r| Ok(r.all_bursts()))
            .await
    }

    /// Stop every device
    pub async fn shutdown(&self) -> std::result::Result<(), ControlError> {
        self.call("shutdown", self.timeouts.stop_ms, |r| {
            r.shutdown();
            Ok(())
        })
        .await
    }
}
