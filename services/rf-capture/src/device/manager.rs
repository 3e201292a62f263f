//! Device manager - discovery and the index → device registry
//!
//! The map lock is held only for lookups and mutation, never across a
//! hardware call. Lifecycle calls run on an `Arc<Device>` cloned out of the
//! map and are serialized by the device's own lifecycle lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crossbeam_channel::Receiver;
use tracing::{error, info, warn};

use crate::config::AcquisitionSettings;
use crate::dsp::FftFrame;
use crate::error::{CaptureError, Result};
use crate::events::{BurstRecord, DeviceEvent};
use crate::sdr::RadioDriver;

use super::config::{DeviceConfig, TuneReport, TuneRequest};
use super::history::WaterfallRow;
use super::state::{DeviceInfo, DeviceSummary};
use super::{lock, read, write, Device};

/// Owns every known device
pub struct DeviceManager {
    driver: Arc<dyn RadioDriver>,
    settings: AcquisitionSettings,
    devices: Mutex<HashMap<u32, Arc<Device>>>,
    info_cache: RwLock<Vec<DeviceInfo>>,
}

impl DeviceManager {
    pub fn new(driver: Arc<dyn RadioDriver>, settings: AcquisitionSettings) -> Self {
        Self {
            driver,
            settings,
            devices: Mutex::new(HashMap::new()),
            info_cache: RwLock::new(Vec::new()),
        }
    }

    pub fn settings(&self) -> &AcquisitionSettings {
        &self.settings
    }

    /// Enumerate attached radios and reconcile the registry with them.
    ///
    /// Enumeration failure is logged and treated as "no devices". New
    /// indices get a device, vanished ones are removed and stopped, and
    /// surviving ones keep running. Returns the sorted index list.
    pub fn discover(&self) -> Vec<u32> {
        let found = match self.driver.enumerate() {
            Ok(found) => found,
            Err(e) => {
                let err = CaptureError::Enumeration(e.to_string());
                error!("{}", err);
                Vec::new()
            }
        };

        let removed: Vec<Arc<Device>> = {
            let mut devices = lock(&self.devices);

            let present: Vec<u32> = found.iter().map(|d| d.index).collect();
            let vanished: Vec<u32> = devices
                .keys()
                .copied()
                .filter(|index| !present.contains(index))
                .collect();

            for descriptor in found {
                match devices.get(&descriptor.index) {
                    Some(device) => device.update_identity(descriptor),
                    None => {
                        info!(
                            "Found device {}: {} (SN: {})",
                            descriptor.index, descriptor.name, descriptor.serial
                        );
                        let index = descriptor.index;
                        let device = Device::new(descriptor, self.driver.clone(), self.settings.clone());
                        devices.insert(index, Arc::new(device));
                    }
                }
            }

            vanished.iter().filter_map(|index| devices.remove(index)).collect()
        };

        // Stop outside the map lock
        for device in removed {
            warn!("Device {} is no longer present, removing", device.index());
            if let Err(e) = device.stop() {
                warn!("Failed to stop removed device {}: {}", device.index(), e);
            }
        }

        self.get_all_device_info();
        let indices = self.indices();
        info!("Discovered {} device(s) via {} driver", indices.len(), self.driver.name());
        indices
    }

    /// Sorted list of registered indices
    pub fn indices(&self) -> Vec<u32> {
        let mut indices: Vec<u32> = lock(&self.devices).keys().copied().collect();
        indices.sort_unstable();
        indices
    }

    pub fn device(&self, index: u32) -> Option<Arc<Device>> {
        lock(&self.devices).get(&index).cloned()
    }

    fn require(&self, index: u32) -> Result<Arc<Device>> {
        self.device(index).ok_or(CaptureError::NotFound(index))
    }

    /// Devices sorted by index
    fn snapshot(&self) -> Vec<Arc<Device>> {
        let mut devices: Vec<Arc<Device>> = lock(&self.devices).values().cloned().collect();
        devices.sort_by_key(|d| d.index());
        devices
    }

    /// Start scanning on `index`, discovering first if the index is unknown
    pub fn start_scan(&self, index: u32, config: DeviceConfig) -> Result<()> {
        let device = match self.device(index) {
            Some(device) => device,
            None => {
                info!("Device {} not registered, rescanning", index);
                self.discover();
                self.require(index)?
            }
        };

        let result = device.start(config);
        self.refresh_cached(&device);
        result
    }

    pub fn stop_scan(&self, index: u32) -> Result<()> {
        let device = self.require(index)?;
        let result = device.stop();
        self.refresh_cached(&device);
        result
    }

    pub fn tune(&self, index: u32, request: &TuneRequest) -> Result<TuneReport> {
        let device = self.require(index)?;
        let result = device.tune(request);
        self.refresh_cached(&device);
        result
    }

    pub fn list_devices(&self) -> Vec<DeviceSummary> {
        self.snapshot().iter().map(|d| d.summary()).collect()
    }

    pub fn get_device_info(&self, index: u32) -> Result<DeviceInfo> {
        Ok(self.require(index)?.info())
    }

    /// Fresh snapshot of every device; refreshes the cache
    pub fn get_all_device_info(&self) -> Vec<DeviceInfo> {
        let infos: Vec<DeviceInfo> = self.snapshot().iter().map(|d| d.info()).collect();
        *write(&self.info_cache) = infos.clone();
        infos
    }

    /// Last published snapshot; touches no device
    pub fn get_all_device_info_cached(&self) -> Vec<DeviceInfo> {
        read(&self.info_cache).clone()
    }

    fn refresh_cached(&self, device: &Device) {
        let info = device.info();
        let mut cache = write(&self.info_cache);
        match cache.iter_mut().find(|i| i.index == info.index) {
            Some(slot) => *slot = info,
            None => {
                cache.push(info);
                cache.sort_by_key(|i| i.index);
            }
        }
    }

    pub fn latest_fft(&self, index: u32) -> Result<Option<FftFrame>> {
        Ok(self.require(index)?.latest_fft())
    }

    pub fn waterfall(&self, index: u32) -> Result<Vec<WaterfallRow>> {
        Ok(self.require(index)?.waterfall())
    }

    /// Bursts of one device, oldest first
    pub fn bursts(&self, index: u32) -> Result<Vec<BurstRecord>> {
        Ok(self.require(index)?.bursts())
    }

    /// Bursts of every device, newest first
    pub fn all_bursts(&self) -> Vec<BurstRecord> {
        let mut bursts: Vec<BurstRecord> = self.snapshot().iter().flat_map(|d| d.bursts()).collect();
        bursts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        bursts
    }

    /// Receivers for every device's outbound channel
    pub fn event_sources(&self) -> Vec<(u32, Receiver<DeviceEvent>)> {
        self.snapshot()
            .iter()
            .map(|d| (d.index(), d.event_source()))
            .collect()
    }

    /// Stop every device
    pub fn shutdown(&self) {
        info!("Shutting down {} device(s)", lock(&self.devices).len());
        for device in self.snapshot() {
            if let Err(e) = device.stop() {
                warn!("Failed to stop device {}: {}", device.index(), e);
            }
        }
        self.get_all_device_info();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdr::{SimulatedDriver, SimulatedScene};

    fn manager(count: u32) -> DeviceManager {
        DeviceManager::new(
            Arc::new(SimulatedDriver::new(count, SimulatedScene::default())),
            AcquisitionSettings::default(),
        )
    }

    #[test]
    fn test_discover_is_idempotent() {
        let manager = manager(2);
        assert_eq!(manager.discover(), vec![0, 1]);
        let first = manager.device(0).unwrap();
        assert_eq!(manager.discover(), vec![0, 1]);
        // Existing entries are kept, not replaced
        assert!(Arc::ptr_eq(&first, &manager.device(0).unwrap()));
    }

    #[test]
    fn test_unknown_device_is_not_found() {
        let manager = manager(1);
        manager.discover();
        assert!(matches!(manager.stop_scan(7), Err(CaptureError::NotFound(7))));
        assert!(matches!(
            manager.start_scan(7, DeviceConfig::default()),
            Err(CaptureError::NotFound(7))
        ));
        assert!(manager.get_device_info(7).is_err());
    }

    #[test]
    fn test_cached_info_without_discover_is_empty() {
        let manager = manager(2);
        assert!(manager.get_all_device_info_cached().is_empty());
        manager.discover();
        let cached = manager.get_all_device_info_cached();
        assert_eq!(cached.len(), 2);
        assert_eq!(cached[0].serial, "SIM00000");
    }
}
