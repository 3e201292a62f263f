//! One radio and its acquisition thread
//!
//! A [`Device`] moves through `Disconnected → Connecting → Idle → Scanning`,
//! falling to `Error` when a connect or reconnect gives up. Mutating calls
//! (`start`, `stop`, `tune`) are serialized by a per-device lifecycle lock,
//! so at most one acquisition thread exists per device at any time.
//!
//! Lock order: lifecycle, then handle, then any one of the leaf locks
//! (status, config, history, latest frame). The acquisition thread never
//! takes the lifecycle lock.

mod capture;
pub mod config;
pub mod history;
pub mod manager;
pub mod state;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, error, info, warn};

use crate::config::AcquisitionSettings;
use crate::dsp::FftFrame;
use crate::error::{CaptureError, Result};
use crate::events::{BurstRecord, DeviceEvent};
use crate::recorder::IqRecorder;
use crate::sdr::{DeviceDescriptor, DriverError, IqBlock, RadioDriver, RadioHandle};

pub use config::{DeviceConfig, FieldChange, TuneField, TuneReport, TuneRequest};
pub use history::{BoundedHistory, WaterfallRow};
pub use manager::DeviceManager;
pub use state::{DeviceInfo, DeviceState, DeviceStats, DeviceSummary, StatsSnapshot};

use history::DeviceHistory;
use state::Status;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between a [`Device`] and its acquisition thread
pub(crate) struct DeviceShared {
    pub index: u32,
    identity: RwLock<DeviceDescriptor>,
    driver: Arc<dyn RadioDriver>,
    pub settings: AcquisitionSettings,
    pub recorder: IqRecorder,
    status: Mutex<Status>,
    config: RwLock<DeviceConfig>,
    handle: Mutex<Option<Box<dyn RadioHandle>>>,
    running: AtomicBool,
    /// Bumped on every start; a thread whose epoch is stale must exit
    epoch: AtomicU64,
    history: Mutex<DeviceHistory>,
    latest_fft: RwLock<Option<FftFrame>>,
    pub stats: DeviceStats,
    events_tx: Sender<DeviceEvent>,
}

impl DeviceShared {
    pub fn state(&self) -> DeviceState {
        lock(&self.status).state
    }

    pub fn set_state(&self, state: DeviceState) {
        lock(&self.status).state = state;
    }

    /// Enter `Error` and remember why
    pub fn fail(&self, reason: String) {
        error!("Device {} entered error state: {}", self.index, reason);
        let mut status = lock(&self.status);
        status.state = DeviceState::Error;
        status.last_error = Some(reason);
    }

    pub fn config(&self) -> DeviceConfig {
        read(&self.config).clone()
    }

    /// True while the thread started at `epoch` should keep going
    pub fn is_current(&self, epoch: u64) -> bool {
        self.running.load(Ordering::SeqCst) && self.epoch.load(Ordering::SeqCst) == epoch
    }

    pub fn epoch_matches(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    pub fn stop_running(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Open the radio with a bounded number of immediate retries.
    /// Reuses an already open handle.
    fn connect(&self) -> Result<()> {
        let mut handle = lock(&self.handle);
        if handle.is_some() {
            return Ok(());
        }

        let attempts = self.settings.connect_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.driver.open(self.index) {
                Ok(h) => {
                    info!("Device {}: opened via {} driver", self.index, self.driver.name());
                    *handle = Some(h);
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "Device {}: open attempt {}/{} failed: {}",
                        self.index, attempt, attempts, e
                    );
                    last_error = e.to_string();
                    if attempt < attempts {
                        thread::sleep(self.settings.connect_backoff());
                    }
                }
            }
        }

        Err(CaptureError::Connection {
            index: self.index,
            reason: last_error,
        })
    }

    /// Push the stored config to the open handle, field by field
    fn apply_config(&self) {
        let config = self.config();
        let mut handle = lock(&self.handle);
        if let Some(h) = handle.as_deref_mut() {
            let failures = config.apply_to(h);
            for (field, e) in failures {
                let err = CaptureError::Configuration {
                    index: self.index,
                    field: field_name(field),
                    reason: e.to_string(),
                };
                warn!("{}", err);
            }
        }
    }

    /// Release the handle if one is open
    pub fn close_handle(&self) {
        if let Some(h) = lock(&self.handle).take() {
            h.close();
            debug!("Device {}: handle closed", self.index);
        }
    }

    /// Blocking read under the handle lock
    pub fn read_block(&self, count: usize) -> std::result::Result<IqBlock, DriverError> {
        let mut handle = lock(&self.handle);
        match handle.as_deref_mut() {
            Some(h) => h.read_samples(count),
            None => Err(DriverError::Closed),
        }
    }

    /// Close and reopen the radio, then reapply the stored config
    pub fn reopen(&self) -> std::result::Result<(), DriverError> {
        {
            let mut handle = lock(&self.handle);
            if let Some(h) = handle.take() {
                h.close();
            }
            *handle = Some(self.driver.open(self.index)?);
        }
        self.apply_config();
        Ok(())
    }

    /// Non-blocking publish on the outbound channel
    pub fn publish(&self, event: DeviceEvent) {
        match self.events_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.stats.record_dropped();
                debug!(
                    "Device {}: event channel full, dropping {}",
                    self.index,
                    if event.is_fft() { "FFT frame" } else { "burst" }
                );
            }
            Err(TrySendError::Disconnected(_)) => {
                self.stats.record_dropped();
                debug!("Device {}: event channel disconnected", self.index);
            }
        }
    }

    pub fn store_frame(&self, frame: &FftFrame) {
        let row = WaterfallRow {
            timestamp: frame.timestamp,
            power: frame.decimate(self.settings.waterfall_points).power,
        };
        lock(&self.history).waterfall.push(row);
        *write(&self.latest_fft) = Some(frame.clone());
    }

    pub fn record_burst(&self, burst: BurstRecord) {
        self.stats.record_burst();
        lock(&self.history).bursts.push(burst);
    }

    pub fn push_block(&self, block: IqBlock) {
        lock(&self.history).blocks.push(block);
    }
}

fn field_name(field: TuneField) -> &'static str {
    match field {
        TuneField::CenterFrequency => "center_frequency",
        TuneField::SampleRate => "sample_rate",
        TuneField::Gain => "gain",
        TuneField::Ppm => "ppm",
        TuneField::Threshold => "threshold_dbfs",
        TuneField::MinBurstDuration => "min_burst_duration",
    }
}

/// Join `worker`, giving up after `timeout`. Returns false if the thread
/// was left detached.
fn join_bounded(worker: JoinHandle<()>, timeout: Duration, index: u32) -> bool {
    let deadline = Instant::now() + timeout;
    while !worker.is_finished() {
        if Instant::now() >= deadline {
            warn!(
                "Device {}: acquisition thread did not exit within {:?}, detaching",
                index, timeout
            );
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
    if worker.join().is_err() {
        error!("Device {}: acquisition thread panicked", index);
    }
    true
}

#[derive(Default)]
struct Lifecycle {
    worker: Option<JoinHandle<()>>,
}

/// One managed radio
pub struct Device {
    shared: Arc<DeviceShared>,
    lifecycle: Mutex<Lifecycle>,
    events_rx: Receiver<DeviceEvent>,
}

impl Device {
    pub fn new(
        descriptor: DeviceDescriptor,
        driver: Arc<dyn RadioDriver>,
        settings: AcquisitionSettings,
    ) -> Self {
        let (events_tx, events_rx) = bounded(settings.event_channel_capacity.max(1));
        let shared = DeviceShared {
            index: descriptor.index,
            identity: RwLock::new(descriptor),
            driver,
            recorder: IqRecorder::new(settings.data_dir.clone()),
            history: Mutex::new(DeviceHistory::new(&settings)),
            settings,
            status: Mutex::new(Status::default()),
            config: RwLock::new(DeviceConfig::default()),
            handle: Mutex::new(None),
            running: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            latest_fft: RwLock::new(None),
            stats: DeviceStats::new(),
            events_tx,
        };

        Self {
            shared: Arc::new(shared),
            lifecycle: Mutex::new(Lifecycle::default()),
            events_rx,
        }
    }

    pub fn index(&self) -> u32 {
        self.shared.index
    }

    pub fn state(&self) -> DeviceState {
        self.shared.state()
    }

    pub fn config(&self) -> DeviceConfig {
        self.shared.config()
    }

    /// True while an acquisition thread is live
    pub fn is_scanning(&self) -> bool {
        lock(&self.lifecycle)
            .worker
            .as_ref()
            .is_some_and(|w| !w.is_finished())
    }

    /// Refresh name/serial after a rescan
    pub fn update_identity(&self, descriptor: DeviceDescriptor) {
        *write(&self.shared.identity) = descriptor;
    }

    /// Start acquiring with `config`. A no-op if already scanning.
    pub fn start(&self, config: DeviceConfig) -> Result<()> {
        let mut lifecycle = lock(&self.lifecycle);
        let index = self.shared.index;

        if let Some(worker) = lifecycle.worker.take() {
            if !worker.is_finished() && self.shared.state() == DeviceState::Scanning {
                info!("Device {} already scanning", index);
                lifecycle.worker = Some(worker);
                return Ok(());
            }
            // Left over from a loop that hit the fatal path
            join_bounded(worker, self.shared.settings.join_timeout(), index);
        }

        *write(&self.shared.config) = config;
        self.shared.set_state(DeviceState::Connecting);

        if let Err(e) = self.shared.connect() {
            self.shared.fail(e.to_string());
            return Err(e);
        }
        self.shared.apply_config();

        let epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.running.store(true, Ordering::SeqCst);
        self.shared.set_state(DeviceState::Scanning);

        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name(format!("acq-{}", index))
            .spawn(move || capture::run(shared, epoch));

        match spawned {
            Ok(worker) => {
                lifecycle.worker = Some(worker);
                let config = self.shared.config();
                info!(
                    "Device {}: scanning at {:.3} MHz, {:.3} MS/s, gain {:.1} dB, threshold {:.1} dBFS",
                    index,
                    config.center_frequency as f64 / 1e6,
                    config.sample_rate as f64 / 1e6,
                    config.gain,
                    config.threshold_dbfs
                );
                Ok(())
            }
            Err(e) => {
                self.shared.stop_running();
                self.shared.close_handle();
                let err = CaptureError::Spawn(e);
                self.shared.fail(err.to_string());
                Err(err)
            }
        }
    }

    /// Stop acquiring and release the radio. A no-op when nothing is open.
    pub fn stop(&self) -> Result<()> {
        let mut lifecycle = lock(&self.lifecycle);
        let index = self.shared.index;
        self.shared.stop_running();

        let joined = match lifecycle.worker.take() {
            Some(worker) => join_bounded(worker, self.shared.settings.join_timeout(), index),
            None => true,
        };

        if joined {
            self.shared.close_handle();
        } else if let Ok(mut handle) = self.shared.handle.try_lock() {
            // Thread is stuck outside a read; it will see the cleared flag
            if let Some(h) = handle.take() {
                h.close();
            }
        }

        let state = self.shared.state();
        if state != DeviceState::Disconnected {
            self.shared.set_state(DeviceState::Idle);
        }
        info!("Device {}: stopped", index);
        Ok(())
    }

    /// Apply the supplied fields of `request`, connecting first if needed
    pub fn tune(&self, request: &TuneRequest) -> Result<TuneReport> {
        let _lifecycle = lock(&self.lifecycle);
        let index = self.shared.index;

        let needs_connect = lock(&self.shared.handle).is_none();
        if needs_connect {
            if self.shared.state() == DeviceState::Scanning {
                return Err(CaptureError::Connection {
                    index,
                    reason: "device is reconnecting".to_string(),
                });
            }
            self.shared.set_state(DeviceState::Connecting);
            if let Err(e) = self.shared.connect() {
                self.shared.fail(e.to_string());
                return Err(e);
            }
            self.shared.apply_config();
            self.shared.set_state(DeviceState::Idle);
        }

        let mut config = self.shared.config();
        let report = {
            let mut handle = lock(&self.shared.handle);
            let Some(h) = handle.as_deref_mut() else {
                return Err(CaptureError::Connection {
                    index,
                    reason: "handle closed during tune".to_string(),
                });
            };
            request.apply(&mut config, h)
        };
        *write(&self.shared.config) = config;

        for change in report.failed() {
            warn!("Device {}: tune {}", index, change);
        }
        if !report.changes.is_empty() {
            info!("Device {} tuned: {}", index, report.summary());
        }
        Ok(report)
    }

    /// A receiver on this device's outbound event channel
    pub fn event_source(&self) -> Receiver<DeviceEvent> {
        self.events_rx.clone()
    }

    pub fn latest_fft(&self) -> Option<FftFrame> {
        read(&self.shared.latest_fft).clone()
    }

    /// Burst history, oldest first
    pub fn bursts(&self) -> Vec<BurstRecord> {
        lock(&self.shared.history).bursts.to_vec()
    }

    /// Waterfall rows, oldest first
    pub fn waterfall(&self) -> Vec<WaterfallRow> {
        lock(&self.shared.history).waterfall.to_vec()
    }

    /// Most recent raw block
    pub fn latest_block(&self) -> Option<IqBlock> {
        lock(&self.shared.history).blocks.latest().cloned()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn info(&self) -> DeviceInfo {
        let identity = read(&self.shared.identity).clone();
        let status = lock(&self.shared.status).clone();
        let (buffered_blocks, burst_count) = {
            let history = lock(&self.shared.history);
            (history.blocks.len(), history.bursts.len())
        };

        DeviceInfo {
            index: identity.index,
            name: identity.name,
            serial: identity.serial,
            status: status.state,
            last_error: status.last_error,
            config: self.shared.config(),
            buffered_blocks,
            burst_count,
            stats: self.shared.stats.snapshot(),
        }
    }

    pub fn summary(&self) -> DeviceSummary {
        let identity = read(&self.shared.identity);
        DeviceSummary {
            index: identity.index,
            name: identity.name.clone(),
            serial: identity.serial.clone(),
            status: self.shared.state(),
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.shared.stop_running();
    }
}
