//! Test helpers: a scripted radio driver and polling utilities
#![allow(dead_code)]

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use num_complex::Complex32;
use rf_capture::sdr::IqBlock;
use rf_capture::{AcquisitionSettings, DeviceDescriptor, DriverError, RadioDriver, RadioHandle};

pub const BLOCK_SIZE: usize = 4096;

/// Knobs and counters shared by a [`ScriptedDriver`] and its handles
#[derive(Default)]
pub struct Script {
    /// Indices reported by `enumerate`
    pub present: Mutex<Vec<u32>>,
    /// Amplitude of a tone at the tuned center frequency (0 = silence)
    pub tone_amplitude: Mutex<f32>,
    /// Successful reads allowed per handle before every read fails
    pub reads_before_failure: Mutex<Option<u64>>,
    /// Opens that succeed before every open fails
    pub opens_before_failure: Mutex<Option<u32>>,
    /// Fail `enumerate` outright
    pub enumeration_fails: AtomicBool,
    /// Reject sample rate changes
    pub reject_sample_rate: AtomicBool,

    pub opens: AtomicU32,
    pub open_handles: AtomicI64,
    pub reads: AtomicU64,
    pub failed_reads: AtomicU64,
    pub reader_threads: Mutex<HashSet<ThreadId>>,
    pub last_center: AtomicU64,
    pub last_gain_tenths: AtomicI64,
}

impl Script {
    pub fn set_present(&self, indices: &[u32]) {
        *self.present.lock().unwrap() = indices.to_vec();
    }

    pub fn set_tone(&self, amplitude: f32) {
        *self.tone_amplitude.lock().unwrap() = amplitude;
    }

    pub fn fail_reads_after(&self, reads: u64) {
        *self.reads_before_failure.lock().unwrap() = Some(reads);
    }

    pub fn fail_opens_after(&self, opens: u32) {
        *self.opens_before_failure.lock().unwrap() = Some(opens);
    }

    pub fn reader_thread_count(&self) -> usize {
        self.reader_threads.lock().unwrap().len()
    }
}

/// Driver whose behaviour is set by the test through [`Script`]
pub struct ScriptedDriver {
    pub script: Arc<Script>,
}

impl ScriptedDriver {
    pub fn new(indices: &[u32]) -> (Arc<Self>, Arc<Script>) {
        let script = Arc::new(Script::default());
        script.set_present(indices);
        let driver = Arc::new(Self { script: script.clone() });
        (driver, script)
    }
}

impl RadioDriver for ScriptedDriver {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, DriverError> {
        if self.script.enumeration_fails.load(Ordering::SeqCst) {
            return Err(DriverError::Usb("LIBUSB_ERROR_ACCESS".to_string()));
        }
        Ok(self
            .script
            .present
            .lock()
            .unwrap()
            .iter()
            .map(|&index| DeviceDescriptor {
                index,
                name: "Scripted RTL2838".to_string(),
                serial: format!("SCR{:03}", index),
            })
            .collect())
    }

    fn open(&self, index: u32) -> Result<Box<dyn RadioHandle>, DriverError> {
        if !self.script.present.lock().unwrap().contains(&index) {
            return Err(DriverError::NotFound(index));
        }
        let opened = self.script.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = *self.script.opens_before_failure.lock().unwrap() {
            if opened >= limit {
                return Err(DriverError::Busy("usb_claim_interface error -6".to_string()));
            }
        }
        self.script.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedHandle {
            script: self.script.clone(),
            reads: 0,
        }))
    }
}

struct ScriptedHandle {
    script: Arc<Script>,
    reads: u64,
}

impl RadioHandle for ScriptedHandle {
    fn set_center_frequency(&mut self, hz: u64) -> Result<(), DriverError> {
        self.script.last_center.store(hz, Ordering::SeqCst);
        Ok(())
    }

    fn set_sample_rate(&mut self, hz: u32) -> Result<(), DriverError> {
        if self.script.reject_sample_rate.load(Ordering::SeqCst) {
            return Err(DriverError::Unsupported(format!("sample rate {} Hz", hz)));
        }
        Ok(())
    }

    fn set_gain(&mut self, db: f32) -> Result<(), DriverError> {
        self.script
            .last_gain_tenths
            .store((db * 10.0).round() as i64, Ordering::SeqCst);
        Ok(())
    }

    fn set_freq_correction(&mut self, _ppm: i32) -> Result<(), DriverError> {
        Ok(())
    }

    fn read_samples(&mut self, count: usize) -> Result<IqBlock, DriverError> {
        self.script.reader_threads.lock().unwrap().insert(thread::current().id());
        thread::sleep(Duration::from_millis(1));

        if let Some(limit) = *self.script.reads_before_failure.lock().unwrap() {
            if self.reads >= limit {
                self.script.failed_reads.fetch_add(1, Ordering::SeqCst);
                return Err(DriverError::Usb("LIBUSB_ERROR_NO_DEVICE: No such device".to_string()));
            }
        }

        self.reads += 1;
        self.script.reads.fetch_add(1, Ordering::SeqCst);
        let amplitude = *self.script.tone_amplitude.lock().unwrap();
        // A constant lands entirely in the center (DC) bin
        Ok(vec![Complex32::new(amplitude, 0.0); count])
    }

    fn close(self: Box<Self>) {
        self.script.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Settings with small blocks and millisecond backoffs
pub fn fast_settings(data_dir: &Path) -> AcquisitionSettings {
    AcquisitionSettings {
        block_size: BLOCK_SIZE,
        data_dir: data_dir.to_path_buf(),
        connect_backoff_ms: 1,
        read_backoff_ms: 1,
        reconnect_backoff_ms: 1,
        yield_interval_ms: 1,
        join_timeout_ms: 2000,
        ..AcquisitionSettings::default()
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
