//! Radio driver binding
//!
//! The core talks to hardware only through [`RadioDriver`] and [`RadioHandle`].
//! Every call is blocking and independently fallible:
//! 1. `enumerate()` lists candidate device indices
//! 2. `open(index)` binds a handle
//! 3. the four setters tune the handle
//! 4. `read_samples(count)` blocks until a full block arrives
//! 5. `close()` releases the handle

pub mod probe;
#[cfg(feature = "rtlsdr")]
pub mod rtlsdr;
pub mod simulated;

use num_complex::Complex32;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use simulated::{SimulatedDriver, SimulatedScene};

/// One block of complex baseband samples
pub type IqBlock = Vec<Complex32>;

/// What enumeration knows about a device before it is opened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub index: u32,
    pub name: String,
    pub serial: String,
}

impl DeviceDescriptor {
    /// Descriptor with placeholder identity strings
    pub fn unnamed(index: u32) -> Self {
        Self {
            index,
            name: "RTL-SDR".to_string(),
            serial: "unknown".to_string(),
        }
    }
}

/// Errors reported by a driver binding
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("no device at index {0}")]
    NotFound(u32),

    #[error("device busy: {0}")]
    Busy(String),

    #[error("USB error: {0}")]
    Usb(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("handle is closed")]
    Closed,

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Enumerates and opens radios
pub trait RadioDriver: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// List devices currently attached. Best effort.
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, DriverError>;

    /// Open the device at `index`
    fn open(&self, index: u32) -> Result<Box<dyn RadioHandle>, DriverError>;
}

/// An open radio
pub trait RadioHandle: Send {
    fn set_center_frequency(&mut self, hz: u64) -> Result<(), DriverError>;

    fn set_sample_rate(&mut self, hz: u32) -> Result<(), DriverError>;

    fn set_gain(&mut self, db: f32) -> Result<(), DriverError>;

    fn set_freq_correction(&mut self, ppm: i32) -> Result<(), DriverError>;

    /// Blocking read of exactly `count` complex samples
    fn read_samples(&mut self, count: usize) -> Result<IqBlock, DriverError>;

    /// Release the device
    fn close(self: Box<Self>) {}
}

/// Coarse classification of a failed read, used for logging and counting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadFault {
    /// Device vanished from the bus
    Disconnected,
    /// Transfer timed out; device busy or unresponsive
    Timeout,
    /// Lost lock/sync or buffer overflow
    Sync,
    /// Anything else
    Other,
}

impl ReadFault {
    /// Classify a driver error by variant, then by message pattern
    pub fn classify(err: &DriverError) -> Self {
        match err {
            DriverError::NotFound(_) | DriverError::Closed => return ReadFault::Disconnected,
            DriverError::Timeout(_) => return ReadFault::Timeout,
            _ => {}
        }

        let msg = err.to_string().to_lowercase();
        if msg.contains("no such device")
            || msg.contains("no such file")
            || msg.contains("usb transfer")
            || msg.contains("disconnected")
            || msg.contains("pipe")
        {
            ReadFault::Disconnected
        } else if msg.contains("timeout") || msg.contains("timed out") {
            ReadFault::Timeout
        } else if msg.contains("sync") || msg.contains("lock") || msg.contains("overflow") {
            ReadFault::Sync
        } else {
            ReadFault::Other
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            ReadFault::Disconnected => "USB communication lost, device may have been unplugged",
            ReadFault::Timeout => "USB timeout, device may be busy or unresponsive",
            ReadFault::Sync => "sample stream lost sync",
            ReadFault::Other => "I/O error",
        }
    }
}

/// Convert interleaved unsigned 8-bit I/Q bytes to normalized complex samples
pub fn cu8_to_complex(data: &[u8]) -> IqBlock {
    data.chunks_exact(2)
        .map(|iq| {
            Complex32::new(
                (iq[0] as f32 - 127.5) / 127.5,
                (iq[1] as f32 - 127.5) / 127.5,
            )
        })
        .collect()
}
