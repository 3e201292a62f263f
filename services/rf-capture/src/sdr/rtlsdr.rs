//! Native RTL-SDR binding (requires the `rtlsdr` feature)
//!
//! Opens dongles through `rtl-sdr-rs`. Enumeration walks the USB bus with
//! `rusb` for known Realtek VID/PID pairs and falls back to probing
//! `rtl_test` when the bus walk finds nothing.

use std::time::Duration;

use rtl_sdr_rs::{RtlSdr, TunerGain};
use rusb::{Context, UsbContext};
use tracing::{debug, info, warn};

use super::probe::probe_devices;
use super::{cu8_to_complex, DeviceDescriptor, DriverError, IqBlock, RadioDriver, RadioHandle};

/// Known RTL-SDR device VID/PID pairs
const KNOWN_DEVICES: &[(u16, u16)] = &[
    (0x0bda, 0x2832), // Realtek RTL2832U
    (0x0bda, 0x2838), // Realtek RTL2838
];

fn is_known_device(vid: u16, pid: u16) -> bool {
    KNOWN_DEVICES.iter().any(|&(v, p)| v == vid && p == pid)
}

fn usb_error(e: impl std::fmt::Display) -> DriverError {
    let msg = e.to_string();
    if msg.contains("Resource busy") || msg.contains("LIBUSB_ERROR_BUSY") {
        DriverError::Busy(msg)
    } else if msg.to_lowercase().contains("timeout") {
        DriverError::Timeout(msg)
    } else {
        DriverError::Usb(msg)
    }
}

/// RTL-SDR driver
pub struct RtlSdrDriver {
    /// Path to `rtl_test` for the fallback probe
    probe_tool: String,
    probe_timeout: Duration,
}

impl RtlSdrDriver {
    pub fn new(probe_tool: impl Into<String>) -> Self {
        Self {
            probe_tool: probe_tool.into(),
            probe_timeout: Duration::from_secs(2),
        }
    }

    fn enumerate_usb(&self) -> Result<Vec<DeviceDescriptor>, rusb::Error> {
        let context = Context::new()?;
        let mut found = Vec::new();

        for device in context.devices()?.iter() {
            let desc = match device.device_descriptor() {
                Ok(d) => d,
                Err(_) => continue,
            };
            if !is_known_device(desc.vendor_id(), desc.product_id()) {
                continue;
            }

            let index = found.len() as u32;
            let mut descriptor = DeviceDescriptor::unnamed(index);

            // Strings need an open handle; without permissions keep placeholders
            match device.open() {
                Ok(handle) => {
                    let manufacturer = desc
                        .manufacturer_string_index()
                        .and_then(|i| handle.read_string_descriptor_ascii(i).ok())
                        .unwrap_or_default();
                    let product = desc
                        .product_string_index()
                        .and_then(|i| handle.read_string_descriptor_ascii(i).ok())
                        .unwrap_or_default();
                    let name = format!("{} {}", manufacturer, product).trim().to_string();
                    if !name.is_empty() {
                        descriptor.name = name;
                    }
                    if let Some(serial) = desc
                        .serial_number_string_index()
                        .and_then(|i| handle.read_string_descriptor_ascii(i).ok())
                    {
                        descriptor.serial = serial;
                    }
                }
                Err(e) => {
                    debug!("Cannot open USB device {:04x}:{:04x} for strings: {}", desc.vendor_id(), desc.product_id(), e);
                }
            }

            found.push(descriptor);
        }

        Ok(found)
    }
}

impl RadioDriver for RtlSdrDriver {
    fn name(&self) -> &'static str {
        "rtlsdr"
    }

    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, DriverError> {
        let devices = match self.enumerate_usb() {
            Ok(devices) => devices,
            Err(e) => {
                warn!("USB enumeration failed: {}", e);
                Vec::new()
            }
        };

        if !devices.is_empty() {
            info!("Found {} RTL-SDR device(s) on USB bus", devices.len());
            return Ok(devices);
        }

        warn!("No RTL-SDR devices found via USB, probing {}", self.probe_tool);
        Ok(probe_devices(&self.probe_tool, self.probe_timeout))
    }

    fn open(&self, index: u32) -> Result<Box<dyn RadioHandle>, DriverError> {
        let mut dev = RtlSdr::open_with_index(index as usize).map_err(usb_error)?;
        dev.reset_buffer().map_err(usb_error)?;
        Ok(Box::new(RtlSdrHandle { dev, buf: Vec::new() }))
    }
}

struct RtlSdrHandle {
    dev: RtlSdr,
    buf: Vec<u8>,
}

impl RadioHandle for RtlSdrHandle {
    fn set_center_frequency(&mut self, hz: u64) -> Result<(), DriverError> {
        let hz = u32::try_from(hz)
            .map_err(|_| DriverError::Unsupported(format!("center frequency {} Hz", hz)))?;
        self.dev.set_center_freq(hz).map_err(usb_error)
    }

    fn set_sample_rate(&mut self, hz: u32) -> Result<(), DriverError> {
        self.dev.set_sample_rate(hz).map_err(usb_error)?;
        // A rate change invalidates whatever is queued in the dongle
        self.dev.reset_buffer().map_err(usb_error)
    }

    fn set_gain(&mut self, db: f32) -> Result<(), DriverError> {
        // rtl-sdr gain is expressed in tenths of a dB
        let tenths = (db * 10.0) as i32;
        self.dev
            .set_tuner_gain(TunerGain::Manual(tenths))
            .map_err(usb_error)
    }

    fn set_freq_correction(&mut self, ppm: i32) -> Result<(), DriverError> {
        self.dev.set_freq_correction(ppm).map_err(usb_error)
    }

    fn read_samples(&mut self, count: usize) -> Result<IqBlock, DriverError> {
        let wanted = count * 2;
        self.buf.resize(wanted, 0);

        let mut filled = 0;
        while filled < wanted {
            let n = self
                .dev
                .read_sync(&mut self.buf[filled..])
                .map_err(usb_error)?;
            if n == 0 {
                return Err(DriverError::Usb("USB transfer error: short read".to_string()));
            }
            filled += n;
        }

        Ok(cu8_to_complex(&self.buf[..wanted]))
    }
}
