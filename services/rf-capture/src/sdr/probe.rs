//! Device discovery by probing the `rtl_test` tool
//!
//! Used when the library path finds nothing (missing permissions on the
//! USB node, a kernel DVB driver holding the dongle, ...). `rtl_test -t`
//! prints the device listing on stderr, e.g.
//!
//! ```text
//! Found 1 device(s):
//!   0:  Realtek, RTL2838UHIDIR, SN: 00000001
//! ```

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::BufRead;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, RecvTimeoutError};
use tracing::{debug, info, warn};

use super::DeviceDescriptor;

/// Sanitize a string to only contain printable ASCII characters
fn sanitize_string(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Generate a hash-based serial from the identity strings
fn generate_device_hash(manufacturer: &str, product: &str, device_index: u32) -> String {
    let mut hasher = DefaultHasher::new();
    manufacturer.hash(&mut hasher);
    product.hash(&mut hasher);
    device_index.hash(&mut hasher);
    format!("{:08X}", hasher.finish() as u32)
}

/// Parse one listing line: `INDEX:  MANUFACTURER, PRODUCT, SN: SERIAL`
pub fn parse_device_line(line: &str) -> Option<DeviceDescriptor> {
    let (index, info) = line.trim().split_once(':')?;
    let index: u32 = index.trim().parse().ok()?;

    let fields: Vec<&str> = info.split(',').collect();
    let manufacturer = fields.first().map(|f| sanitize_string(f)).unwrap_or_default();
    let product = fields.get(1).map(|f| sanitize_string(f)).unwrap_or_default();
    let raw_serial = fields
        .get(2)
        .and_then(|f| f.trim().strip_prefix("SN:"))
        .map(sanitize_string)
        .unwrap_or_default();

    if manufacturer.is_empty() && product.is_empty() {
        return None;
    }

    // Cheap dongles all ship with serial 00000001
    let serial = if raw_serial.is_empty() || raw_serial == "00000001" {
        debug!("Device {} serial '{}' is default/empty, using hash", index, raw_serial);
        generate_device_hash(&manufacturer, &product, index)
    } else {
        raw_serial
    };

    let name = format!("{} {}", manufacturer, product).trim().to_string();
    Some(DeviceDescriptor { index, name, serial })
}

/// Run `rtl_test -t` and collect the device listing.
///
/// Never waits longer than `timeout`; the child is killed once the listing
/// has been read or the deadline passes. Any failure yields an empty list.
pub fn probe_devices(tool: &str, timeout: Duration) -> Vec<DeviceDescriptor> {
    let mut cmd = Command::new(tool);
    cmd.arg("-t").stdout(Stdio::null()).stderr(Stdio::piped());

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to run {}: {}", tool, e);
            return Vec::new();
        }
    };

    let stderr = match child.stderr.take() {
        Some(s) => s,
        None => {
            let _ = child.kill();
            return Vec::new();
        }
    };

    let (line_tx, line_rx) = unbounded::<String>();
    thread::spawn(move || {
        let reader = std::io::BufReader::new(stderr);
        for line in reader.lines().map_while(Result::ok) {
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    let deadline = Instant::now() + timeout;
    let mut devices = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match line_rx.recv_timeout(remaining) {
            Ok(line) => {
                if let Some(device) = parse_device_line(&line) {
                    info!("Found device via {}: [{}] {} (SN: {})", tool, device.index, device.name, device.serial);
                    devices.push(device);
                }
                // The listing is complete once the tool picks a device
                if line.trim().starts_with("Using device") || line.contains("No supported devices") {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                debug!("{} probe hit its {:?} deadline", tool, timeout);
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let _ = child.kill();
    let _ = child.wait();
    devices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_line() {
        let device = parse_device_line("  1:  Realtek, RTL2838UHIDIR, SN: 77771111153705700").unwrap();
        assert_eq!(device.index, 1);
        assert_eq!(device.name, "Realtek RTL2838UHIDIR");
        assert_eq!(device.serial, "77771111153705700");
    }

    #[test]
    fn test_default_serial_is_hashed() {
        let a = parse_device_line("  0:  Realtek, RTL2838UHIDIR, SN: 00000001").unwrap();
        let b = parse_device_line("  1:  Realtek, RTL2838UHIDIR, SN: 00000001").unwrap();
        assert_eq!(a.serial.len(), 8);
        assert_ne!(a.serial, "00000001");
        assert_ne!(a.serial, b.serial);
    }

    #[test]
    fn test_parse_rejects_other_lines() {
        assert!(parse_device_line("Found 1 device(s):").is_none());
        assert!(parse_device_line("Using device 0: Generic RTL2832U OEM").is_none());
        assert!(parse_device_line("").is_none());
    }

    #[test]
    fn test_missing_tool_yields_empty_list() {
        let devices = probe_devices("/nonexistent/rtl_test", Duration::from_millis(200));
        assert!(devices.is_empty());
    }
}
