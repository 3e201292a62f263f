//! Read failures, reconnect and the fatal path

mod helpers;

use std::sync::atomic::Ordering;
use std::time::Duration;

use helpers::{fast_settings, wait_for, ScriptedDriver};
use rf_capture::{DeviceConfig, DeviceManager, DeviceState};

#[test]
fn test_read_failures_reconnect_then_error() {
    let dir = tempfile::tempdir().unwrap();
    let (driver, script) = ScriptedDriver::new(&[0]);
    // Every handle fails all reads; only the first open succeeds
    script.fail_reads_after(0);
    script.fail_opens_after(1);

    let manager = DeviceManager::new(driver, fast_settings(dir.path()));
    manager.discover();
    manager.start_scan(0, DeviceConfig::default()).unwrap();

    let device = manager.device(0).unwrap();
    assert!(wait_for(Duration::from_secs(3), || device.state() == DeviceState::Error));
    assert!(wait_for(Duration::from_secs(1), || !device.is_scanning()));

    // 5 failed reads, then 3 bounded reconnect attempts
    assert_eq!(script.failed_reads.load(Ordering::SeqCst), 5);
    assert_eq!(script.opens.load(Ordering::SeqCst), 1 + 3);

    let info = manager.get_device_info(0).unwrap();
    assert_eq!(info.stats.read_errors, 5);
    assert_eq!(info.stats.reconnects, 1);
    assert!(info.last_error.unwrap().contains("reconnect failed after 3 attempts"));
    assert_eq!(script.open_handles.load(Ordering::SeqCst), 0);
}

#[test]
fn test_reconnect_resumes_acquisition() {
    let dir = tempfile::tempdir().unwrap();
    let (driver, script) = ScriptedDriver::new(&[0]);
    // Each handle delivers 3 blocks, then fails; reopening yields a fresh handle
    script.fail_reads_after(3);

    let manager = DeviceManager::new(driver, fast_settings(dir.path()));
    manager.discover();
    manager.start_scan(0, DeviceConfig::default()).unwrap();

    assert!(wait_for(Duration::from_secs(3), || script.opens.load(Ordering::SeqCst) >= 3));
    let device = manager.device(0).unwrap();
    assert_eq!(device.state(), DeviceState::Scanning);
    assert!(device.stats().reconnects >= 2);
    assert!(device.stats().blocks_read >= 6);

    manager.stop_scan(0).unwrap();
    assert_eq!(script.open_handles.load(Ordering::SeqCst), 0);
}

#[test]
fn test_error_state_recovers_with_explicit_start() {
    let dir = tempfile::tempdir().unwrap();
    let (driver, script) = ScriptedDriver::new(&[0]);
    script.fail_reads_after(0);
    script.fail_opens_after(1);

    let manager = DeviceManager::new(driver, fast_settings(dir.path()));
    manager.discover();
    manager.start_scan(0, DeviceConfig::default()).unwrap();
    let device = manager.device(0).unwrap();
    assert!(wait_for(Duration::from_secs(3), || device.state() == DeviceState::Error));

    // Hardware is back
    *script.reads_before_failure.lock().unwrap() = None;
    *script.opens_before_failure.lock().unwrap() = None;

    manager.start_scan(0, DeviceConfig::default()).unwrap();
    assert_eq!(device.state(), DeviceState::Scanning);
    let reads = script.reads.load(Ordering::SeqCst);
    assert!(wait_for(Duration::from_secs(2), || script.reads.load(Ordering::SeqCst) > reads));
    manager.stop_scan(0).unwrap();
}

#[test]
fn test_silence_timeout_triggers_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    let (driver, script) = ScriptedDriver::new(&[0]);
    script.fail_reads_after(0);
    script.fail_opens_after(1);

    // Error budget is out of reach; only the silence window can escalate
    let settings = rf_capture::AcquisitionSettings {
        max_read_errors: 1_000_000,
        silence_timeout_ms: 150,
        read_backoff_ms: 20,
        ..fast_settings(dir.path())
    };
    let manager = DeviceManager::new(driver, settings);
    manager.discover();
    manager.start_scan(0, DeviceConfig::default()).unwrap();

    let device = manager.device(0).unwrap();
    assert!(wait_for(Duration::from_secs(2), || device.state() == DeviceState::Error));
    assert!(wait_for(Duration::from_secs(1), || !device.is_scanning()));

    assert!(script.failed_reads.load(Ordering::SeqCst) < 100);
    assert_eq!(script.opens.load(Ordering::SeqCst), 1 + 3);

    let info = manager.get_device_info(0).unwrap();
    assert_eq!(info.stats.reconnects, 1);
    let last_error = info.last_error.unwrap();
    assert!(last_error.starts_with("device 0 failed: "));
    assert!(last_error.contains("reconnect failed after 3 attempts"));
    assert_eq!(script.open_handles.load(Ordering::SeqCst), 0);
}
