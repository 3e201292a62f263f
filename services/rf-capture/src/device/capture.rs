//! Acquisition loop (runs in a dedicated thread per device)

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::dsp::{block_duration, detect_peak, SpectrumAnalyzer};
use crate::error::CaptureError;
use crate::events::{new_burst_id, BurstRecord, DeviceEvent};
use crate::sdr::{DriverError, IqBlock, ReadFault};

use super::config::DeviceConfig;
use super::DeviceShared;

/// Longest single sleep, so a stop request is noticed promptly
const PAUSE_SLICE: Duration = Duration::from_millis(50);

/// Main acquisition loop. Returns when stopped, superseded, or after a
/// failed reconnect.
pub(super) fn run(shared: Arc<DeviceShared>, epoch: u64) {
    let index = shared.index;
    let settings = shared.settings.clone();
    let max_errors = settings.max_read_errors.max(1);

    info!("Device {}: acquisition thread started", index);

    let mut analyzer = SpectrumAnalyzer::new();
    let mut consecutive_errors = 0u32;
    let mut last_success = Instant::now();
    let mut last_stats_time = Instant::now();
    let mut fatal: Option<CaptureError> = None;

    while shared.is_current(epoch) {
        let config = shared.config();

        let result = shared.read_block(settings.block_size).and_then(|block| {
            if block.is_empty() {
                Err(DriverError::Timeout("no samples returned".to_string()))
            } else {
                Ok(block)
            }
        });

        match result {
            Ok(block) => {
                consecutive_errors = 0;
                last_success = Instant::now();
                shared.stats.record_block();

                process_block(&shared, &mut analyzer, &config, block);

                // Periodic stats logging (every 10 seconds)
                if last_stats_time.elapsed() >= Duration::from_secs(10) {
                    let stats = shared.stats.snapshot();
                    info!(
                        "[Device {} Stats] Blocks: {} | Bursts: {} | Read errors: {} | Dropped events: {}",
                        index, stats.blocks_read, stats.bursts_detected, stats.read_errors, stats.events_dropped
                    );
                    last_stats_time = Instant::now();
                }

                pause(&shared, epoch, settings.yield_interval());
            }
            Err(e) => {
                if !shared.is_current(epoch) {
                    break;
                }
                consecutive_errors += 1;
                shared.stats.record_read_error();
                let fault = ReadFault::classify(&e);
                let err = CaptureError::Io { index, source: e };
                warn!(
                    "Device {}: read failed ({}/{}): {}: {}",
                    index,
                    consecutive_errors,
                    max_errors,
                    fault.describe(),
                    err
                );

                let silent_for = last_success.elapsed();
                if consecutive_errors >= max_errors || silent_for >= settings.silence_timeout() {
                    if silent_for >= settings.silence_timeout() {
                        warn!("Device {}: no samples for {:?}", index, silent_for);
                    }
                    match reconnect(&shared, epoch) {
                        Ok(()) => {
                            consecutive_errors = 0;
                            last_success = Instant::now();
                        }
                        Err(err) => {
                            fatal = Some(err);
                            break;
                        }
                    }
                } else {
                    pause(&shared, epoch, settings.read_backoff() * consecutive_errors);
                }
            }
        }
    }

    // A superseded thread must not touch the handle its successor owns
    if shared.epoch_matches(epoch) {
        shared.close_handle();
    }

    match fatal {
        Some(err) => {
            shared.stop_running();
            shared.fail(err.to_string());
        }
        None => info!("Device {}: acquisition thread stopped", index),
    }
}

/// Spectrum, waterfall, FFT event, then burst detection and capture
fn process_block(shared: &DeviceShared, analyzer: &mut SpectrumAnalyzer, config: &DeviceConfig, block: IqBlock) {
    let index = shared.index;

    let frame = match analyzer.compute(index, &block, config.center_frequency, config.sample_rate) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Device {}: {}", index, e);
            shared.push_block(block);
            return;
        }
    };

    let peak = detect_peak(&frame, config.threshold_dbfs);
    let timestamp = frame.timestamp;

    shared.store_frame(&frame);
    shared.publish(DeviceEvent::FftData(frame));

    if let Some(peak) = peak {
        let id = new_burst_id(index, &timestamp);
        let iq_file = shared.recorder.capture(&block, &timestamp, &id);

        let burst = BurstRecord {
            id,
            device_index: index,
            frequency: peak.frequency,
            power: peak.power_dbfs,
            bandwidth: peak.bandwidth_hz,
            timestamp,
            duration: block_duration(block.len(), config.sample_rate),
            iq_file,
        };

        info!(
            "Burst on device {}: {:.3} MHz | {:.1} dBFS | bw {:.1} kHz | {}",
            index,
            burst.frequency / 1e6,
            burst.power,
            burst.bandwidth / 1e3,
            burst.id
        );

        shared.record_burst(burst.clone());
        shared.publish(DeviceEvent::BurstDetected(burst));
    }

    shared.push_block(block);
}

/// Close, back off, reopen and reapply config, up to the attempt budget
fn reconnect(shared: &DeviceShared, epoch: u64) -> Result<(), CaptureError> {
    let index = shared.index;
    let attempts = shared.settings.reconnect_attempts;
    warn!("Device {}: too many read failures, reconnecting", index);
    shared.stats.record_reconnect();

    let mut last_error = String::from("no reconnect attempts configured");
    for attempt in 1..=attempts {
        pause(shared, epoch, shared.settings.reconnect_backoff() * attempt);
        if !shared.is_current(epoch) {
            return Ok(());
        }

        match shared.reopen() {
            Ok(()) => {
                info!("Device {}: reconnected on attempt {}", index, attempt);
                return Ok(());
            }
            Err(e) => {
                warn!("Device {}: reconnect attempt {}/{} failed: {}", index, attempt, attempts, e);
                last_error = e.to_string();
            }
        }
    }

    Err(CaptureError::Fatal {
        index,
        reason: format!("reconnect failed after {} attempts: {}", attempts, last_error),
    })
}

/// Sleep for `total`, waking early if the thread should exit
fn pause(shared: &DeviceShared, epoch: u64, total: Duration) {
    let deadline = Instant::now() + total;
    loop {
        let now = Instant::now();
        if now >= deadline || !shared.is_current(epoch) {
            return;
        }
        thread::sleep((deadline - now).min(PAUSE_SLICE));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AcquisitionSettings;
    use crate::device::Device;
    use crate::sdr::{SimulatedDriver, SimulatedScene};

    #[test]
    fn test_pause_returns_early_when_stopped() {
        let settings = AcquisitionSettings::default();
        let driver = Arc::new(SimulatedDriver::new(1, SimulatedScene::default()));
        let device = Device::new(crate::sdr::DeviceDescriptor::unnamed(0), driver, settings);

        // Never started, so the epoch is not current
        let started = Instant::now();
        pause(&device.shared, 1, Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
