//! Synthetic radio for development without hardware
//!
//! Produces a noise floor plus a carrier that keys on and off every few
//! blocks, paced at the configured sample rate so the acquisition loop
//! behaves as it would against a real dongle.

use std::f32::consts::PI;
use std::thread;
use std::time::Duration;

use num_complex::Complex32;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::{DeviceDescriptor, DriverError, IqBlock, RadioDriver, RadioHandle};

/// What the simulated antenna "hears"
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedScene {
    /// Absolute carrier frequency in Hz
    pub carrier_hz: u64,
    /// Carrier level in dBFS at the reference gain
    pub carrier_dbfs: f32,
    /// Per-component peak noise amplitude
    pub noise_amplitude: f32,
    /// Blocks the carrier stays on, then off, alternating
    pub key_blocks: u64,
    /// Sleep to emulate real-time delivery
    pub realtime: bool,
}

impl Default for SimulatedScene {
    fn default() -> Self {
        Self {
            carrier_hz: 433_920_000,
            carrier_dbfs: -20.0,
            noise_amplitude: 0.002,
            key_blocks: 5,
            realtime: true,
        }
    }
}

/// Driver exposing `count` simulated dongles
pub struct SimulatedDriver {
    count: u32,
    scene: SimulatedScene,
}

impl SimulatedDriver {
    pub fn new(count: u32, scene: SimulatedScene) -> Self {
        Self { count, scene }
    }
}

impl RadioDriver for SimulatedDriver {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, DriverError> {
        Ok((0..self.count)
            .map(|index| DeviceDescriptor {
                index,
                name: "Simulated RTL2832U".to_string(),
                serial: format!("SIM{:05}", index),
            })
            .collect())
    }

    fn open(&self, index: u32) -> Result<Box<dyn RadioHandle>, DriverError> {
        if index >= self.count {
            return Err(DriverError::NotFound(index));
        }
        Ok(Box::new(SimulatedHandle {
            scene: self.scene.clone(),
            center_hz: 100_000_000,
            sample_rate: 2_048_000,
            gain_db: 40.0,
            blocks: 0,
            phase: 0.0,
            rng: StdRng::seed_from_u64(index as u64),
        }))
    }
}

struct SimulatedHandle {
    scene: SimulatedScene,
    center_hz: u64,
    sample_rate: u32,
    gain_db: f32,
    blocks: u64,
    phase: f32,
    rng: StdRng,
}

impl SimulatedHandle {
    fn carrier_on(&self) -> bool {
        let key = self.scene.key_blocks.max(1);
        (self.blocks / key) % 2 == 0
    }
}

impl RadioHandle for SimulatedHandle {
    fn set_center_frequency(&mut self, hz: u64) -> Result<(), DriverError> {
        self.center_hz = hz;
        Ok(())
    }

    fn set_sample_rate(&mut self, hz: u32) -> Result<(), DriverError> {
        if !(225_001..=3_200_000).contains(&hz) {
            return Err(DriverError::Unsupported(format!("sample rate {} Hz", hz)));
        }
        self.sample_rate = hz;
        Ok(())
    }

    fn set_gain(&mut self, db: f32) -> Result<(), DriverError> {
        self.gain_db = db;
        Ok(())
    }

    fn set_freq_correction(&mut self, _ppm: i32) -> Result<(), DriverError> {
        Ok(())
    }

    fn read_samples(&mut self, count: usize) -> Result<IqBlock, DriverError> {
        if self.scene.realtime {
            let secs = count as f64 / self.sample_rate as f64;
            thread::sleep(Duration::from_secs_f64(secs));
        }

        let offset_hz = self.scene.carrier_hz as f64 - self.center_hz as f64;
        let in_band = offset_hz.abs() < self.sample_rate as f64 / 2.0;
        // Gain relative to the 40 dB reference shifts the carrier level
        let level_db = self.scene.carrier_dbfs + (self.gain_db - 40.0);
        let amplitude = if in_band && self.carrier_on() {
            10f32.powf(level_db / 20.0)
        } else {
            0.0
        };
        let step = 2.0 * PI * (offset_hz / self.sample_rate as f64) as f32;
        let noise = self.scene.noise_amplitude;

        let mut block = Vec::with_capacity(count);
        for _ in 0..count {
            let carrier = Complex32::from_polar(amplitude, self.phase);
            let n = Complex32::new(
                self.rng.gen_range(-noise..=noise),
                self.rng.gen_range(-noise..=noise),
            );
            block.push(carrier + n);
            self.phase = (self.phase + step) % (2.0 * PI);
        }

        self.blocks += 1;
        Ok(block)
    }
}
