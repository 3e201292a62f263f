//! Gateway settings
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! `rf-observer.toml`, then `RF_OBSERVER_*` environment variables
//! (`__` separates nested keys, e.g. `RF_OBSERVER_ACQUISITION__BLOCK_SIZE`).

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use rf_capture::{AcquisitionSettings, BridgeSettings, ControlTimeouts, SimulatedScene};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Bind address for HTTP and WebSocket
    pub host: String,
    pub port: u16,

    /// Use the simulated radio even when hardware support is compiled in
    pub simulate: bool,
    /// Number of simulated dongles
    pub simulated_devices: u32,
    pub scene: SimulatedScene,

    /// `rtl_test` binary used when USB enumeration finds nothing
    pub probe_tool: String,

    pub acquisition: AcquisitionSettings,
    pub bridge: BridgeSettings,
    pub timeouts: ControlTimeouts,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7001,
            simulate: !cfg!(feature = "rtlsdr"),
            simulated_devices: 1,
            scene: SimulatedScene::default(),
            probe_tool: "rtl_test".to_string(),
            acquisition: AcquisitionSettings::default(),
            bridge: BridgeSettings::default(),
            timeouts: ControlTimeouts::default(),
        }
    }
}

impl Settings {
    /// Load from `<file>.toml` (optional) and the environment
    pub fn load(file: &str) -> Result<Self> {
        Config::builder()
            .add_source(File::with_name(file).required(false))
            .add_source(
                Environment::with_prefix("RF_OBSERVER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read settings")?
            .try_deserialize()
            .context("Invalid settings")
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let settings = Settings::load("does-not-exist").unwrap();
        assert_eq!(settings.acquisition.block_size, 256 * 1024);
        assert_eq!(settings.bridge.max_fft_points, 1024);
        assert_eq!(settings.timeouts.start_ms, 10_000);
        assert_eq!(settings.probe_tool, "rtl_test");
    }

    #[test]
    fn test_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("observer.toml");
        std::fs::write(
            &path,
            "port = 9000\nsimulated_devices = 3\n\n[acquisition]\nblock_size = 8192\n\n[bridge]\nbase_delay_ms = 250\n",
        )
        .unwrap();

        let settings = Settings::load(path.to_str().unwrap()).unwrap();
        assert_eq!(settings.port, 9000);
        assert_eq!(settings.simulated_devices, 3);
        assert_eq!(settings.acquisition.block_size, 8192);
        // Untouched nested fields keep their defaults
        assert_eq!(settings.acquisition.burst_history, 1000);
        assert_eq!(settings.bridge.base_delay_ms, 250);
        assert_eq!(settings.bridge.max_delay_ms, 1000);
        assert_eq!(settings.bind_addr(), "0.0.0.0:9000");
    }

    #[test]
    fn test_environment_overrides_nested_keys() {
        // Key not asserted by any other test
        std::env::set_var("RF_OBSERVER_ACQUISITION__SILENCE_TIMEOUT_MS", "5000");
        let settings = Settings::load("does-not-exist").unwrap();
        std::env::remove_var("RF_OBSERVER_ACQUISITION__SILENCE_TIMEOUT_MS");

        assert_eq!(settings.acquisition.silence_timeout_ms, 5000);
        assert_eq!(settings.acquisition.max_read_errors, 5);
    }
}
