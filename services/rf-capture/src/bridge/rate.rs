//! Adaptive FFT emission interval

use std::time::Duration;

use crate::config::BridgeSettings;

/// Computes how long a streaming task waits between FFT pushes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRate {
    base: Duration,
    max: Duration,
}

impl StreamRate {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    pub fn from_settings(settings: &BridgeSettings) -> Self {
        Self::new(
            Duration::from_millis(settings.base_delay_ms),
            Duration::from_millis(settings.max_delay_ms),
        )
    }

    /// `min(base × (1 + clients / 5), max)`
    pub fn interval(&self, clients: usize) -> Duration {
        let nanos = self.base.as_nanos() as f64 * (1.0 + clients as f64 / 5.0);
        if nanos >= self.max.as_nanos() as f64 {
            return self.max;
        }
        Duration::from_nanos(nanos.round() as u64)
    }
}
