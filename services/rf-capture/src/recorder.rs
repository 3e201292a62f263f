//! Raw IQ capture of burst blocks
//!
//! Each capture is a flat file of interleaved little-endian `f32` I/Q
//! pairs with no header, named `<YYYYmmdd_HHMMSS>_<burst id>.iq`.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use num_complex::Complex32;
use tracing::{debug, error};

/// Writes burst blocks into a data directory
#[derive(Debug, Clone)]
pub struct IqRecorder {
    data_dir: PathBuf,
}

impl IqRecorder {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Deterministic capture file name
    pub fn file_name(timestamp: &DateTime<Utc>, burst_id: &str) -> String {
        format!("{}_{}.iq", timestamp.format("%Y%m%d_%H%M%S"), burst_id)
    }

    /// Write `samples` and return the file name
    pub fn write(&self, samples: &[Complex32], timestamp: &DateTime<Utc>, burst_id: &str) -> Result<String> {
        fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("Failed to create data dir {}", self.data_dir.display()))?;

        let name = Self::file_name(timestamp, burst_id);
        let path = self.data_dir.join(&name);
        let file = File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;

        let mut writer = BufWriter::new(file);
        for s in samples {
            writer.write_all(&s.re.to_le_bytes())?;
            writer.write_all(&s.im.to_le_bytes())?;
        }
        writer.flush().with_context(|| format!("Failed to write {}", path.display()))?;

        debug!("Recorded {} samples to {}", samples.len(), path.display());
        Ok(name)
    }

    /// Like [`write`](Self::write) but logs failures and yields `None`
    pub fn capture(&self, samples: &[Complex32], timestamp: &DateTime<Utc>, burst_id: &str) -> Option<String> {
        match self.write(samples, timestamp, burst_id) {
            Ok(name) => Some(name),
            Err(e) => {
                error!("Failed to record IQ data for {}: {:#}", burst_id, e);
                None
            }
        }
    }
}
