//! Error types for the capture core

use std::time::Duration;

use thiserror::Error;

use crate::sdr::DriverError;

/// Result alias for core operations
pub type Result<T> = std::result::Result<T, CaptureError>;

/// Errors raised by devices, the registry and the signal pipeline
#[derive(Debug, Error)]
pub enum CaptureError {
    /// No device is registered at this index (even after a rescan)
    #[error("device {0} not found")]
    NotFound(u32),

    /// Driver/USB probing failed
    #[error("device enumeration failed: {0}")]
    Enumeration(String),

    /// Opening the radio failed after all immediate retries
    #[error("failed to connect to device {index}: {reason}")]
    Connection { index: u32, reason: String },

    /// A single tuner parameter could not be applied
    #[error("failed to set {field} on device {index}: {reason}")]
    Configuration {
        index: u32,
        field: &'static str,
        reason: String,
    },

    /// A read from the radio failed
    #[error("I/O error on device {index}: {source}")]
    Io {
        index: u32,
        #[source]
        source: DriverError,
    },

    /// Reconnect failed; the acquisition loop has terminated
    #[error("device {index} failed: {reason}")]
    Fatal { index: u32, reason: String },

    /// Spectrum could not be computed from a block
    #[error("spectrum error: {0}")]
    Spectrum(String),

    /// The acquisition thread could not be spawned
    #[error("failed to spawn acquisition thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Outcome of a control call made from the async network side
#[derive(Debug, Error)]
pub enum ControlError {
    /// The call did not finish within its budget
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The call finished and failed
    #[error(transparent)]
    Failed(#[from] CaptureError),

    /// The blocking task panicked or was cancelled
    #[error("{operation} aborted: {reason}")]
    Join {
        operation: &'static str,
        reason: String,
    },
}

impl ControlError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ControlError::Timeout { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ControlError::Failed(CaptureError::NotFound(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CaptureError::Connection {
            index: 2,
            reason: "Resource busy".to_string(),
        };
        assert_eq!(err.to_string(), "failed to connect to device 2: Resource busy");
    }

    #[test]
    fn test_read_and_fatal_display() {
        let io = CaptureError::Io {
            index: 1,
            source: DriverError::Usb("LIBUSB_ERROR_NO_DEVICE: No such device".to_string()),
        };
        assert!(io.to_string().starts_with("I/O error on device 1: "));
        assert!(std::error::Error::source(&io).is_some());

        let fatal = CaptureError::Fatal {
            index: 1,
            reason: "reconnect failed after 3 attempts: busy".to_string(),
        };
        assert_eq!(fatal.to_string(), "device 1 failed: reconnect failed after 3 attempts: busy");
    }

    #[test]
    fn test_timeout_is_distinct_from_failure() {
        let timeout = ControlError::Timeout {
            operation: "start_scan",
            after: Duration::from_secs(10),
        };
        let failed: ControlError = CaptureError::NotFound(3).into();

        assert!(timeout.is_timeout());
        assert!(!timeout.is_not_found());
        assert!(!failed.is_timeout());
        assert!(failed.is_not_found());
        assert_eq!(failed.to_string(), "device 3 not found");
    }
}
