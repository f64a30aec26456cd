//! Transport layer for serial endpoints
//!
//! Supports:
//! - Serial ports (RS-232, USB-Serial, Bluetooth SPP adapters) via `serialport`
//! - In-memory virtual devices for dry runs and tests
//!
//! Only the write side of a connection is modelled. Payloads are raw,
//! unframed bytes handed straight to the port.

mod memory;
mod serial;

pub use memory::{MemoryDevice, MemoryOpener, MemoryPort};
pub use serial::{list_ports, SerialPortDevice, SerialPortOpener};

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default read/write timeout for every opened port
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// Default baud rate when none is configured
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Port already in use
    #[error("Port already in use: {0}")]
    PortInUse(String),

    /// Write did not complete within the port timeout
    #[error("Write timed out after {0} ms")]
    Timeout(u64),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The handle is no longer open
    #[error("port closed")]
    Closed,
}

impl TransportError {
    /// Map a write-side I/O error, keeping timeouts distinguishable
    pub(crate) fn from_write(err: std::io::Error, timeout: Duration) -> Self {
        if err.kind() == std::io::ErrorKind::TimedOut {
            Self::Timeout(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX))
        } else {
            Self::IoError(err)
        }
    }
}

/// Line parameters used for every connection.
///
/// Framing is fixed at 8 data bits, no parity, one stop bit and no flow
/// control; only the baud rate and the timeout bounds vary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSettings {
    /// Baud rate
    pub baud_rate: u32,
    /// Read timeout
    pub read_timeout: Duration,
    /// Write timeout
    pub write_timeout: Duration,
}

impl LinkSettings {
    /// Data bits per character
    pub const DATA_BITS: u8 = 8;
    /// Stop bits per character
    pub const STOP_BITS: u8 = 1;

    /// Create settings for the given baud rate with default timeouts
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            read_timeout: DEFAULT_TIMEOUT,
            write_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set baud rate
    #[must_use]
    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set read timeout
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set write timeout
    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Single timeout bound applied to the port, which has one timer for both directions
    pub fn io_timeout(&self) -> Duration {
        self.read_timeout.max(self.write_timeout)
    }
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self::new(DEFAULT_BAUD_RATE)
    }
}

impl fmt::Display for LinkSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} baud ({}N{} No FC)",
            self.baud_rate,
            Self::DATA_BITS,
            Self::STOP_BITS
        )
    }
}

/// Write side of one open connection.
///
/// Implementations release their OS resource in `close`; the registry calls
/// it exactly once per handle.
#[cfg_attr(test, mockall::automock)]
pub trait SerialDevice: Send {
    /// Whether the underlying port still reports itself open
    fn is_open(&self) -> bool;

    /// Write the full payload, bounded by the write timeout
    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Release the port
    fn close(&mut self) -> Result<(), TransportError>;
}

/// Factory for device connections
pub trait DeviceOpener: Send + Sync {
    /// Open `device_id` with the given line parameters
    fn open(
        &self,
        device_id: &str,
        settings: &LinkSettings,
    ) -> Result<Box<dyn SerialDevice>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_settings_defaults() {
        let settings = LinkSettings::default();
        assert_eq!(settings.baud_rate, 9600);
        assert_eq!(settings.read_timeout, Duration::from_millis(500));
        assert_eq!(settings.write_timeout, Duration::from_millis(500));
        assert_eq!(settings.to_string(), "9600 baud (8N1 No FC)");
    }

    #[test]
    fn test_io_timeout_uses_longer_bound() {
        let settings = LinkSettings::new(115_200)
            .read_timeout(Duration::from_millis(200))
            .write_timeout(Duration::from_millis(750));
        assert_eq!(settings.io_timeout(), Duration::from_millis(750));
    }

    #[test]
    fn test_write_timeout_mapping() {
        let err = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        let mapped = TransportError::from_write(err, Duration::from_millis(500));
        assert!(matches!(mapped, TransportError::Timeout(500)));

        let err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        let mapped = TransportError::from_write(err, Duration::from_millis(500));
        assert!(matches!(mapped, TransportError::IoError(_)));
    }
}
