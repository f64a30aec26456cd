//! In-memory virtual devices
//!
//! Stand-ins for real ports: every byte written is recorded, and failures
//! can be injected per port. Used by dry runs and tests.

use super::{DeviceOpener, LinkSettings, SerialDevice, TransportError};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Default)]
struct PortState {
    available: bool,
    open: bool,
    written: Vec<u8>,
    fail_writes: Option<String>,
    fail_close: bool,
    open_count: usize,
    close_count: usize,
    settings: Option<LinkSettings>,
}

/// Inspection and fault-injection handle for one virtual port
#[derive(Debug, Clone, Default)]
pub struct MemoryPort {
    state: Arc<Mutex<PortState>>,
}

impl MemoryPort {
    fn available() -> Self {
        let port = Self::default();
        port.state.lock().available = true;
        port
    }

    /// Bytes written since the port was created
    pub fn written(&self) -> Vec<u8> {
        self.state.lock().written.clone()
    }

    /// Whether a device handle currently holds the port open
    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Number of successful opens
    pub fn open_count(&self) -> usize {
        self.state.lock().open_count
    }

    /// Number of times an open handle was closed
    pub fn close_count(&self) -> usize {
        self.state.lock().close_count
    }

    /// Line parameters used by the most recent open
    pub fn last_settings(&self) -> Option<LinkSettings> {
        self.state.lock().settings.clone()
    }

    /// Make every subsequent write fail with `reason`
    pub fn fail_writes(&self, reason: &str) {
        self.state.lock().fail_writes = Some(reason.to_string());
    }

    /// Make `close` report an error (the port is still released)
    pub fn fail_close(&self) {
        self.state.lock().fail_close = true;
    }

    /// Drop the link from the far side; the handle then reports closed
    pub fn drop_link(&self) {
        self.state.lock().open = false;
    }

    /// Make the port disappear from enumeration
    pub fn unplug(&self) {
        let mut state = self.state.lock();
        state.available = false;
        state.open = false;
    }
}

/// Device handle bound to a [`MemoryPort`]
#[derive(Debug)]
pub struct MemoryDevice {
    port: MemoryPort,
    closed: bool,
}

impl SerialDevice for MemoryDevice {
    fn is_open(&self) -> bool {
        !self.closed && self.port.is_open()
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }

        let mut state = self.port.state.lock();
        if let Some(reason) = &state.fail_writes {
            return Err(TransportError::IoError(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                reason.clone(),
            )));
        }
        state.written.extend_from_slice(data);
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut state = self.port.state.lock();
        state.open = false;
        state.close_count += 1;
        if state.fail_close {
            return Err(TransportError::ConnectionFailed("close failed".to_string()));
        }
        Ok(())
    }
}

/// Opener over a set of named virtual ports
#[derive(Debug, Clone, Default)]
pub struct MemoryOpener {
    ports: Arc<Mutex<BTreeMap<String, MemoryPort>>>,
}

impl MemoryOpener {
    /// Create an opener with no ports
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an opener exposing the given port names
    pub fn with_ports<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let opener = Self::new();
        for name in names {
            opener.add_port(name);
        }
        opener
    }

    /// Add (or replace) a virtual port and return its handle
    pub fn add_port(&self, name: impl Into<String>) -> MemoryPort {
        let port = MemoryPort::available();
        self.ports.lock().insert(name.into(), port.clone());
        port
    }

    /// Handle for an existing port
    pub fn port(&self, name: &str) -> Option<MemoryPort> {
        self.ports.lock().get(name).cloned()
    }

    /// Names of ports currently available to open
    pub fn port_names(&self) -> Vec<String> {
        self.ports
            .lock()
            .iter()
            .filter(|(_, port)| port.state.lock().available)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

impl DeviceOpener for MemoryOpener {
    fn open(
        &self,
        device_id: &str,
        settings: &LinkSettings,
    ) -> Result<Box<dyn SerialDevice>, TransportError> {
        let port = self
            .port(device_id)
            .ok_or_else(|| TransportError::PortNotFound(device_id.to_string()))?;

        {
            let mut state = port.state.lock();
            if !state.available {
                return Err(TransportError::PortNotFound(device_id.to_string()));
            }
            if state.open {
                return Err(TransportError::PortInUse(device_id.to_string()));
            }
            state.open = true;
            state.open_count += 1;
            state.settings = Some(settings.clone());
        }

        Ok(Box::new(MemoryDevice {
            port,
            closed: false,
        }))
    }
}
