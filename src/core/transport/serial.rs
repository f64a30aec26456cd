//! Serial port transport implementation

use super::{DeviceOpener, LinkSettings, SerialDevice, TransportError};
use serialport::{DataBits, FlowControl, Parity, SerialPort, SerialPortInfo, StopBits};
use std::io::Write;
use std::time::Duration;

/// Opens platform serial ports (including Bluetooth SPP adapters)
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialPortOpener;

impl DeviceOpener for SerialPortOpener {
    fn open(
        &self,
        device_id: &str,
        settings: &LinkSettings,
    ) -> Result<Box<dyn SerialDevice>, TransportError> {
        let port = serialport::new(device_id, settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(settings.io_timeout())
            .open()
            .map_err(|e| classify_open_error(device_id, &e))?;

        Ok(Box::new(SerialPortDevice {
            port: Some(port),
            write_timeout: settings.write_timeout,
        }))
    }
}

fn classify_open_error(device_id: &str, e: &serialport::Error) -> TransportError {
    match e.kind() {
        serialport::ErrorKind::NoDevice => TransportError::PortNotFound(device_id.to_string()),
        serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
            TransportError::PermissionDenied(device_id.to_string())
        }
        _ if e.description.to_lowercase().contains("busy") => {
            TransportError::PortInUse(device_id.to_string())
        }
        _ => TransportError::ConnectionFailed(e.to_string()),
    }
}

/// An open serial port
pub struct SerialPortDevice {
    port: Option<Box<dyn SerialPort>>,
    write_timeout: Duration,
}

impl SerialDevice for SerialPortDevice {
    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let timeout = self.write_timeout;
        let port = self.port.as_mut().ok_or(TransportError::Closed)?;

        port.write_all(data)
            .map_err(|e| TransportError::from_write(e, timeout))?;
        port.flush()
            .map_err(|e| TransportError::from_write(e, timeout))?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        // Dropping the boxed port closes the OS handle
        self.port.take();
        Ok(())
    }
}

/// List available serial ports, sorted by name
pub fn list_ports() -> Result<Vec<SerialPortInfo>, TransportError> {
    let mut ports = serialport::available_ports().map_err(|e| TransportError::IoError(e.into()))?;
    ports.sort_by(|a, b| a.port_name.cmp(&b.port_name));
    Ok(ports)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_missing_device() {
        let err = serialport::Error::new(serialport::ErrorKind::NoDevice, "no such file");
        assert!(matches!(
            classify_open_error("/dev/rfcomm7", &err),
            TransportError::PortNotFound(ref p) if p == "/dev/rfcomm7"
        ));
    }

    #[test]
    fn test_classify_permission_denied() {
        let err = serialport::Error::new(
            serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied),
            "access denied",
        );
        assert!(matches!(
            classify_open_error("COM4", &err),
            TransportError::PermissionDenied(_)
        ));
    }

    #[test]
    fn test_classify_busy_port() {
        let err = serialport::Error::new(serialport::ErrorKind::Unknown, "Device or resource busy");
        assert!(matches!(classify_open_error("COM5", &err), TransportError::PortInUse(_)));
    }

    #[test]
    fn test_open_missing_port_fails() {
        let result = SerialPortOpener.open(
            "/dev/serial-broadcast-does-not-exist",
            &LinkSettings::default(),
        );
        assert!(result.is_err());
    }
}
