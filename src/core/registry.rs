//! Multi-device connection registry
//!
//! Owns every open device connection, keyed by device identifier, and
//! performs writes across all of them with per-device failure isolation.
//!
//! Every public operation runs under one mutex covering its whole body, so
//! operations are atomic with respect to each other. Port timeouts bound how
//! long any single operation can hold the lock.
//!
//! Broadcast and targeted writes deliberately differ on failure:
//! [`DeviceRegistry::broadcast_write`] evicts every device whose write failed,
//! while [`DeviceRegistry::targeted_write`] reports the error and keeps the
//! device registered.

use super::events::{DisconnectReason, EventBus, StatusEvent};
use super::transport::{DeviceOpener, LinkSettings, SerialDevice, SerialPortOpener, TransportError};
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Failure reason recorded when a handle reports itself closed
pub const PORT_CLOSED: &str = "port closed";

/// Registry error types
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The identifier already has an open handle
    #[error("Device already connected: {0}")]
    AlreadyConnected(String),

    /// The transport could not be opened
    #[error("Failed to open {device_id}: {source}")]
    Open {
        /// Device identifier
        device_id: String,
        /// Platform-reported cause
        #[source]
        source: TransportError,
    },
}

/// Outcome of one broadcast write
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SendResult {
    /// Devices that accepted the payload
    pub succeeded: BTreeSet<String>,
    /// Devices that failed, with the failure reason
    pub failed: BTreeMap<String, String>,
}

impl SendResult {
    /// No device failed
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }

    /// Devices a write was attempted on
    pub fn total_attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    /// Number of successful devices
    pub fn success_count(&self) -> usize {
        self.succeeded.len()
    }

    /// Number of failed devices
    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }
}

/// Result of connecting a batch of devices one by one
#[derive(Debug, Default)]
pub struct ConnectSummary {
    /// Devices now connected
    pub connected: Vec<String>,
    /// Devices that could not be connected
    pub failed: Vec<(String, RegistryError)>,
}

impl ConnectSummary {
    /// Number of devices connected
    pub fn success_count(&self) -> usize {
        self.connected.len()
    }

    /// Number of devices that failed
    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }
}

/// One open connection, owned by the registry
struct DeviceHandle {
    settings: LinkSettings,
    device: Box<dyn SerialDevice>,
    connected_at: DateTime<Local>,
}

impl DeviceHandle {
    /// Best-effort close; consuming the handle guarantees a single release
    fn close(mut self, device_id: &str) {
        if let Err(e) = self.device.close() {
            warn!("Error closing {}: {}", device_id, e);
        }
        debug!(
            "Closed {} ({}), open since {}",
            device_id,
            self.settings,
            self.connected_at.format("%H:%M:%S%.3f")
        );
    }
}

/// Thread-safe mapping from device identifier to open connection
pub struct DeviceRegistry<O: DeviceOpener = SerialPortOpener> {
    opener: O,
    link: LinkSettings,
    devices: Mutex<BTreeMap<String, DeviceHandle>>,
    events: EventBus,
}

impl<O: DeviceOpener> DeviceRegistry<O> {
    /// Create an empty registry
    pub fn new(opener: O, events: EventBus) -> Self {
        Self {
            opener,
            link: LinkSettings::default(),
            devices: Mutex::new(BTreeMap::new()),
            events,
        }
    }

    /// Use these line settings for every subsequent connect
    #[must_use]
    pub fn with_link_settings(mut self, link: LinkSettings) -> Self {
        self.link = link;
        self
    }

    /// Event bus this registry publishes on
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Open `device_id` at `baud_rate` and register it
    pub fn connect(&self, device_id: &str, baud_rate: u32) -> Result<(), RegistryError> {
        let mut devices = self.devices.lock();

        if devices.contains_key(device_id) {
            let err = RegistryError::AlreadyConnected(device_id.to_string());
            self.publish_connect_failed(device_id, &err);
            return Err(err);
        }

        let settings = self.link.clone().baud_rate(baud_rate);
        match self.opener.open(device_id, &settings) {
            Ok(device) => {
                info!("Connected {} @ {}", device_id, settings);
                devices.insert(
                    device_id.to_string(),
                    DeviceHandle {
                        settings,
                        device,
                        connected_at: Local::now(),
                    },
                );
                self.events.publish(StatusEvent::Connected {
                    device_id: device_id.to_string(),
                });
                Ok(())
            }
            Err(source) => {
                let err = RegistryError::Open {
                    device_id: device_id.to_string(),
                    source,
                };
                warn!("{}", err);
                self.publish_connect_failed(device_id, &err);
                Err(err)
            }
        }
    }

    /// Connect each device in turn; one failure does not stop the rest
    pub fn connect_each<I, S>(&self, device_ids: I, baud_rate: u32) -> ConnectSummary
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut summary = ConnectSummary::default();
        for id in device_ids {
            let id = id.as_ref();
            match self.connect(id, baud_rate) {
                Ok(()) => summary.connected.push(id.to_string()),
                Err(e) => summary.failed.push((id.to_string(), e)),
            }
        }
        summary
    }

    /// Close and forget `device_id`; absent ids are ignored
    pub fn disconnect(&self, device_id: &str) {
        let mut devices = self.devices.lock();
        if let Some(handle) = devices.remove(device_id) {
            handle.close(device_id);
            info!("Disconnected {}", device_id);
            self.events.publish(StatusEvent::Disconnected {
                device_id: device_id.to_string(),
                reason: DisconnectReason::Requested,
            });
        }
    }

    /// Close and forget every device
    pub fn disconnect_all(&self) {
        self.clear(&DisconnectReason::Requested);
    }

    fn clear(&self, reason: &DisconnectReason) {
        let mut devices = self.devices.lock();
        for (device_id, handle) in std::mem::take(&mut *devices) {
            handle.close(&device_id);
            self.events.publish(StatusEvent::Disconnected {
                device_id,
                reason: reason.clone(),
            });
        }
    }

    /// Write `payload` to every registered device.
    ///
    /// Devices that report closed or fail the write are recorded in the
    /// result and evicted before the lock is released.
    pub fn broadcast_write(&self, payload: &[u8]) -> SendResult {
        let mut devices = self.devices.lock();
        let mut result = SendResult::default();

        for (device_id, handle) in devices.iter_mut() {
            if !handle.device.is_open() {
                result.failed.insert(device_id.clone(), PORT_CLOSED.to_string());
                continue;
            }
            match handle.device.write_all(payload) {
                Ok(()) => {
                    result.succeeded.insert(device_id.clone());
                }
                Err(e) => {
                    result.failed.insert(device_id.clone(), e.to_string());
                }
            }
        }

        for (device_id, reason) in &result.failed {
            if let Some(handle) = devices.remove(device_id) {
                warn!("Write to {} failed ({}), disconnecting", device_id, reason);
                handle.close(device_id);
                self.events.publish(StatusEvent::Disconnected {
                    device_id: device_id.clone(),
                    reason: DisconnectReason::WriteFailed(reason.clone()),
                });
            }
        }

        result
    }

    /// Write `payload` to one device.
    ///
    /// Returns `Ok(false)` when the device is absent or closed. A write error
    /// is returned to the caller and the device stays registered.
    pub fn targeted_write(&self, device_id: &str, payload: &[u8]) -> Result<bool, TransportError> {
        let mut devices = self.devices.lock();
        match devices.get_mut(device_id) {
            Some(handle) if handle.device.is_open() => {
                handle.device.write_all(payload)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Whether `device_id` is registered and open
    pub fn is_connected(&self, device_id: &str) -> bool {
        self.devices
            .lock()
            .get(device_id)
            .is_some_and(|handle| handle.device.is_open())
    }

    /// Number of registered devices (snapshot)
    pub fn connected_count(&self) -> usize {
        self.devices.lock().len()
    }

    /// Registered device ids in sorted order (snapshot)
    pub fn connected_ids(&self) -> Vec<String> {
        self.devices.lock().keys().cloned().collect()
    }

    fn publish_connect_failed(&self, device_id: &str, err: &RegistryError) {
        self.events.publish(StatusEvent::ConnectFailed {
            device_id: device_id.to_string(),
            reason: err.to_string(),
        });
    }
}

impl<O: DeviceOpener> Drop for DeviceRegistry<O> {
    fn drop(&mut self) {
        self.clear(&DisconnectReason::Shutdown);
    }
}
