//! One-off byte sends outside of timeline playback

use crate::core::events::StatusEvent;
use crate::core::registry::{DeviceRegistry, SendResult};
use crate::core::timeline::parse_byte;
use crate::core::transport::{DeviceOpener, TransportError};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

/// Outcome of a manual send
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ManualSend {
    /// Sent to every connected device; failed devices were disconnected
    Broadcast {
        /// Byte sent
        payload: u8,
        /// Per-device outcome
        result: SendResult,
    },
    /// Sent to one device, which stays connected on failure
    Targeted {
        /// Byte sent
        payload: u8,
        /// Target device
        device_id: String,
        /// False when the target was not connected
        delivered: bool,
    },
}

/// clap value parser for a byte given as decimal or `0x` hex
pub fn byte_arg(value: &str) -> Result<u8, String> {
    parse_byte(value).ok_or_else(|| format!("'{value}' is not a byte (0-255 or 0x00-0xFF)"))
}

/// Send `payload` to all connected devices, or only to `target`.
///
/// Broadcasts evict failing devices. A targeted write error is returned and
/// the device stays registered.
pub fn send_byte<O: DeviceOpener>(
    registry: &DeviceRegistry<O>,
    payload: u8,
    target: Option<&str>,
) -> Result<ManualSend, TransportError> {
    match target {
        None => {
            let result = registry.broadcast_write(&[payload]);
            info!(
                "Manual send 0x{:02X} to {}/{} devices",
                payload,
                result.success_count(),
                result.total_attempted()
            );
            registry.events().publish(StatusEvent::ByteDispatched {
                payload,
                succeeded: result.succeeded.clone(),
                failed: result.failed.clone(),
            });
            Ok(ManualSend::Broadcast { payload, result })
        }
        Some(device_id) => {
            let delivered = match registry.targeted_write(device_id, &[payload]) {
                Ok(delivered) => delivered,
                Err(e) => {
                    warn!("Manual send to {} failed: {}", device_id, e);
                    registry.events().publish(StatusEvent::ByteDispatched {
                        payload,
                        succeeded: BTreeSet::new(),
                        failed: BTreeMap::from([(device_id.to_string(), e.to_string())]),
                    });
                    return Err(e);
                }
            };
            if delivered {
                registry.events().publish(StatusEvent::ByteDispatched {
                    payload,
                    succeeded: BTreeSet::from([device_id.to_string()]),
                    failed: BTreeMap::new(),
                });
            }
            Ok(ManualSend::Targeted {
                payload,
                device_id: device_id.to_string(),
                delivered,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::{drain, EventBus};
    use crate::core::transport::MemoryOpener;

    fn registry(ports: &[&str]) -> (DeviceRegistry<MemoryOpener>, MemoryOpener) {
        let opener = MemoryOpener::with_ports(ports.iter().copied());
        let registry = DeviceRegistry::new(opener.clone(), EventBus::default());
        registry.connect_each(ports, 9600);
        (registry, opener)
    }

    #[test]
    fn test_byte_arg_accepts_decimal_and_hex() {
        assert_eq!(byte_arg("32"), Ok(32));
        assert_eq!(byte_arg("0x1f"), Ok(0x1F));
        assert_eq!(byte_arg("0XFF"), Ok(255));
        assert!(byte_arg("256").is_err());
        assert!(byte_arg("0x").is_err());
        assert!(byte_arg("A").unwrap_err().contains("not a byte"));
    }

    #[test]
    fn test_broadcast_by_default() {
        let (registry, opener) = registry(&["A", "B"]);
        let mut rx = registry.events().subscribe();
        opener.port("B").unwrap().fail_writes("broken pipe");

        let sent = send_byte(&registry, 0x42, None).unwrap();

        let ManualSend::Broadcast { payload, result } = sent else {
            panic!("expected broadcast");
        };
        assert_eq!(payload, 0x42);
        assert_eq!(result.success_count(), 1);
        assert_eq!(registry.connected_ids(), vec!["A"]);
        assert_eq!(opener.port("A").unwrap().written(), vec![0x42]);
        assert!(drain(&mut rx)
            .events
            .iter()
            .any(|e| matches!(e, StatusEvent::ByteDispatched { payload: 0x42, .. })));
    }

    #[test]
    fn test_targeted_send_reaches_one_device() {
        let (registry, opener) = registry(&["A", "B"]);

        let sent = send_byte(&registry, 7, Some("B")).unwrap();
        assert_eq!(
            sent,
            ManualSend::Targeted {
                payload: 7,
                device_id: "B".to_string(),
                delivered: true
            }
        );
        assert!(opener.port("A").unwrap().written().is_empty());
        assert_eq!(opener.port("B").unwrap().written(), vec![7]);

        let missing = send_byte(&registry, 7, Some("Z")).unwrap();
        assert!(matches!(missing, ManualSend::Targeted { delivered: false, .. }));
    }

    #[test]
    fn test_targeted_failure_keeps_device() {
        let (registry, opener) = registry(&["A"]);
        opener.port("A").unwrap().fail_writes("busy");

        assert!(send_byte(&registry, 1, Some("A")).is_err());
        assert!(registry.is_connected("A"));
    }
}
