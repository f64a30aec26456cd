//! Status events published by the registry and the scheduler
//!
//! Presentation layers subscribe explicitly; producers never hold a
//! reference back into whatever renders the events.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::broadcast;

/// Why a device left the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum DisconnectReason {
    /// Explicit disconnect by the caller
    Requested,
    /// A broadcast write failed; the device was evicted
    WriteFailed(String),
    /// Registry dropped at shutdown
    Shutdown,
}

/// Status event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StatusEvent {
    /// Device opened and registered
    Connected {
        /// Device identifier
        device_id: String,
    },
    /// Device could not be registered
    ConnectFailed {
        /// Device identifier
        device_id: String,
        /// Failure description
        reason: String,
    },
    /// Device removed from the registry
    Disconnected {
        /// Device identifier
        device_id: String,
        /// Why it was removed
        reason: DisconnectReason,
    },
    /// One timeline byte was broadcast
    ByteDispatched {
        /// Payload byte
        payload: u8,
        /// Devices that accepted the byte
        succeeded: BTreeSet<String>,
        /// Devices that failed, with reasons
        failed: BTreeMap<String, String>,
    },
    /// Cursor position after a tick
    Progress {
        /// Events consumed so far
        index: usize,
        /// Timeline length
        total: usize,
        /// Playback clock in seconds
        elapsed_secs: f64,
    },
    /// Playback entered the running state
    PlaybackStarted {
        /// Connected devices at start
        devices: usize,
    },
    /// Playback paused by the caller
    PlaybackStopped,
    /// Cursor and sent flags cleared
    PlaybackReset,
    /// Every event has been dispatched
    PlaybackCompleted,
}

/// A status event with its local wall-clock time
#[derive(Debug, Clone, Serialize)]
pub struct TimestampedEvent {
    /// When the event was published
    pub at: DateTime<Local>,
    /// The event
    #[serde(flatten)]
    pub event: StatusEvent,
}

/// Default per-subscriber backlog
pub const DEFAULT_CAPACITY: usize = 1024;

/// Slots reserved beyond one event per timeline byte: lifecycle, progress
/// and disconnect events published alongside a full catch-up burst
pub const BURST_HEADROOM: usize = 256;

/// Fan-out channel for status events.
///
/// Publishing never blocks and works without a running async runtime.
/// A subscriber that falls behind loses the oldest events; [`drain`]
/// reports how many.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TimestampedEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus retaining up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Bus large enough that a tick dispatching the whole timeline of
    /// `events` bytes cannot overrun a subscriber that reads between ticks
    pub fn for_timeline(min_capacity: usize, events: usize) -> Self {
        Self::new(min_capacity.max(Self::required_capacity(events)))
    }

    /// Backlog needed to hold one full catch-up burst of `events` bytes
    pub fn required_capacity(events: usize) -> usize {
        events.saturating_add(BURST_HEADROOM)
    }

    /// Per-subscriber backlog
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Subscribe to events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<TimestampedEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to all current subscribers
    pub fn publish(&self, event: StatusEvent) {
        // No subscribers is not an error
        let _ = self.tx.send(TimestampedEvent {
            at: Local::now(),
            event,
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Events read by [`drain`]
#[derive(Debug, Default)]
pub struct Drained {
    /// Events still queued, oldest first
    pub events: Vec<StatusEvent>,
    /// Events lost because the receiver fell behind
    pub skipped: u64,
}

/// Drain everything currently queued on a receiver
pub fn drain(rx: &mut broadcast::Receiver<TimestampedEvent>) -> Drained {
    let mut drained = Drained::default();
    loop {
        match rx.try_recv() {
            Ok(e) => drained.events.push(e.event),
            Err(broadcast::error::TryRecvError::Lagged(n)) => drained.skipped += n,
            Err(_) => break,
        }
    }
    drained
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        bus.publish(StatusEvent::PlaybackCompleted);
    }

    #[test]
    fn test_subscribers_receive_in_order() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(StatusEvent::PlaybackStarted { devices: 2 });
        bus.publish(StatusEvent::PlaybackStopped);

        assert_eq!(
            drain(&mut rx).events,
            vec![
                StatusEvent::PlaybackStarted { devices: 2 },
                StatusEvent::PlaybackStopped
            ]
        );
    }

    #[test]
    fn test_drain_reports_lag() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        for _ in 0..10 {
            bus.publish(StatusEvent::PlaybackStopped);
        }

        let drained = drain(&mut rx);
        assert_eq!(drained.skipped, 6);
        assert_eq!(drained.events.len(), 4);
    }

    #[test]
    fn test_timeline_sizing() {
        assert_eq!(EventBus::for_timeline(1024, 10).capacity(), 1024);
        assert_eq!(EventBus::for_timeline(1024, 5000).capacity(), 5000 + BURST_HEADROOM);
        assert_eq!(EventBus::default().capacity(), DEFAULT_CAPACITY);
    }

    #[test]
    fn test_json_shape() {
        let event = TimestampedEvent {
            at: Local::now(),
            event: StatusEvent::Disconnected {
                device_id: "COM3".to_string(),
                reason: DisconnectReason::WriteFailed("broken pipe".to_string()),
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "disconnected");
        assert_eq!(json["device_id"], "COM3");
        assert_eq!(json["reason"]["kind"], "write_failed");
        assert_eq!(json["reason"]["detail"], "broken pipe");
    }
}
