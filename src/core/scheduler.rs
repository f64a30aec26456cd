//! Timeline playback scheduler
//!
//! Maps elapsed playback time onto the timeline and dispatches every due
//! byte through [`DeviceRegistry::broadcast_write`]. The scheduler owns no
//! timer; the host calls [`PlaybackScheduler::tick`] periodically and never
//! runs two ticks at once.
//!
//! State machine:
//!
//! ```text
//! Idle --start--> Running --stop--> Paused --start--> Running
//! Running --last event consumed--> Completed
//! Paused | Completed --reset--> Idle
//! ```

use super::clock::{Clock, Stopwatch, SystemClock};
use super::events::{EventBus, StatusEvent};
use super::registry::{DeviceRegistry, SendResult};
use super::timeline::Timeline;
use super::transport::{DeviceOpener, SerialPortOpener};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Not started, or reset
    Idle,
    /// Dispatching on ticks
    Running,
    /// Stopped by the caller; elapsed time frozen
    Paused,
    /// Every event dispatched
    Completed,
}

/// Playback error types
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackError {
    /// Timeline has no events
    #[error("No data to send")]
    NoData,

    /// Registry has no connected devices
    #[error("No connected devices")]
    NoDevices,

    /// Operation not allowed while running
    #[error("Playback is running")]
    Running,

    /// Playback finished; reset before starting again
    #[error("Playback already complete; reset first")]
    AlreadyComplete,
}

/// One event dispatched during a tick
#[derive(Debug, Clone)]
pub struct Dispatch {
    /// Timeline index
    pub index: usize,
    /// Byte sent
    pub payload: u8,
    /// Per-device outcome
    pub result: SendResult,
}

/// What a single tick did
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// Events dispatched, in timeline order
    pub dispatched: Vec<Dispatch>,
    /// Cursor after the tick
    pub cursor: usize,
    /// Timeline length
    pub total: usize,
    /// Playback clock after the tick
    pub elapsed: Duration,
    /// This tick moved playback into `Completed`
    pub completed: bool,
}

/// Drives one timeline against a device registry
pub struct PlaybackScheduler<O: DeviceOpener = SerialPortOpener> {
    registry: Arc<DeviceRegistry<O>>,
    timeline: Timeline,
    sent: Vec<bool>,
    cursor: usize,
    state: PlaybackState,
    stopwatch: Stopwatch,
    events: EventBus,
}

impl<O: DeviceOpener> PlaybackScheduler<O> {
    /// Create an idle scheduler publishing on the registry's event bus
    pub fn new(timeline: Timeline, registry: Arc<DeviceRegistry<O>>) -> Self {
        let events = registry.events().clone();
        Self {
            sent: vec![false; timeline.len()],
            registry,
            timeline,
            cursor: 0,
            state: PlaybackState::Idle,
            stopwatch: Stopwatch::new(Arc::new(SystemClock::new())),
            events,
        }
    }

    /// Measure playback time with `clock` instead of the system clock
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.stopwatch = Stopwatch::new(clock);
        self
    }

    /// Start or resume playback
    pub fn start(&mut self) -> Result<(), PlaybackError> {
        match self.state {
            PlaybackState::Running => return Ok(()),
            PlaybackState::Completed => return Err(PlaybackError::AlreadyComplete),
            PlaybackState::Idle | PlaybackState::Paused => {}
        }
        if self.timeline.is_empty() {
            return Err(PlaybackError::NoData);
        }
        let devices = self.registry.connected_count();
        if devices == 0 {
            return Err(PlaybackError::NoDevices);
        }

        let needed = EventBus::required_capacity(self.timeline.len() - self.cursor);
        if needed > self.events.capacity() {
            warn!(
                "Event bus holds {} events; a catch-up tick may publish {}, slow subscribers will lag",
                self.events.capacity(),
                needed
            );
        }

        self.state = PlaybackState::Running;
        self.stopwatch.start();
        info!(
            "Playback started at event {}/{} ({} devices)",
            self.cursor,
            self.timeline.len(),
            devices
        );
        self.events.publish(StatusEvent::PlaybackStarted { devices });
        Ok(())
    }

    /// Pause playback; no further dispatch until the next `start`
    pub fn stop(&mut self) {
        if self.state != PlaybackState::Running {
            return;
        }
        self.stopwatch.stop();
        self.state = PlaybackState::Paused;
        info!("Playback stopped at event {}/{}", self.cursor, self.timeline.len());
        self.events.publish(StatusEvent::PlaybackStopped);
    }

    /// Rewind to the first event and clear all sent flags
    pub fn reset(&mut self) -> Result<(), PlaybackError> {
        if self.state == PlaybackState::Running {
            return Err(PlaybackError::Running);
        }
        self.cursor = 0;
        self.sent.fill(false);
        self.stopwatch.reset();
        self.state = PlaybackState::Idle;
        debug!("Playback reset");
        self.events.publish(StatusEvent::PlaybackReset);
        Ok(())
    }

    /// Dispatch every event whose time has come.
    ///
    /// All overdue events fire within this call, in timeline order, so a
    /// late tick never skips or reorders anything.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport {
            total: self.timeline.len(),
            ..TickReport::default()
        };

        if self.state != PlaybackState::Running {
            report.cursor = self.cursor;
            report.elapsed = self.stopwatch.elapsed();
            return report;
        }

        if self.cursor >= self.timeline.len() {
            self.stopwatch.stop();
            self.state = PlaybackState::Completed;
            info!("All {} events sent", self.timeline.len());
            self.events.publish(StatusEvent::PlaybackCompleted);

            report.cursor = self.cursor;
            report.elapsed = self.stopwatch.elapsed();
            report.completed = true;
            return report;
        }

        let elapsed = self.stopwatch.elapsed();
        let elapsed_secs = elapsed.as_secs_f64();

        while let Some(event) = self.timeline.get(self.cursor) {
            if event.time_secs() > elapsed_secs {
                break;
            }
            let payload = event.payload();
            let result = self.registry.broadcast_write(&[payload]);

            if result.total_attempted() == 0 {
                warn!("No connected devices for {}", event.hex());
            } else if !result.all_succeeded() {
                warn!(
                    "Sent {} to {}/{} devices",
                    event.hex(),
                    result.success_count(),
                    result.total_attempted()
                );
            } else {
                debug!("Sent {} ({}) to {} devices", payload, event.hex(), result.success_count());
            }

            self.sent[self.cursor] = true;
            self.events.publish(StatusEvent::ByteDispatched {
                payload,
                succeeded: result.succeeded.clone(),
                failed: result.failed.clone(),
            });
            report.dispatched.push(Dispatch {
                index: self.cursor,
                payload,
                result,
            });
            self.cursor += 1;
        }

        self.events.publish(StatusEvent::Progress {
            index: self.cursor,
            total: self.timeline.len(),
            elapsed_secs,
        });

        report.cursor = self.cursor;
        report.elapsed = elapsed;
        report
    }

    /// Current state
    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Index of the next event to dispatch
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Timeline length
    pub fn len(&self) -> usize {
        self.timeline.len()
    }

    /// Whether the timeline is empty
    pub fn is_empty(&self) -> bool {
        self.timeline.is_empty()
    }

    /// Whether event `index` has been dispatched
    pub fn is_sent(&self, index: usize) -> bool {
        self.sent.get(index).copied().unwrap_or(false)
    }

    /// Playback clock: time spent running since the last reset
    pub fn elapsed(&self) -> Duration {
        self.stopwatch.elapsed()
    }

    /// Fraction of events dispatched, 0.0 to 1.0
    pub fn progress(&self) -> f64 {
        if self.timeline.is_empty() {
            return 0.0;
        }
        self.cursor as f64 / self.timeline.len() as f64
    }

    /// Whether playback reached `Completed`
    pub fn is_complete(&self) -> bool {
        self.state == PlaybackState::Completed
    }

    /// The timeline being played
    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// The registry receiving dispatches
    pub fn registry(&self) -> &Arc<DeviceRegistry<O>> {
        &self.registry
    }
}
