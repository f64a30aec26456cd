//! Periodic tick driver
//!
//! Runs a [`PlaybackScheduler`] from a tokio interval until playback
//! completes, the caller cancels, or (optionally) every device is gone.

use super::registry::SendResult;
use super::scheduler::{PlaybackError, PlaybackScheduler, PlaybackState};
use super::transport::DeviceOpener;
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Default tick interval
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(10);

/// Why a driven playback ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackOutcome {
    /// Every event dispatched
    Completed,
    /// Cancel signal received; playback paused
    Cancelled,
    /// Registry emptied and the driver was told to stop on that
    NoDevicesLeft,
}

/// Totals for one driven playback
#[derive(Debug, Clone, Serialize)]
pub struct PlaybackSummary {
    /// How playback ended
    pub outcome: PlaybackOutcome,
    /// Timeline events dispatched
    pub dispatched: usize,
    /// Per-device write failures across all dispatches
    pub failed_sends: usize,
    /// Devices evicted after a failed write
    pub evicted: BTreeSet<String>,
    /// Playback clock at the end
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
}

impl PlaybackSummary {
    fn new() -> Self {
        Self {
            outcome: PlaybackOutcome::Completed,
            dispatched: 0,
            failed_sends: 0,
            evicted: BTreeSet::new(),
            elapsed: Duration::ZERO,
        }
    }

    fn record(&mut self, result: &SendResult) {
        self.dispatched += 1;
        self.failed_sends += result.failure_count();
        self.evicted.extend(result.failed.keys().cloned());
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}

/// Drives scheduler ticks at a fixed interval
#[derive(Debug, Clone)]
pub struct TickDriver {
    interval: Duration,
    stop_when_no_devices: bool,
}

impl Default for TickDriver {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_INTERVAL)
    }
}

impl TickDriver {
    /// Create a driver ticking every `interval` (at least 1ms)
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            stop_when_no_devices: false,
        }
    }

    /// End playback as soon as a tick leaves the registry empty
    #[must_use]
    pub fn stop_when_no_devices(mut self, enabled: bool) -> Self {
        self.stop_when_no_devices = enabled;
        self
    }

    /// Tick interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start `scheduler` (unless already running) and tick it until done.
    ///
    /// A message on `cancel` stops playback; the scheduler is left paused so
    /// the caller may resume or reset it.
    pub async fn run<O: DeviceOpener>(
        &self,
        scheduler: &mut PlaybackScheduler<O>,
        mut cancel: mpsc::Receiver<()>,
    ) -> Result<PlaybackSummary, PlaybackError> {
        if scheduler.state() != PlaybackState::Running {
            scheduler.start()?;
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut summary = PlaybackSummary::new();

        debug!("Tick driver running every {:?}", self.interval);

        summary.outcome = loop {
            tokio::select! {
                biased;
                Some(()) = cancel.recv() => {
                    scheduler.stop();
                    info!("Playback cancelled");
                    break PlaybackOutcome::Cancelled;
                }
                _ = ticker.tick() => {
                    let report = scheduler.tick();
                    for dispatch in &report.dispatched {
                        summary.record(&dispatch.result);
                    }
                    if report.completed {
                        break PlaybackOutcome::Completed;
                    }
                    if self.stop_when_no_devices && scheduler.registry().connected_count() == 0 {
                        scheduler.stop();
                        warn!("No devices left, stopping playback");
                        break PlaybackOutcome::NoDevicesLeft;
                    }
                }
            }
        };

        summary.elapsed = scheduler.elapsed();
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::EventBus;
    use crate::core::registry::DeviceRegistry;
    use crate::core::timeline::Timeline;
    use crate::core::transport::MemoryOpener;
    use std::sync::Arc;

    fn scheduler(
        pairs: &[(f64, u8)],
        ports: &[&str],
    ) -> (PlaybackScheduler<MemoryOpener>, MemoryOpener) {
        let opener = MemoryOpener::with_ports(ports.iter().copied());
        let registry = Arc::new(DeviceRegistry::new(opener.clone(), EventBus::default()));
        for port in ports {
            registry.connect(port, 9600).unwrap();
        }
        let timeline = Timeline::from_pairs(pairs.iter().copied()).unwrap();
        (PlaybackScheduler::new(timeline, registry), opener)
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_to_completion() {
        let (mut scheduler, opener) = scheduler(&[(0.0, 10), (0.05, 20), (0.10, 30)], &["A", "B"]);
        let (_tx, rx) = mpsc::channel(1);

        let summary = TickDriver::default().run(&mut scheduler, rx).await.unwrap();

        assert_eq!(summary.outcome, PlaybackOutcome::Completed);
        assert_eq!(summary.dispatched, 3);
        assert_eq!(summary.failed_sends, 0);
        assert!(summary.elapsed >= Duration::from_millis(100));
        assert_eq!(opener.port("B").unwrap().written(), vec![10, 20, 30]);
        assert!(scheduler.is_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_pauses_playback() {
        let (mut scheduler, opener) = scheduler(&[(0.0, 1), (10.0, 2)], &["A"]);
        let (tx, rx) = mpsc::channel(1);
        let driver = TickDriver::new(Duration::from_millis(10));

        let (summary, _) = tokio::join!(driver.run(&mut scheduler, rx), async {
            tokio::time::sleep(Duration::from_millis(55)).await;
            tx.send(()).await.unwrap();
        });
        let summary = summary.unwrap();

        assert_eq!(summary.outcome, PlaybackOutcome::Cancelled);
        assert_eq!(summary.dispatched, 1);
        assert_eq!(scheduler.state(), PlaybackState::Paused);
        assert_eq!(opener.port("A").unwrap().written(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_registry_empties() {
        let (mut scheduler, opener) = scheduler(&[(0.0, 1), (0.05, 2)], &["A"]);
        opener.port("A").unwrap().fail_writes("unplugged");
        let (_tx, rx) = mpsc::channel(1);

        let summary = TickDriver::default()
            .stop_when_no_devices(true)
            .run(&mut scheduler, rx)
            .await
            .unwrap();

        assert_eq!(summary.outcome, PlaybackOutcome::NoDevicesLeft);
        assert_eq!(summary.dispatched, 1);
        assert_eq!(summary.failed_sends, 1);
        assert!(summary.evicted.contains("A"));
        assert_eq!(scheduler.cursor(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_continues_degraded_by_default() {
        let (mut scheduler, opener) = scheduler(&[(0.0, 1), (0.05, 2)], &["A", "B"]);
        opener.port("A").unwrap().fail_writes("unplugged");
        let (_tx, rx) = mpsc::channel(1);

        let summary = TickDriver::default().run(&mut scheduler, rx).await.unwrap();

        assert_eq!(summary.outcome, PlaybackOutcome::Completed);
        assert_eq!(summary.dispatched, 2);
        assert_eq!(summary.failed_sends, 1);
        assert_eq!(opener.port("B").unwrap().written(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_start_precondition_is_returned() {
        let (mut scheduler, _opener) = scheduler(&[(0.0, 1)], &[]);
        let (_tx, rx) = mpsc::channel(1);
        let err = TickDriver::default().run(&mut scheduler, rx).await.unwrap_err();
        assert_eq!(err, PlaybackError::NoDevices);
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        assert_eq!(TickDriver::new(Duration::ZERO).interval(), Duration::from_millis(1));
    }
}
