//! End-to-end playback against in-memory devices

use serial_broadcast_core::core::events::drain;
use serial_broadcast_core::{
    DeviceRegistry, DisconnectReason, EventBus, ManualClock, MemoryOpener, PlaybackError,
    PlaybackOutcome, PlaybackScheduler, PlaybackState, StatusEvent, TickDriver, Timeline,
};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn registry_with(ports: &[&str]) -> (Arc<DeviceRegistry<MemoryOpener>>, MemoryOpener) {
    let opener = MemoryOpener::with_ports(ports.iter().copied());
    let registry = Arc::new(DeviceRegistry::new(opener.clone(), EventBus::default()));
    let summary = registry.connect_each(ports, 9600);
    assert_eq!(summary.failure_count(), 0);
    (registry, opener)
}

#[tokio::test(start_paused = true)]
async fn csv_file_plays_to_every_device() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "time,data").unwrap();
    writeln!(file, "0.00,0x10").unwrap();
    writeln!(file, "0.25,32").unwrap();
    writeln!(file, "0.50,0xFF").unwrap();
    let timeline = Timeline::load_csv(file.path()).unwrap();

    let (registry, opener) = registry_with(&["ttyUSB0", "ttyUSB1", "rfcomm0"]);
    let mut rx = registry.events().subscribe();
    let mut scheduler = PlaybackScheduler::new(timeline, Arc::clone(&registry));
    let (_cancel, cancel_rx) = mpsc::channel(1);

    let summary = TickDriver::new(Duration::from_millis(10))
        .run(&mut scheduler, cancel_rx)
        .await
        .unwrap();

    assert_eq!(summary.outcome, PlaybackOutcome::Completed);
    assert_eq!(summary.dispatched, 3);
    for name in ["ttyUSB0", "ttyUSB1", "rfcomm0"] {
        assert_eq!(opener.port(name).unwrap().written(), vec![0x10, 32, 0xFF]);
    }

    let events = drain(&mut rx).events;
    assert!(matches!(events.first(), Some(StatusEvent::PlaybackStarted { devices: 3 })));
    assert!(matches!(events.last(), Some(StatusEvent::PlaybackCompleted)));
}

#[tokio::test(start_paused = true)]
async fn unplugged_device_is_dropped_and_playback_continues() {
    let timeline = Timeline::from_pairs([(0.0, 1), (0.1, 2), (0.2, 3)]).unwrap();
    let (registry, opener) = registry_with(&["A", "B"]);
    let mut rx = registry.events().subscribe();
    let mut scheduler = PlaybackScheduler::new(timeline, Arc::clone(&registry));

    let b = opener.port("B").unwrap();
    let (_cancel, cancel_rx) = mpsc::channel(1);
    let driver = TickDriver::default();

    let (summary, ()) = tokio::join!(driver.run(&mut scheduler, cancel_rx), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        b.unplug();
    });
    let summary = summary.unwrap();

    assert_eq!(summary.outcome, PlaybackOutcome::Completed);
    assert_eq!(summary.evicted.iter().collect::<Vec<_>>(), vec!["B"]);
    assert_eq!(opener.port("A").unwrap().written(), vec![1, 2, 3]);
    assert_eq!(opener.port("B").unwrap().written(), vec![1]);
    assert_eq!(registry.connected_ids(), vec!["A"]);

    let evicted = drain(&mut rx).events.into_iter().any(|e| {
        matches!(
            e,
            StatusEvent::Disconnected { device_id, reason: DisconnectReason::WriteFailed(_) }
                if device_id == "B"
        )
    });
    assert!(evicted);
}

#[test]
fn pause_resume_and_reset_with_manual_clock() {
    let timeline = Timeline::from_pairs([(0.0, 0xA0), (1.0, 0xA1)]).unwrap();
    let (registry, opener) = registry_with(&["COM1"]);
    let clock = ManualClock::new();
    let mut scheduler =
        PlaybackScheduler::new(timeline, Arc::clone(&registry)).with_clock(Arc::new(clock.clone()));

    scheduler.start().unwrap();
    scheduler.tick();
    scheduler.stop();
    clock.advance(Duration::from_secs(10));
    scheduler.tick();
    assert_eq!(scheduler.cursor(), 1);

    scheduler.start().unwrap();
    clock.advance(Duration::from_secs(1));
    scheduler.tick();
    scheduler.tick();
    assert_eq!(scheduler.state(), PlaybackState::Completed);
    assert_eq!(scheduler.start(), Err(PlaybackError::AlreadyComplete));

    scheduler.reset().unwrap();
    scheduler.start().unwrap();
    scheduler.tick();
    assert_eq!(opener.port("COM1").unwrap().written(), vec![0xA0, 0xA1, 0xA0]);
}

#[test]
fn dropping_registry_releases_ports() {
    let (registry, opener) = registry_with(&["A", "B"]);
    let mut rx = registry.events().subscribe();
    drop(registry);

    for name in ["A", "B"] {
        assert!(!opener.port(name).unwrap().is_open());
    }
    let shutdowns = drain(&mut rx)
        .events
        .into_iter()
        .filter(|e| matches!(e, StatusEvent::Disconnected { reason: DisconnectReason::Shutdown, .. }))
        .count();
    assert_eq!(shutdowns, 2);
}
