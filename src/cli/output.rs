//! Rendering of status events and reports for the terminal

use crate::core::driver::PlaybackSummary;
use crate::core::events::{DisconnectReason, StatusEvent, TimestampedEvent};
use clap::ValueEnum;
use serde::Serialize;

/// CLI output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON lines for scripting
    Json,
}

/// Human-readable message for an event, without timestamp
pub fn describe(event: &StatusEvent) -> String {
    match event {
        StatusEvent::Connected { device_id } => format!("Connected: {device_id}"),
        StatusEvent::ConnectFailed { device_id, reason } => {
            format!("Failed to connect {device_id}: {reason}")
        }
        StatusEvent::Disconnected { device_id, reason } => match reason {
            DisconnectReason::Requested | DisconnectReason::Shutdown => {
                format!("Disconnected: {device_id}")
            }
            DisconnectReason::WriteFailed(why) => {
                format!("Disconnected: {device_id} (write failed: {why})")
            }
        },
        StatusEvent::ByteDispatched {
            payload,
            succeeded,
            failed,
        } => {
            let total = succeeded.len() + failed.len();
            if failed.is_empty() {
                format!("Sent 0x{payload:02X} to {total} devices")
            } else {
                let names: Vec<&str> = failed.keys().map(String::as_str).collect();
                format!(
                    "Sent 0x{payload:02X} to {}/{total} devices (failed: {})",
                    succeeded.len(),
                    names.join(", ")
                )
            }
        }
        StatusEvent::Progress {
            index,
            total,
            elapsed_secs,
        } => format!("Progress: {index}/{total} at {elapsed_secs:.3}s"),
        StatusEvent::PlaybackStarted { devices } => {
            format!("Playback started ({devices} devices)")
        }
        StatusEvent::PlaybackStopped => "Playback stopped".to_string(),
        StatusEvent::PlaybackReset => "Playback reset".to_string(),
        StatusEvent::PlaybackCompleted => "All data sent".to_string(),
    }
}

/// `[HH:MM:SS.fff] message`
pub fn format_event(event: &TimestampedEvent) -> String {
    format!("[{}] {}", event.at.format("%H:%M:%S%.3f"), describe(&event.event))
}

/// Render an event in `format`; `None` for events hidden in text mode
pub fn render_event(event: &TimestampedEvent, format: OutputFormat, verbose: bool) -> Option<String> {
    match format {
        OutputFormat::Json => serde_json::to_string(event).ok(),
        OutputFormat::Text => {
            // Progress is noisy; text mode only shows it when verbose
            if !verbose && matches!(event.event, StatusEvent::Progress { .. }) {
                return None;
            }
            Some(format_event(event))
        }
    }
}

/// Print a serializable report as pretty JSON
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a value as a single JSON line, for output mixed with the event stream
pub fn print_json_line<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

/// One-line description of a finished playback
pub fn summary_text(summary: &PlaybackSummary) -> String {
    format!(
        "{} events sent in {:.3}s, {} failed sends, {} devices dropped",
        summary.dispatched,
        summary.elapsed.as_secs_f64(),
        summary.failed_sends,
        summary.evicted.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};
    use std::collections::{BTreeMap, BTreeSet};

    fn at(event: StatusEvent) -> TimestampedEvent {
        TimestampedEvent {
            at: Local.with_ymd_and_hms(2024, 3, 1, 14, 5, 9).unwrap(),
            event,
        }
    }

    #[test]
    fn test_text_line_has_timestamp() {
        let line = format_event(&at(StatusEvent::Connected {
            device_id: "COM3".to_string(),
        }));
        assert_eq!(line, "[14:05:09.000] Connected: COM3");
    }

    #[test]
    fn test_dispatch_with_failures() {
        let event = StatusEvent::ByteDispatched {
            payload: 0x1F,
            succeeded: BTreeSet::from(["A".to_string()]),
            failed: BTreeMap::from([("B".to_string(), "broken pipe".to_string())]),
        };
        assert_eq!(describe(&event), "Sent 0x1F to 1/2 devices (failed: B)");
    }

    #[test]
    fn test_progress_hidden_unless_verbose() {
        let event = at(StatusEvent::Progress {
            index: 1,
            total: 4,
            elapsed_secs: 0.25,
        });
        assert!(render_event(&event, OutputFormat::Text, false).is_none());
        assert_eq!(
            render_event(&event, OutputFormat::Text, true).unwrap(),
            "[14:05:09.000] Progress: 1/4 at 0.250s"
        );
    }

    #[test]
    fn test_summary_is_one_json_line() {
        use crate::core::driver::PlaybackOutcome;
        use std::time::Duration;

        let summary = PlaybackSummary {
            outcome: PlaybackOutcome::Completed,
            dispatched: 3,
            failed_sends: 1,
            evicted: BTreeSet::from(["B".to_string()]),
            elapsed: Duration::from_millis(1500),
        };
        assert_eq!(
            summary_text(&summary),
            "3 events sent in 1.500s, 1 failed sends, 1 devices dropped"
        );

        let line = serde_json::to_string(&summary).unwrap();
        assert!(!line.contains('\n'));
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["outcome"], "completed");
        assert_eq!(value["evicted"][0], "B");
        assert_eq!(value["elapsed"], 1.5);
    }

    #[test]
    fn test_json_rendering() {
        let event = at(StatusEvent::PlaybackCompleted);
        let line = render_event(&event, OutputFormat::Json, false).unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["event"], "playback_completed");
        assert!(value["at"].is_string());
    }
}
