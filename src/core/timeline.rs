//! Playback timelines
//!
//! A timeline is an ordered list of `(seconds, byte)` events. It is built
//! once and read-only afterwards. Order is kept exactly as supplied; the
//! scheduler consumes it front to back.
//!
//! Timelines are usually loaded from a CSV file with a `time,data` header:
//!
//! ```text
//! time,data
//! 0.00,16
//! 0.50,0x20
//! ```

use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

/// Timeline error types
#[derive(Error, Debug)]
pub enum TimelineError {
    /// File could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Header lacks a required column
    #[error("Missing column '{0}' (expected header: time, data)")]
    MissingColumn(&'static str),

    /// A data row could not be parsed
    #[error("Line {line}: {reason}")]
    InvalidRecord {
        /// 1-based line number
        line: usize,
        /// What was wrong
        reason: String,
    },

    /// Time is negative or not finite
    #[error("Invalid event time {0}: must be finite and non-negative")]
    InvalidTime(f64),
}

/// One scheduled byte
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimelineEvent {
    time_secs: f64,
    payload: u8,
}

impl TimelineEvent {
    /// Create an event, rejecting negative or non-finite times
    pub fn new(time_secs: f64, payload: u8) -> Result<Self, TimelineError> {
        if !time_secs.is_finite() || time_secs < 0.0 {
            return Err(TimelineError::InvalidTime(time_secs));
        }
        Ok(Self { time_secs, payload })
    }

    /// Scheduled time in seconds from playback start
    pub fn time_secs(&self) -> f64 {
        self.time_secs
    }

    /// Byte to send
    pub fn payload(&self) -> u8 {
        self.payload
    }

    /// Payload as `0xNN`
    pub fn hex(&self) -> String {
        format!("0x{:02X}", self.payload)
    }
}

/// Immutable ordered event list
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Timeline {
    events: Vec<TimelineEvent>,
}

impl Timeline {
    /// Wrap already-validated events
    pub fn new(events: Vec<TimelineEvent>) -> Self {
        Self { events }
    }

    /// Build from raw `(seconds, byte)` pairs
    pub fn from_pairs<I>(pairs: I) -> Result<Self, TimelineError>
    where
        I: IntoIterator<Item = (f64, u8)>,
    {
        let events = pairs
            .into_iter()
            .map(|(time, payload)| TimelineEvent::new(time, payload))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(events))
    }

    /// Load a `time,data` CSV file
    pub fn load_csv(path: &Path) -> Result<Self, TimelineError> {
        let file = File::open(path)?;
        Self::parse_csv(BufReader::new(file))
    }

    /// Parse `time,data` CSV text.
    ///
    /// Header names are matched case-insensitively, fields are trimmed,
    /// blank lines and extra columns are ignored. `data` accepts decimal or
    /// `0x`-prefixed hex.
    pub fn parse_csv<R: BufRead>(reader: R) -> Result<Self, TimelineError> {
        let mut lines = reader.lines().enumerate();

        let (time_col, data_col) = loop {
            match lines.next() {
                Some((_, line)) => {
                    let line = line?;
                    let header = line.trim_start_matches('\u{feff}');
                    if header.trim().is_empty() {
                        continue;
                    }
                    break header_columns(header)?;
                }
                None => return Err(TimelineError::MissingColumn("time")),
            }
        };

        let mut events = Vec::new();
        for (idx, line) in lines {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let line_no = idx + 1;
            let fields = split_fields(&line);

            let invalid = |reason: String| TimelineError::InvalidRecord {
                line: line_no,
                reason,
            };

            let time_field = fields
                .get(time_col)
                .ok_or_else(|| invalid("missing time field".to_string()))?;
            let data_field = fields
                .get(data_col)
                .ok_or_else(|| invalid("missing data field".to_string()))?;

            let time: f64 = time_field
                .parse()
                .map_err(|_| invalid(format!("invalid time '{time_field}'")))?;
            let payload = parse_byte(data_field)
                .ok_or_else(|| invalid(format!("invalid data '{data_field}' (expected 0-255)")))?;

            let event = TimelineEvent::new(time, payload).map_err(|e| invalid(e.to_string()))?;
            events.push(event);
        }

        Ok(Self::new(events))
    }

    /// Number of events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether there are no events
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Event at `index`
    pub fn get(&self, index: usize) -> Option<&TimelineEvent> {
        self.events.get(index)
    }

    /// Iterate in playback order
    pub fn iter(&self) -> std::slice::Iter<'_, TimelineEvent> {
        self.events.iter()
    }

    /// Latest scheduled time, in seconds
    pub fn duration_secs(&self) -> f64 {
        self.events
            .iter()
            .map(TimelineEvent::time_secs)
            .fold(0.0, f64::max)
    }
}

impl<'a> IntoIterator for &'a Timeline {
    type Item = &'a TimelineEvent;
    type IntoIter = std::slice::Iter<'a, TimelineEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

/// Split one CSV record. Commas inside double quotes stay in the field and
/// `""` inside quotes is a literal quote.
fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => {
                fields.push(field.trim().to_string());
                field.clear();
            }
            _ => field.push(c),
        }
    }
    fields.push(field.trim().to_string());
    fields
}

fn header_columns(header: &str) -> Result<(usize, usize), TimelineError> {
    let names: Vec<String> = split_fields(header)
        .into_iter()
        .map(|f| f.to_lowercase())
        .collect();
    let find = |name: &'static str| {
        names
            .iter()
            .position(|n| n == name)
            .ok_or(TimelineError::MissingColumn(name))
    };
    Ok((find("time")?, find("data")?))
}

/// Parse a byte written as decimal (`32`) or hex (`0x20`)
pub fn parse_byte(field: &str) -> Option<u8> {
    let field = field.trim();
    if let Some(hex) = field.strip_prefix("0x").or_else(|| field.strip_prefix("0X")) {
        u8::from_str_radix(hex, 16).ok()
    } else {
        field.parse().ok()
    }
}
