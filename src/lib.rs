//! # Serial Broadcast Core Library
//!
//! Replays a timeline of timestamped bytes to many serial devices at once:
//! - Registry of open device connections keyed by port name
//! - Broadcast writes with per-device failure isolation and eviction
//! - Tick-driven playback scheduler with pause, resume and reset
//! - Status events for whatever renders progress
//!
//! ## Example
//!
//! ```rust,no_run
//! use serial_broadcast_core::{DeviceRegistry, EventBus, PlaybackScheduler, SerialPortOpener, TickDriver, Timeline};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = Arc::new(DeviceRegistry::new(SerialPortOpener, EventBus::default()));
//!     registry.connect("COM3", 9600)?;
//!     registry.connect("COM4", 9600)?;
//!
//!     let timeline = Timeline::load_csv("timeline.csv".as_ref())?;
//!     let mut scheduler = PlaybackScheduler::new(timeline, registry);
//!
//!     let (_cancel_tx, cancel_rx) = tokio::sync::mpsc::channel(1);
//!     let summary = TickDriver::default().run(&mut scheduler, cancel_rx).await?;
//!     println!("{:?}: {} events", summary.outcome, summary.dispatched);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes, OutputFormat};
pub use crate::config::{AppConfig, ConfigError};
pub use crate::core::clock::{Clock, ManualClock, SystemClock};
pub use crate::core::driver::{PlaybackOutcome, PlaybackSummary, TickDriver};
pub use crate::core::events::{DisconnectReason, EventBus, StatusEvent, TimestampedEvent};
pub use crate::core::registry::{ConnectSummary, DeviceRegistry, RegistryError, SendResult};
pub use crate::core::scheduler::{PlaybackError, PlaybackScheduler, PlaybackState, TickReport};
pub use crate::core::timeline::{Timeline, TimelineError, TimelineEvent};
pub use crate::core::transport::{
    DeviceOpener, LinkSettings, MemoryOpener, SerialDevice, SerialPortOpener, TransportError,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
