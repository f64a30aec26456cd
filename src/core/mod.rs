//! Core module containing the playback engine
//!
//! This module provides:
//! - Transport layer for serial and in-memory devices
//! - Multi-device registry with broadcast and targeted writes
//! - Timelines of timestamped bytes
//! - Playback scheduler and its periodic tick driver
//! - Status events for presentation layers

pub mod clock;
pub mod driver;
pub mod events;
pub mod registry;
pub mod scheduler;
pub mod timeline;
pub mod transport;
