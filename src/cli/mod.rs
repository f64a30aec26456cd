//! CLI Module
//!
//! Provides command-line support functionality including:
//! - Exit codes for automation
//! - Event and report rendering
//! - Manual byte sends

pub mod exit_codes;
pub mod output;
pub mod send;

pub use exit_codes::{exit_code_description, print_exit_codes, CliResult, ExitCodes};
pub use output::{describe, format_event, render_event, summary_text, OutputFormat};
pub use send::{send_byte, ManualSend};
