//! CLI Exit Codes
//!
//! Process exit codes for playback runs, so scripts can tell a clean run
//! from a degraded or failed one.

use crate::config::ConfigError;
use crate::core::registry::RegistryError;
use crate::core::scheduler::PlaybackError;
use crate::core::timeline::TimelineError;
use crate::core::transport::TransportError;
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// No device could be connected
    pub const CONNECTION_FAILED: u8 = 3;

    /// Write or open timed out
    pub const TIMEOUT: u8 = 4;

    /// File not found
    pub const FILE_NOT_FOUND: u8 = 5;

    /// Permission denied
    pub const PERMISSION_DENIED: u8 = 6;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 7;

    /// Timeline file is malformed
    pub const INVALID_TIMELINE: u8 = 8;

    /// Timeline has no events
    pub const NO_DATA: u8 = 9;

    /// No connected devices
    pub const NO_DEVICES: u8 = 10;

    /// User cancelled
    pub const CANCELLED: u8 = 11;

    /// Port not found
    pub const PORT_NOT_FOUND: u8 = 12;

    /// Port busy
    pub const PORT_BUSY: u8 = 13;

    /// Playback finished but some devices failed or were evicted
    pub const PARTIAL_FAILURE: u8 = 14;

    /// Internal error
    pub const INTERNAL_ERROR: u8 = 127;

    const ALL: [u8; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 127];
}

/// CLI operation result
#[derive(Debug)]
pub enum CliResult {
    /// Success with optional message
    Success(Option<String>),

    /// Error with code and message
    Error(u8, String),
}

impl CliResult {
    /// Plain success
    pub fn success() -> Self {
        Self::Success(None)
    }

    /// Success with a closing message
    pub fn success_with_message(msg: impl Into<String>) -> Self {
        Self::Success(Some(msg.into()))
    }

    /// Failure with an explicit code
    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success(_) => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    /// Get message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(Some(msg)) | Self::Error(_, msg) => Some(msg),
            Self::Success(None) => None,
        }
    }

    /// Convert to `ExitCode`
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl From<std::io::Error> for CliResult {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let code = match err.kind() {
            ErrorKind::NotFound => ExitCodes::FILE_NOT_FOUND,
            ErrorKind::PermissionDenied => ExitCodes::PERMISSION_DENIED,
            ErrorKind::TimedOut => ExitCodes::TIMEOUT,
            _ => ExitCodes::ERROR,
        };

        Self::Error(code, err.to_string())
    }
}

impl From<TransportError> for CliResult {
    fn from(err: TransportError) -> Self {
        let code = match &err {
            TransportError::PortNotFound(_) => ExitCodes::PORT_NOT_FOUND,
            TransportError::PermissionDenied(_) => ExitCodes::PERMISSION_DENIED,
            TransportError::PortInUse(_) => ExitCodes::PORT_BUSY,
            TransportError::Timeout(_) => ExitCodes::TIMEOUT,
            _ => ExitCodes::CONNECTION_FAILED,
        };
        Self::Error(code, err.to_string())
    }
}

impl From<RegistryError> for CliResult {
    fn from(err: RegistryError) -> Self {
        let message = err.to_string();
        match err {
            RegistryError::AlreadyConnected(_) => Self::Error(ExitCodes::INVALID_ARGS, message),
            RegistryError::Open { source, .. } => Self::Error(Self::from(source).code(), message),
        }
    }
}

impl From<TimelineError> for CliResult {
    fn from(err: TimelineError) -> Self {
        match err {
            TimelineError::Io(e) => e.into(),
            other => Self::Error(ExitCodes::INVALID_TIMELINE, other.to_string()),
        }
    }
}

impl From<PlaybackError> for CliResult {
    fn from(err: PlaybackError) -> Self {
        let code = match err {
            PlaybackError::NoData => ExitCodes::NO_DATA,
            PlaybackError::NoDevices => ExitCodes::NO_DEVICES,
            PlaybackError::Running | PlaybackError::AlreadyComplete => ExitCodes::INTERNAL_ERROR,
        };
        Self::Error(code, err.to_string())
    }
}

impl From<ConfigError> for CliResult {
    fn from(err: ConfigError) -> Self {
        Self::Error(ExitCodes::CONFIG_ERROR, err.to_string())
    }
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "Connection failed",
        4 => "Timeout",
        5 => "File not found",
        6 => "Permission denied",
        7 => "Configuration error",
        8 => "Invalid timeline",
        9 => "No data to send",
        10 => "No connected devices",
        11 => "Operation cancelled",
        12 => "Port not found",
        13 => "Port busy",
        14 => "Some devices failed",
        127 => "Internal error",
        _ => "Unknown error",
    }
}

/// Print exit code table
pub fn print_exit_codes() {
    println!("Exit Codes:");
    for code in ExitCodes::ALL {
        println!("  {:>3}  {}", code, exit_code_description(code));
    }
}
