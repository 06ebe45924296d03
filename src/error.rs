//! Error types for the chat relay
//!
//! Provides structured error handling with:
//! - Numeric error codes grouped by fault class
//! - A separate [`CommandError`] for the command/ack round trip, so callers
//!   can tell "no response" apart from "denied"
//! - Suggestions and exit codes for the CLI

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric error codes for machine parsing and documentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    // Configuration errors (1xx)
    ConfigNotFound = 100,
    ConfigParseError = 101,
    ConfigValidation = 102,

    // IO errors (2xx)
    IoRead = 200,
    IoWrite = 201,
    IoPermission = 202,
    IoNotFound = 203,

    // Transport errors (3xx)
    ConnectionFailed = 300,
    ConnectionTimeout = 301,
    ConnectionLost = 303,
    TransportClosed = 305,

    // Protocol errors (4xx)
    ProtocolMalformed = 401,
    ProtocolUnexpected = 402,
    MissingClientId = 404,

    // Command errors (5xx)
    AckTimeout = 500,
    NoLeader = 501,
    CommandPending = 502,
    CommandRejected = 503,

    // Backend errors (6xx)
    NoActiveTask = 600,
    UnknownTask = 601,
    BackendFailed = 602,

    // Internal errors (9xx)
    InternalError = 900,
    ChannelClosed = 901,
}

impl ErrorCode {
    /// Get the string code (e.g., "E100")
    pub fn as_str(&self) -> String {
        format!("E{}", *self as u16)
    }

    /// Get the exit code for CLI
    pub fn exit_code(&self) -> i32 {
        match *self as u16 {
            100..=199 => 10,
            200..=299 => 20,
            300..=399 => 30,
            400..=499 => 40,
            500..=599 => 50,
            600..=699 => 60,
            900..=999 => 90,
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────
// Command Errors
// ─────────────────────────────────────────────────────────────────

/// Failure of a control command sent through the command/ack protocol.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The leader never acknowledged within the deadline
    #[error("no acknowledgement for '{command}' on channel {channel_id} after {}ms", .after.as_millis())]
    Timeout {
        command: String,
        channel_id: String,
        after: Duration,
    },

    /// No relay client is connected to receive the command
    #[error("no relay client is connected")]
    NoLeader,

    /// Another command for this channel is still awaiting its acknowledgement
    #[error("a '{command}' command is already pending for channel {channel_id}")]
    Pending { command: String, channel_id: String },

    /// The leader answered, but refused or failed to act
    #[error("relay client rejected the command: {reason}")]
    Rejected { reason: String },

    /// The coordinator went away before the command resolved
    #[error("coordinator is shutting down")]
    Shutdown,
}

impl CommandError {
    /// True when the command got no answer at all, as opposed to a negative one.
    pub fn is_no_response(&self) -> bool {
        matches!(
            self,
            CommandError::Timeout { .. } | CommandError::NoLeader | CommandError::Shutdown
        )
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            CommandError::Timeout { .. } => ErrorCode::AckTimeout,
            CommandError::NoLeader => ErrorCode::NoLeader,
            CommandError::Pending { .. } => ErrorCode::CommandPending,
            CommandError::Rejected { .. } => ErrorCode::CommandRejected,
            CommandError::Shutdown => ErrorCode::ChannelClosed,
        }
    }
}

/// Main error type for the relay
#[derive(Error, Debug)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound {
        path: PathBuf,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Configuration parse error
    #[error("Failed to parse configuration: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<toml::de::Error>,
    },

    /// Configuration validation error
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String, field: Option<String> },

    // ─────────────────────────────────────────────────────────────
    // IO Errors
    // ─────────────────────────────────────────────────────────────

    /// File read error
    #[error("Failed to read file: {path}")]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File write error
    #[error("Failed to write file: {path}")]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    // ─────────────────────────────────────────────────────────────
    // Transport Errors
    // ─────────────────────────────────────────────────────────────

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection failed
    #[error("Failed to connect to {url}: {message}")]
    ConnectionFailed { url: String, message: String },

    /// Connection timeout
    #[error("Connection to {url} timed out after {timeout_ms}ms")]
    ConnectionTimeout { url: String, timeout_ms: u64 },

    /// Connection lost
    #[error("Lost connection: {message}")]
    ConnectionLost { message: String },

    /// Send on a transport whose writer has gone away
    #[error("Transport for client {client_id} is closed")]
    TransportClosed { client_id: String },

    // ─────────────────────────────────────────────────────────────
    // Protocol Errors
    // ─────────────────────────────────────────────────────────────

    /// Inbound payload could not be decoded
    #[error("Malformed protocol message: {message}")]
    ProtocolMalformed { message: String },

    /// Well-formed message that makes no sense in this direction
    #[error("Unexpected '{message_type}' message")]
    ProtocolUnexpected { message_type: String },

    /// Registration without a client identity
    #[error("Connection rejected: missing clientId parameter")]
    MissingClientId,

    // ─────────────────────────────────────────────────────────────
    // Backend Errors
    // ─────────────────────────────────────────────────────────────

    /// Engine has no active task to act on
    #[error("No active task")]
    NoActiveTask,

    /// Engine does not know this task
    #[error("Unknown task: {task_id}")]
    UnknownTask { task_id: String },

    /// Engine failed to act
    #[error("Backend error: {0}")]
    Backend(String),

    // ─────────────────────────────────────────────────────────────
    // Internal Errors
    // ─────────────────────────────────────────────────────────────

    /// An internal queue was closed underneath us
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::ProtocolMalformed {
            message: err.to_string(),
        }
    }
}

impl Error {
    // ─────────────────────────────────────────────────────────────
    // Error Classification
    // ─────────────────────────────────────────────────────────────

    /// Get the numeric error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::ConfigNotFound { .. } => ErrorCode::ConfigNotFound,
            Error::ConfigParse { .. } => ErrorCode::ConfigParseError,
            Error::ConfigValidation { .. } => ErrorCode::ConfigValidation,

            Error::IoRead { .. } => ErrorCode::IoRead,
            Error::IoWrite { .. } => ErrorCode::IoWrite,
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorCode::IoNotFound,
                std::io::ErrorKind::PermissionDenied => ErrorCode::IoPermission,
                _ => ErrorCode::IoRead,
            },
            Error::Toml(_) => ErrorCode::ConfigParseError,

            Error::WebSocket(_) => ErrorCode::ConnectionFailed,
            Error::ConnectionFailed { .. } => ErrorCode::ConnectionFailed,
            Error::ConnectionTimeout { .. } => ErrorCode::ConnectionTimeout,
            Error::ConnectionLost { .. } => ErrorCode::ConnectionLost,
            Error::TransportClosed { .. } => ErrorCode::TransportClosed,

            Error::ProtocolMalformed { .. } => ErrorCode::ProtocolMalformed,
            Error::ProtocolUnexpected { .. } => ErrorCode::ProtocolUnexpected,
            Error::MissingClientId => ErrorCode::MissingClientId,

            Error::NoActiveTask => ErrorCode::NoActiveTask,
            Error::UnknownTask { .. } => ErrorCode::UnknownTask,
            Error::Backend(_) => ErrorCode::BackendFailed,

            Error::ChannelClosed(_) => ErrorCode::ChannelClosed,
            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Transport faults are recovered by reconnecting or re-electing
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::WebSocket(_)
                | Error::ConnectionFailed { .. }
                | Error::ConnectionTimeout { .. }
                | Error::ConnectionLost { .. }
                | Error::TransportClosed { .. }
                | Error::Io(_)
        )
    }

    /// Only startup configuration problems stop the process
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConfigNotFound { .. } | Error::ConfigParse { .. } | Error::ConfigValidation { .. }
        )
    }

    /// Backend faults that are reported as information rather than failure
    pub fn is_informational(&self) -> bool {
        matches!(self, Error::NoActiveTask | Error::UnknownTask { .. })
    }

    /// Get the exit code for CLI
    pub fn exit_code(&self) -> i32 {
        self.code().exit_code()
    }

    // ─────────────────────────────────────────────────────────────
    // User-Friendly Messages
    // ─────────────────────────────────────────────────────────────

    /// Get a user-friendly suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::ConfigNotFound { .. } => Some(
                "Run 'chat-relay config init' to create a default configuration file."
            ),
            Error::ConfigParse { .. } => Some(
                "Check your configuration file syntax. Run 'chat-relay config validate' to see details."
            ),
            Error::ConfigValidation { .. } => Some(
                "Review the configuration file and fix the invalid values."
            ),
            Error::ConnectionFailed { .. } | Error::ConnectionTimeout { .. } => Some(
                "Check that the coordinator is running ('chat-relay serve') and the client url is correct."
            ),
            Error::ConnectionLost { .. } => Some(
                "Connection was interrupted. The relay client reconnects automatically."
            ),
            Error::MissingClientId => Some(
                "Connect with '?clientId=<id>' in the coordinator url."
            ),
            _ => None,
        }
    }

    /// Format the error for terminal display with colors
    pub fn format_for_terminal(&self) -> String {
        let mut output = format!("\x1b[31mError [{}]\x1b[0m: {}\n", self.code().as_str(), self);

        if let Some(hint) = self.suggestion() {
            output.push_str(&format!("\n\x1b[33mHint\x1b[0m: {}\n", hint));
        }

        output
    }

    /// Format the error for logging (no colors)
    pub fn format_for_log(&self) -> String {
        format!("[{}] {}", self.code().as_str(), self)
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn config_not_found(path: impl Into<PathBuf>) -> Self {
        Error::ConfigNotFound {
            path: path.into(),
            source: None,
        }
    }

    pub fn config_parse(message: impl Into<String>) -> Self {
        Error::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_validation(message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a config validation error with field name
    pub fn config_field_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn connection_failed(url: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConnectionFailed {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Error::ProtocolMalformed {
            message: message.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
