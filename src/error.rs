//! # Error Types
//!
//! Error handling for the broker protocol.
//!
//! Every failure the broker core can observe is a variant of [`ProtocolError`].
//! Which variants travel where is fixed:
//!
//! ## Error Categories
//! - **Transport**: `ChannelClosed`, `AccessDenied`, `Io`. These propagate to
//!   whichever side saw them.
//! - **Protocol**: `DeserializeError`, `SerializeError`, `FrameTooLarge`,
//!   `InvalidUtf8`. The server turns these into an `Error` response; the client
//!   surfaces them to its caller.
//! - **Setup**: `ReservedTask`, `UnknownTask`, `ConfigError`. Raised while
//!   registering handlers or loading configuration, never on the wire.
//!
//! Handler failures are not represented here; they are
//! [`TaskFault`](crate::protocol::dispatcher::TaskFault) values collapsed into a
//! response by the server loop.
//!
//! ## Example Usage
//! ```rust
//! use privilege_broker::error::{ProtocolError, Result};
//! use std::io;
//!
//! fn classify(e: io::Error) -> Result<()> {
//!     Err(ProtocolError::from_connect_error(e))
//! }
//!
//! let err = classify(io::Error::from(io::ErrorKind::NotFound)).unwrap_err();
//! assert!(matches!(err, ProtocolError::ChannelClosed));
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Dispatcher-related error messages
    pub const ERR_DISPATCHER_WRITE_LOCK: &str = "Failed to acquire write lock on dispatcher";
    pub const ERR_DISPATCHER_READ_LOCK: &str = "Failed to acquire read lock on dispatcher";

    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_PARTIAL_FRAME: &str = "Connection closed in the middle of a frame";

    /// Dispatch errors
    pub const ERR_HANDLER_PANICKED: &str = "Task handler panicked";
    pub const ERR_REQUEST_FAILED_PREFIX: &str = "Error occurred while running protocol request: ";

    /// Thread management errors
    pub const ERR_SERVER_THREAD_PANICKED: &str = "Broker server thread panicked";
}

/// ProtocolError is the primary error type for all broker operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Deserialize error: {0}")]
    DeserializeError(String),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("Frame payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("Task {0} is reserved for the broker and cannot have a handler")]
    ReservedTask(u32),

    #[error("Task {0} is not in the task table")]
    UnknownTask(u32),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Classify an I/O failure that happened while opening a connection.
    ///
    /// A missing or refusing endpoint means there is no accept loop to talk to,
    /// which callers see as `ChannelClosed`.
    pub fn from_connect_error(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => Self::ChannelClosed,
            io::ErrorKind::PermissionDenied => Self::AccessDenied(err.to_string()),
            _ => Self::Io(err),
        }
    }

    /// Classify an I/O failure that happened mid-exchange.
    pub fn from_exchange_error(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted => Self::ChannelClosed,
            _ => Self::Io(err),
        }
    }

    /// Whether this error was raised because the payload could not be
    /// understood, as opposed to the transport failing.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::DeserializeError(_)
                | Self::SerializeError(_)
                | Self::FrameTooLarge(_)
                | Self::InvalidUtf8
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
