//! AirTouch 2+ error types
//!
//! Provides structured error types for client operations and wire decoding.

use std::io;

/// Errors surfaced by the client lifecycle and send path
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// No connection has been established yet (or it is currently down)
    #[error("Client is not connected - call connect() first")]
    NotConnected,
    /// `stop()` called without a running read loop
    #[error("Client task is not running")]
    NotRunning,
    /// `run()` called while the read loop is already running
    #[error("Client task is already running")]
    AlreadyRunning,
    /// Connect failed with an OS error that is not a transient network condition
    #[error("Fatal connection error to {target}: {source}")]
    ConnectionFatal {
        target: String,
        #[source]
        source: io::Error,
    },
    /// I/O error on an established connection
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Payload could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    /// Internal channel closed while a component was still waiting on it
    #[error("Channel closed: {0}")]
    ChannelClosed(String),
    /// A background task panicked
    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

/// Errors raised while decoding bytes off the wire
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Header did not start with the sync magic
    #[error("Invalid header magic {0:#06x}")]
    BadMagic(u16),
    /// Fewer bytes available than the structure requires
    #[error("{context}: need {needed} bytes, have {available}")]
    Truncated {
        context: &'static str,
        needed: usize,
        available: usize,
    },
    /// Extended sub-header without its leading marker byte
    #[error("Invalid extended sub-header marker {0:#04x}")]
    BadExtendedMarker(u8),
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;
