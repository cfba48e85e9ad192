//! Error types for process management

use std::io;
use thiserror::Error;

use crate::signal::{Signal, StreamId};

/// Process management errors
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The OS refused to create the process
    #[error("Failed to spawn process `{command}`: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: io::Error,
    },

    /// Requested signal is not one of the supported set
    #[error("Unknown signal: {0}")]
    UnknownSignal(String),

    /// The OS refused to deliver a signal
    #[error("Failed to send {signal} to process (PID: {pid}): {reason}")]
    SignalFailed {
        pid: u32,
        signal: Signal,
        reason: String,
    },

    /// Operation requires a live process
    #[error("Process is no longer running")]
    NotRunning,

    /// Terminal output requested before the process exited
    #[error("Process is still running")]
    StillRunning,

    /// Stream cannot be used for the requested operation
    #[error("Cannot {operation} stream {stream}")]
    InvalidStream {
        stream: StreamId,
        operation: &'static str,
    },

    /// Pipe I/O failure
    #[error("Process I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid runner settings
    #[error("Invalid process settings: {0}")]
    Settings(String),
}

/// Result type for process operations
pub type Result<T> = std::result::Result<T, ProcessError>;
