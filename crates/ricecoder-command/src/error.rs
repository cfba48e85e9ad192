//! Error types for command construction

use ricecoder_process::ProcessError;
use thiserror::Error;

/// Command construction and execution errors
#[derive(Debug, Error)]
pub enum CommandError {
    /// `build` was called before a binary was set
    #[error("No command was set")]
    MissingCommand,

    /// The environment could not resolve the binary to an executable
    #[error("Invalid command: `{command}` does not resolve to an executable")]
    InvalidCommand { command: String },

    /// No environment supports the running OS
    #[error("Unsupported operating system: {0}")]
    UnsupportedOs(String),

    /// Spawning or driving the process failed
    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Result type for command operations
pub type Result<T> = std::result::Result<T, CommandError>;
