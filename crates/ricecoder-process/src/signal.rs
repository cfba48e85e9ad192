//! Supported signals and stdio stream identifiers

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ProcessError, Result};

/// Signals a managed process can receive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Signal {
    /// Polite termination request (SIGTERM)
    Term,
    /// Forced termination (SIGKILL)
    Kill,
}

impl Signal {
    /// Canonical name without the `SIG` prefix
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Term => "TERM",
            Signal::Kill => "KILL",
        }
    }

    pub(crate) fn to_nix(self) -> nix::sys::signal::Signal {
        match self {
            Signal::Term => nix::sys::signal::Signal::SIGTERM,
            Signal::Kill => nix::sys::signal::Signal::SIGKILL,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIG{}", self.as_str())
    }
}

impl FromStr for Signal {
    type Err = ProcessError;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        match upper.strip_prefix("SIG").unwrap_or(&upper) {
            "TERM" => Ok(Signal::Term),
            "KILL" => Ok(Signal::Kill),
            _ => Err(ProcessError::UnknownSignal(s.to_string())),
        }
    }
}

/// Standard stream slots of a child process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StreamId {
    Stdin = 0,
    Stdout = 1,
    Stderr = 2,
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamId::Stdin => "stdin",
            StreamId::Stdout => "stdout",
            StreamId::Stderr => "stderr",
        };
        write!(f, "{} ({})", name, *self as u8)
    }
}

impl TryFrom<u8> for StreamId {
    type Error = ProcessError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(StreamId::Stdin),
            1 => Ok(StreamId::Stdout),
            2 => Ok(StreamId::Stderr),
            other => Err(ProcessError::Settings(format!(
                "unknown stream index {}",
                other
            ))),
        }
    }
}
