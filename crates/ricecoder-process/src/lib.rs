//! # ricecoder-process
//!
//! **Purpose**: Lifecycle control for external commands
//!
//! Spawns a child through `/bin/sh`, polls its running state, drains its
//! output incrementally, enforces timeouts and escalates SIGTERM→SIGKILL on
//! stop. The terminal [`ProcessOutput`] is produced exactly once.
//!
//! ## Features
//!
//! - **Synchronous wait**: cooperative polling loop with a configurable interval
//! - **Asynchronous wait**: periodic tick on a tokio runtime, resolving `Ok` on
//!   exit code 0 and `Err` otherwise
//! - **Latched exit codes**: the first observed status wins
//! - **Observers**: lifecycle notifications, `tracing`-backed loggers and fan-out
//! - **Pluggable environment**: spawning, signals and path policy behind a trait
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ricecoder_process::{AllEventsLogger, Process, ProcessOptions, UnixEnvironment};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut process = Process::spawn(
//!     Arc::new(UnixEnvironment::new()),
//!     Arc::new(AllEventsLogger::default()),
//!     ProcessOptions::new("echo hello"),
//! )?;
//!
//! let output = process.wait()?;
//! assert_eq!(output.stdout(), "hello\n");
//! # Ok(())
//! # }
//! ```

#[cfg(not(unix))]
compile_error!("ricecoder-process only supports Unix-family systems");

pub mod config;
pub mod environment;
pub mod error;
pub mod observer;
pub mod output;
pub mod process;
pub mod signal;

pub use config::ProcessSettings;
pub use environment::{Environment, EnvironmentVariables, SpawnRequest, UnixEnvironment};
pub use error::{ProcessError, Result};
pub use observer::{AggregateObserver, AllEventsLogger, ErrorLogger, NullObserver, ProcessObserver};
pub use output::{split_lines, ProcessOutput};
pub use process::{AsyncOutcome, Process, ProcessOptions, DEFAULT_KILL_TIMEOUT};
pub use signal::{Signal, StreamId};
