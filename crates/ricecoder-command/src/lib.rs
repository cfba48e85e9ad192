//! # ricecoder-command
//!
//! **Purpose**: Assemble shell command lines and hand them to `ricecoder-process`
//!
//! A [`CommandBuilder`] collects the binary, escaped or raw arguments,
//! environment variables, working directory, timing settings and observers.
//! [`CommandBuilder::build`] validates the binary against the
//! [`Environment`](ricecoder_process::Environment) and produces an immutable
//! [`Command`] that can be run synchronously or asynchronously.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use ricecoder_command::CommandBuilder;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let command = CommandBuilder::for_current_os()?
//!     .command("printf")
//!     .raw_argument("'%s\\n'")
//!     .argument("if=/dev/sha1 of=/dev/sdb2")
//!     .timeout(Duration::from_secs(5))
//!     .build()?;
//!
//! let output = command.run_synchronous()?;
//! println!("{}", output.stdout());
//! # Ok(())
//! # }
//! ```

pub mod argument;
pub mod builder;
pub mod command;
pub mod error;

pub use argument::Argument;
pub use builder::CommandBuilder;
pub use command::Command;
pub use error::{CommandError, Result};
