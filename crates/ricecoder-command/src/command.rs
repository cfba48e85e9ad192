//! Immutable, validated command

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ricecoder_process::{
    Environment, EnvironmentVariables, Process, ProcessObserver, ProcessOptions, ProcessOutput,
};
use tracing::debug;

use crate::{argument::Argument, error::Result};

/// A validated command ready to run any number of times
///
/// Built by [`CommandBuilder`](crate::CommandBuilder). [`Display`](fmt::Display)
/// renders the full shell command line, environment prefix included.
#[derive(Clone)]
pub struct Command {
    pub(crate) environment: Arc<dyn Environment>,
    pub(crate) observer: Arc<dyn ProcessObserver>,
    pub(crate) binary: String,
    pub(crate) arguments: Vec<Argument>,
    pub(crate) working_dir: Option<PathBuf>,
    pub(crate) env: EnvironmentVariables,
    pub(crate) timeout: Option<Duration>,
    pub(crate) poll_interval: Duration,
    pub(crate) kill_timeout: Duration,
    pub(crate) async_tick: Duration,
}

impl Command {
    /// Run to completion on the calling thread
    pub fn run_synchronous(&self) -> Result<ProcessOutput> {
        let mut process = self.run_asynchronous()?;
        Ok(process.wait()?)
    }

    /// Spawn and return the live process without waiting
    pub fn run_asynchronous(&self) -> Result<Process> {
        let options = self.process_options();
        debug!(command = %options.command, "Running command");
        Ok(Process::spawn(
            self.environment.clone(),
            self.observer.clone(),
            options,
        )?)
    }

    /// The command line handed to the shell
    pub fn command_line(&self) -> String {
        let mut line = self.binary.clone();
        for argument in &self.arguments {
            line.push(' ');
            line.push_str(&argument.render(self.environment.as_ref()));
        }
        self.environment.apply_environment_variables(&line, &self.env)
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    pub fn arguments(&self) -> &[Argument] {
        &self.arguments
    }

    pub fn working_directory(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    pub fn environment_variables(&self) -> &EnvironmentVariables {
        &self.env
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn process_options(&self) -> ProcessOptions {
        ProcessOptions {
            command: self.command_line(),
            working_dir: self.working_dir.clone(),
            env: self.env.clone(),
            timeout: self.timeout,
            poll_interval: self.poll_interval,
            kill_timeout: self.kill_timeout,
            async_tick: self.async_tick,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("command_line", &self.command_line())
            .field("working_dir", &self.working_dir)
            .field("timeout", &self.timeout)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}
