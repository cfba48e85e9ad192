//! Command builder

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ricecoder_process::{
    AggregateObserver, Environment, EnvironmentVariables, NullObserver, ProcessObserver,
    ProcessSettings, UnixEnvironment,
};
use tracing::debug;

use crate::{
    argument::Argument,
    command::Command,
    error::{CommandError, Result},
};

/// Assembles a [`Command`]
///
/// Setters consume and return the builder; [`build`](Self::build) validates
/// the binary against the environment and freezes everything into an
/// immutable command.
pub struct CommandBuilder {
    environment: Arc<dyn Environment>,
    binary: Option<String>,
    arguments: Vec<Argument>,
    working_dir: Option<PathBuf>,
    env: EnvironmentVariables,
    observers: Vec<Arc<dyn ProcessObserver>>,
    timeout: Option<Duration>,
    poll_interval: Duration,
    kill_timeout: Duration,
    async_tick: Duration,
}

impl CommandBuilder {
    /// Create a builder for the given environment with default settings
    pub fn new(environment: Arc<dyn Environment>) -> Self {
        let settings = ProcessSettings::default();
        Self {
            environment,
            binary: None,
            arguments: Vec::new(),
            working_dir: None,
            env: EnvironmentVariables::new(),
            observers: Vec::new(),
            timeout: settings.timeout(),
            poll_interval: settings.poll_interval(),
            kill_timeout: settings.kill_timeout(),
            async_tick: settings.async_tick(),
        }
    }

    /// Create a builder with the environment matching the running OS
    pub fn for_current_os() -> Result<Self> {
        if UnixEnvironment::is_supported() {
            Ok(Self::new(Arc::new(UnixEnvironment::new())))
        } else {
            Err(CommandError::UnsupportedOs(env::consts::OS.to_string()))
        }
    }

    /// Seed timeout, poll interval, kill timeout and async tick from settings
    pub fn with_settings(mut self, settings: &ProcessSettings) -> Self {
        self.timeout = settings.timeout();
        self.poll_interval = settings.poll_interval();
        self.kill_timeout = settings.kill_timeout();
        self.async_tick = settings.async_tick();
        self
    }

    /// Set the binary to run
    pub fn command(mut self, binary: impl Into<String>) -> Self {
        self.binary = Some(binary.into());
        self
    }

    /// Add an argument, escaped for the shell
    pub fn argument(mut self, value: impl Into<String>) -> Self {
        self.arguments.push(Argument::Escaped(value.into()));
        self
    }

    /// Add an argument verbatim
    ///
    /// The shell interprets it, so never pass untrusted input here.
    pub fn raw_argument(mut self, value: impl Into<String>) -> Self {
        self.arguments.push(Argument::Raw(value.into()));
        self
    }

    /// Add several escaped arguments
    pub fn arguments<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments
            .extend(values.into_iter().map(|value| Argument::Escaped(value.into())));
        self
    }

    /// Set working directory
    pub fn working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set timeout duration
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Remove any timeout
    pub fn no_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    /// Set the sleep between polls of the synchronous wait loop
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the SIGTERM to SIGKILL grace period used on timeout
    pub fn kill_timeout(mut self, grace: Duration) -> Self {
        self.kill_timeout = grace;
        self
    }

    /// Set the tick of the asynchronous driver
    pub fn async_tick(mut self, tick: Duration) -> Self {
        self.async_tick = tick;
        self
    }

    /// Add environment variable; a later value for the same key wins
    pub fn environment_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Add several environment variables
    pub fn environment_variables<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(key, value)| (key.into(), value.into())));
        self
    }

    /// Register an observer; several observers are notified in order
    pub fn observer(mut self, observer: Arc<dyn ProcessObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Validate and freeze the command
    ///
    /// # Errors
    /// [`CommandError::MissingCommand`] if no binary was set,
    /// [`CommandError::InvalidCommand`] if the environment cannot resolve it.
    pub fn build(self) -> Result<Command> {
        let binary = self
            .binary
            .map(|binary| binary.trim().to_string())
            .filter(|binary| !binary.is_empty())
            .ok_or(CommandError::MissingCommand)?;

        if !self
            .environment
            .validate_command(&binary, self.working_dir.as_deref())
        {
            debug!(command = %binary, "Rejected command");
            return Err(CommandError::InvalidCommand { command: binary });
        }

        let mut observers = self.observers;
        let observer: Arc<dyn ProcessObserver> = if observers.len() > 1 {
            Arc::new(AggregateObserver::new(observers))
        } else {
            observers.pop().unwrap_or_else(|| Arc::new(NullObserver))
        };

        Ok(Command {
            environment: self.environment,
            observer,
            binary,
            arguments: self.arguments,
            working_dir: self.working_dir,
            env: self.env,
            timeout: self.timeout,
            poll_interval: self.poll_interval,
            kill_timeout: self.kill_timeout,
            async_tick: self.async_tick,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> CommandBuilder {
        CommandBuilder::new(Arc::new(UnixEnvironment::new()))
    }

    #[test]
    fn test_build_requires_command() {
        assert!(matches!(builder().build(), Err(CommandError::MissingCommand)));
        assert!(matches!(
            builder().command("   ").build(),
            Err(CommandError::MissingCommand)
        ));
    }

    #[test]
    fn test_build_rejects_unresolvable_command() {
        let err = builder()
            .command("definitely-not-a-real-binary-xyz")
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            CommandError::InvalidCommand { ref command } if command == "definitely-not-a-real-binary-xyz"
        ));
    }

    #[test]
    fn test_build_snapshot() {
        let command = builder()
            .command("ls")
            .argument("-l")
            .raw_argument("| wc -l")
            .arguments(["a b", "c"])
            .working_directory("/tmp")
            .environment_variable("FOO", "1")
            .environment_variables([("BAR", "2"), ("FOO", "3")])
            .timeout(Duration::from_secs(2))
            .poll_interval(Duration::from_millis(10))
            .build()
            .unwrap();

        assert_eq!(command.binary(), "ls");
        assert_eq!(command.arguments().len(), 4);
        assert_eq!(command.timeout(), Some(Duration::from_secs(2)));
        assert_eq!(command.poll_interval(), Duration::from_millis(10));
        assert_eq!(command.environment_variables().get("FOO").map(String::as_str), Some("3"));
        assert_eq!(
            command.to_string(),
            "BAR='2' FOO='3' ls '-l' | wc -l 'a b' 'c'"
        );
    }

    #[test]
    fn test_with_settings() {
        let settings = ProcessSettings {
            timeout_us: 1_500_000,
            poll_interval_us: 2_000,
            ..ProcessSettings::default()
        };
        let command = builder()
            .with_settings(&settings)
            .command("true")
            .build()
            .unwrap();
        assert_eq!(command.timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(command.poll_interval(), Duration::from_millis(2));

        let command = builder()
            .with_settings(&settings)
            .no_timeout()
            .command("true")
            .build()
            .unwrap();
        assert_eq!(command.timeout(), None);
    }

    #[test]
    fn test_for_current_os() {
        assert!(CommandBuilder::for_current_os().is_ok());
    }
}
