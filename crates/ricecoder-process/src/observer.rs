//! Lifecycle notification sinks
//!
//! A [`Process`](crate::Process) reports every lifecycle point to a
//! [`ProcessObserver`]. Observers must tolerate any call frequency, including
//! empty reads and a poll notification on every loop iteration.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::Level;

use crate::{environment::EnvironmentVariables, output::ProcessOutput, signal::Signal};

/// Receives process lifecycle notifications
///
/// Every method defaults to a no-op so single-purpose observers only
/// implement what they care about. Observers cannot influence control flow;
/// a panicking observer propagates to the caller driving the process.
pub trait ProcessObserver: Send + Sync {
    /// The process was spawned
    fn process_created(
        &self,
        _pid: u32,
        _command: &str,
        _cwd: &Path,
        _env: &EnvironmentVariables,
    ) {
    }

    /// Running state was queried
    fn process_polled(&self, _pid: u32, _running_time: Duration) {}

    /// A chunk was drained from stdout (may be empty)
    fn stdout_read(&self, _pid: u32, _chunk: &str) {}

    /// A chunk was drained from stderr (may be empty)
    fn stderr_read(&self, _pid: u32, _chunk: &str) {}

    /// A signal is about to be dispatched
    fn sent_signal(&self, _pid: u32, _signal: Signal) {}

    /// The process terminated; called exactly once per process
    fn process_exited(&self, _pid: u32, _output: &ProcessOutput) {}
}

/// Observer that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl ProcessObserver for NullObserver {}

/// Fans every notification out to child observers in registration order
#[derive(Clone, Default)]
pub struct AggregateObserver {
    observers: Vec<Arc<dyn ProcessObserver>>,
}

impl AggregateObserver {
    /// Create an aggregate over the given observers
    pub fn new(observers: Vec<Arc<dyn ProcessObserver>>) -> Self {
        Self { observers }
    }

    /// Append an observer
    pub fn push(&mut self, observer: Arc<dyn ProcessObserver>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl std::fmt::Debug for AggregateObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateObserver")
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl ProcessObserver for AggregateObserver {
    fn process_created(&self, pid: u32, command: &str, cwd: &Path, env: &EnvironmentVariables) {
        for observer in &self.observers {
            observer.process_created(pid, command, cwd, env);
        }
    }

    fn process_polled(&self, pid: u32, running_time: Duration) {
        for observer in &self.observers {
            observer.process_polled(pid, running_time);
        }
    }

    fn stdout_read(&self, pid: u32, chunk: &str) {
        for observer in &self.observers {
            observer.stdout_read(pid, chunk);
        }
    }

    fn stderr_read(&self, pid: u32, chunk: &str) {
        for observer in &self.observers {
            observer.stderr_read(pid, chunk);
        }
    }

    fn sent_signal(&self, pid: u32, signal: Signal) {
        for observer in &self.observers {
            observer.sent_signal(pid, signal);
        }
    }

    fn process_exited(&self, pid: u32, output: &ProcessOutput) {
        for observer in &self.observers {
            observer.process_exited(pid, output);
        }
    }
}

// tracing macros need a const level, so dispatch by hand
macro_rules! event_at {
    ($level:expr, $($arg:tt)+) => {{
        let level = $level;
        if level == Level::ERROR {
            tracing::error!($($arg)+)
        } else if level == Level::WARN {
            tracing::warn!($($arg)+)
        } else if level == Level::INFO {
            tracing::info!($($arg)+)
        } else if level == Level::DEBUG {
            tracing::debug!($($arg)+)
        } else {
            tracing::trace!($($arg)+)
        }
    }};
}

/// Logs every lifecycle notification through `tracing`
#[derive(Debug, Clone, Copy)]
pub struct AllEventsLogger {
    level: Level,
}

impl AllEventsLogger {
    pub fn new(level: Level) -> Self {
        Self { level }
    }
}

impl Default for AllEventsLogger {
    fn default() -> Self {
        Self::new(Level::DEBUG)
    }
}

impl ProcessObserver for AllEventsLogger {
    fn process_created(&self, pid: u32, command: &str, cwd: &Path, env: &EnvironmentVariables) {
        event_at!(
            self.level,
            pid = %pid,
            command = %command,
            cwd = %cwd.display(),
            env = ?env,
            "Process created"
        );
    }

    fn process_polled(&self, pid: u32, running_time: Duration) {
        event_at!(
            self.level,
            pid = %pid,
            running_ms = running_time.as_millis() as u64,
            "Process polled"
        );
    }

    fn stdout_read(&self, pid: u32, chunk: &str) {
        event_at!(self.level, pid = %pid, stdout = %chunk, "Read from stdout");
    }

    fn stderr_read(&self, pid: u32, chunk: &str) {
        event_at!(self.level, pid = %pid, stderr = %chunk, "Read from stderr");
    }

    fn sent_signal(&self, pid: u32, signal: Signal) {
        event_at!(self.level, pid = %pid, signal = %signal, "Signal sent");
    }

    fn process_exited(&self, pid: u32, output: &ProcessOutput) {
        event_at!(
            self.level,
            pid = %pid,
            exit_code = output.exit_code(),
            command = %output.command(),
            "Process exited"
        );
    }
}

/// Logs only stderr output and non-zero exits
#[derive(Debug, Clone, Copy)]
pub struct ErrorLogger {
    level: Level,
}

impl ErrorLogger {
    pub fn new(level: Level) -> Self {
        Self { level }
    }
}

impl Default for ErrorLogger {
    fn default() -> Self {
        Self::new(Level::WARN)
    }
}

impl ProcessObserver for ErrorLogger {
    fn stderr_read(&self, pid: u32, chunk: &str) {
        if !chunk.is_empty() {
            event_at!(self.level, pid = %pid, stderr = %chunk, "Read from stderr");
        }
    }

    fn process_exited(&self, pid: u32, output: &ProcessOutput) {
        if !output.success() {
            event_at!(
                self.level,
                pid = %pid,
                exit_code = output.exit_code(),
                command = %output.command(),
                stderr = %output.stderr(),
                "Process exited with non-zero code"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Tagged {
        tag: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl ProcessObserver for Tagged {
        fn stdout_read(&self, _pid: u32, chunk: &str) {
            self.log.lock().unwrap().push(format!("{}:{}", self.tag, chunk));
        }

        fn process_exited(&self, pid: u32, _output: &ProcessOutput) {
            self.log.lock().unwrap().push(format!("{}:exit:{}", self.tag, pid));
        }
    }

    struct Panicking;

    impl ProcessObserver for Panicking {
        fn sent_signal(&self, _pid: u32, _signal: Signal) {
            panic!("observer failure");
        }
    }

    #[test]
    fn test_aggregate_fans_out_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let aggregate = AggregateObserver::new(vec![
            Arc::new(Tagged { tag: "a", log: log.clone() }),
            Arc::new(Tagged { tag: "b", log: log.clone() }),
        ]);
        assert_eq!(aggregate.len(), 2);

        aggregate.stdout_read(7, "");
        aggregate.process_exited(7, &ProcessOutput::new(0, "", "", "true", "/"));

        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:", "b:", "a:exit:7", "b:exit:7"]
        );
    }

    #[test]
    #[should_panic(expected = "observer failure")]
    fn test_aggregate_does_not_swallow_panics() {
        let aggregate = AggregateObserver::new(vec![Arc::new(NullObserver), Arc::new(Panicking)]);
        aggregate.sent_signal(1, Signal::Term);
    }

    #[test]
    fn test_loggers_accept_any_notification() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(Level::TRACE)
            .with_test_writer()
            .try_init();

        let output = ProcessOutput::new(3, "", "boom\n", "false", "/");
        let env = EnvironmentVariables::new();
        let observers: Vec<Arc<dyn ProcessObserver>> = vec![
            Arc::new(NullObserver),
            Arc::new(AllEventsLogger::new(Level::TRACE)),
            Arc::new(AllEventsLogger::new(Level::ERROR)),
            Arc::new(ErrorLogger::default()),
        ];
        for observer in observers {
            observer.process_created(1, "false", Path::new("/"), &env);
            observer.process_polled(1, Duration::from_millis(3));
            observer.stdout_read(1, "");
            observer.stderr_read(1, "boom\n");
            observer.sent_signal(1, Signal::Kill);
            observer.process_exited(1, &output);
        }
    }
}
