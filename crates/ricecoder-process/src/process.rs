//! Process lifecycle controller
//!
//! A [`Process`] owns one spawned child and its stdio pipes from spawn to
//! termination. It can be driven in two ways:
//!
//! - **Synchronously** with [`Process::wait`], a cooperative polling loop that
//!   sleeps `poll_interval` between iterations on the caller's thread.
//! - **Asynchronously** with [`Process::wait_async`] (or [`Process::spawn_on`]),
//!   a periodic tick on a tokio runtime.
//!
//! Both drains append to the same buffers, so a single process must only be
//! driven by one of them at a time. This is a precondition, not something the
//! controller guards against.

use std::io::{self, Read, Write};
use std::os::fd::AsFd;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, ExitStatus};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::{
    config::ProcessSettings,
    environment::{Environment, EnvironmentVariables, SpawnRequest},
    error::{ProcessError, Result},
    observer::ProcessObserver,
    output::ProcessOutput,
    signal::{Signal, StreamId},
};

/// Grace period between SIGTERM and SIGKILL when stopping
pub const DEFAULT_KILL_TIMEOUT: Duration = Duration::from_secs(1);

/// Exit code recorded when the OS could not report a status
const UNKNOWN_EXIT_CODE: i32 = -1;

const READ_CHUNK_SIZE: usize = 8192;

/// How long the final drain waits for EOF once the child is gone
///
/// A backgrounded grandchild can hold the pipes open indefinitely.
const FINAL_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Outcome of the asynchronous driver: `Ok` on exit code 0, `Err` otherwise.
///
/// Both sides carry the full output.
pub type AsyncOutcome = std::result::Result<ProcessOutput, ProcessOutput>;

/// Parameters for spawning a [`Process`]
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Full command line, interpreted by the shell
    pub command: String,
    /// Working directory (None = current dir)
    pub working_dir: Option<PathBuf>,
    /// Variables overriding the inherited environment
    pub env: EnvironmentVariables,
    /// Wall-clock limit since spawn (None = no limit)
    pub timeout: Option<Duration>,
    /// Sleep between polls of the synchronous loop
    pub poll_interval: Duration,
    /// SIGTERM to SIGKILL grace period used when the timeout fires
    pub kill_timeout: Duration,
    /// Tick of the asynchronous driver
    pub async_tick: Duration,
}

impl ProcessOptions {
    /// Options for `command` with default settings
    pub fn new(command: impl Into<String>) -> Self {
        Self::from_settings(command, &ProcessSettings::default())
    }

    /// Options for `command` seeded from `settings`
    pub fn from_settings(command: impl Into<String>, settings: &ProcessSettings) -> Self {
        Self {
            command: command.into(),
            working_dir: None,
            env: EnvironmentVariables::new(),
            timeout: settings.timeout(),
            poll_interval: settings.poll_interval(),
            kill_timeout: settings.kill_timeout(),
            async_tick: settings.async_tick(),
        }
    }
}

/// Escalation progress of the asynchronous driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Escalation {
    None,
    Terminating { since: Instant },
    Killed,
}

/// A running (or finished) child process
pub struct Process {
    environment: Arc<dyn Environment>,
    observer: Arc<dyn ProcessObserver>,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: ChildStdout,
    stderr: ChildStderr,
    pid: u32,
    command: String,
    working_dir: PathBuf,
    started_at: Instant,
    timeout: Option<Duration>,
    poll_interval: Duration,
    kill_timeout: Duration,
    async_tick: Duration,
    /// Latched on the first status query that reports termination
    exit_code: Option<i32>,
    stdout_buf: Vec<u8>,
    stderr_buf: Vec<u8>,
    stdout_carry: Utf8Carry,
    stderr_carry: Utf8Carry,
    terminal_output: Option<ProcessOutput>,
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("command", &self.command)
            .field("working_dir", &self.working_dir)
            .field("exit_code", &self.exit_code)
            .finish_non_exhaustive()
    }
}

impl Process {
    /// Spawn a process
    ///
    /// The child starts immediately. Stdout and stderr are switched to
    /// non-blocking mode so draining never stalls the caller.
    ///
    /// # Errors
    /// [`ProcessError::SpawnFailed`] if the OS refuses to create the process.
    pub fn spawn(
        environment: Arc<dyn Environment>,
        observer: Arc<dyn ProcessObserver>,
        options: ProcessOptions,
    ) -> Result<Self> {
        let working_dir = environment.normalize_working_directory(options.working_dir.as_deref());

        debug!(
            command = %options.command,
            cwd = %working_dir.display(),
            "Spawning process"
        );

        let request = SpawnRequest {
            command: &options.command,
            cwd: &working_dir,
            env: &options.env,
        };
        let mut child = environment
            .spawn(&request)
            .map_err(|source| ProcessError::SpawnFailed {
                command: options.command.clone(),
                source,
            })?;

        let pipes = take_pipes(&mut child).and_then(|(stdin, stdout, stderr)| {
            set_nonblocking(stdout.as_raw_fd())?;
            set_nonblocking(stderr.as_raw_fd())?;
            Ok((stdin, stdout, stderr))
        });
        let (stdin, stdout, stderr) = match pipes {
            Ok(pipes) => pipes,
            Err(source) => {
                abandon(&mut child);
                return Err(ProcessError::SpawnFailed {
                    command: options.command,
                    source,
                });
            }
        };

        let pid = child.id();
        info!(pid = %pid, command = %options.command, "Process spawned");
        observer.process_created(pid, &options.command, &working_dir, &options.env);

        Ok(Self {
            environment,
            observer,
            child,
            stdin: Some(stdin),
            stdout,
            stderr,
            pid,
            command: options.command,
            working_dir,
            started_at: Instant::now(),
            timeout: options.timeout,
            poll_interval: options.poll_interval,
            kill_timeout: options.kill_timeout,
            async_tick: options.async_tick,
            exit_code: None,
            stdout_buf: Vec::new(),
            stderr_buf: Vec::new(),
            stdout_carry: Utf8Carry::default(),
            stderr_carry: Utf8Carry::default(),
            terminal_output: None,
        })
    }

    /// Check if process is still running
    ///
    /// The first query that observes termination latches the exit code;
    /// later queries never consult the OS again. Every call is reported to
    /// the observer as a poll.
    pub fn is_running(&mut self) -> bool {
        let running = match self.exit_code {
            Some(_) => false,
            None => match self.child.try_wait() {
                Ok(None) => true,
                Ok(Some(status)) => {
                    let code = exit_code_of(status);
                    debug!(pid = %self.pid, exit_code = code, "Process terminated");
                    self.exit_code = Some(code);
                    false
                }
                Err(e) => {
                    warn!(pid = %self.pid, error = %e, "Failed to query process status");
                    self.exit_code = Some(UNKNOWN_EXIT_CODE);
                    false
                }
            },
        };

        self.observer.process_polled(self.pid, self.elapsed());
        running
    }

    /// Block until the process exits, draining output as it arrives
    pub fn wait(&mut self) -> Result<ProcessOutput> {
        self.wait_with(|_, _| {})
    }

    /// Like [`wait`](Self::wait), invoking `on_drain(stdout_chunk, stderr_chunk)`
    /// after every drain, including empty ones.
    ///
    /// If a timeout is configured and exceeded, the process is stopped with
    /// SIGTERM, escalating to SIGKILL after the kill timeout.
    pub fn wait_with<F>(&mut self, mut on_drain: F) -> Result<ProcessOutput>
    where
        F: FnMut(&str, &str),
    {
        if let Some(output) = &self.terminal_output {
            return Ok(output.clone());
        }

        while self.is_running() {
            if self.timed_out() {
                warn!(
                    pid = %self.pid,
                    timeout_ms = self.timeout.map(|t| t.as_millis() as u64),
                    "Process exceeded timeout, stopping"
                );
                return self.stop_with(self.kill_timeout, &mut on_drain);
            }

            let (stdout, stderr) = self.drain_streams()?;
            on_drain(&stdout, &stderr);

            thread::sleep(self.poll_interval);
        }

        Ok(self.finish(&mut on_drain))
    }

    /// Stop the process: SIGTERM now, SIGKILL once `kill_timeout` has passed
    ///
    /// Blocks until the process is reaped. Stopping a process that already
    /// exited just returns its output.
    pub fn stop(&mut self, kill_timeout: Duration) -> Result<ProcessOutput> {
        self.stop_with(kill_timeout, &mut |_, _| {})
    }

    fn stop_with(
        &mut self,
        kill_timeout: Duration,
        on_drain: &mut dyn FnMut(&str, &str),
    ) -> Result<ProcessOutput> {
        if self.is_running() {
            debug!(pid = %self.pid, kill_timeout_ms = kill_timeout.as_millis() as u64, "Stopping process");
            self.send_signal(Signal::Term)?;
            let term_sent = Instant::now();
            let mut killed = false;

            while self.is_running() {
                if !killed && term_sent.elapsed() > kill_timeout {
                    warn!(pid = %self.pid, "Process ignored SIGTERM, escalating to SIGKILL");
                    self.send_signal(Signal::Kill)?;
                    killed = true;
                }
                thread::sleep(self.poll_interval);
            }
        }

        Ok(self.finish(on_drain))
    }

    /// Send a signal to the process
    ///
    /// The observer is told before the signal is dispatched.
    ///
    /// # Errors
    /// [`ProcessError::NotRunning`] once the process has been reaped, since its
    /// PID may already belong to someone else; [`ProcessError::SignalFailed`]
    /// if the OS rejects the signal.
    pub fn send_signal(&mut self, signal: Signal) -> Result<()> {
        if self.exit_code.is_some() {
            return Err(ProcessError::NotRunning);
        }

        self.observer.sent_signal(self.pid, signal);
        debug!(pid = %self.pid, signal = %signal, "Sending signal");
        self.environment.send_signal(self.pid, signal)
    }

    /// Send a signal by name (`TERM`, `SIGKILL`, ...)
    ///
    /// Unknown names fail with [`ProcessError::UnknownSignal`] before anything
    /// reaches the observer or the OS.
    pub fn send_signal_named(&mut self, name: &str) -> Result<()> {
        let signal: Signal = name.parse()?;
        self.send_signal(signal)
    }

    /// Read whatever is currently buffered in an output pipe without blocking
    ///
    /// Bytes returned here are not added to the accumulated output.
    pub fn read_output(&mut self, stream: StreamId) -> Result<Vec<u8>> {
        match stream {
            StreamId::Stdout => Ok(read_available(&mut self.stdout)?),
            StreamId::Stderr => Ok(read_available(&mut self.stderr)?),
            StreamId::Stdin => Err(ProcessError::InvalidStream {
                stream,
                operation: "read from",
            }),
        }
    }

    /// Write a line to stdin
    pub fn write_input(&mut self, text: &str) -> Result<()> {
        self.write_to(StreamId::Stdin, text, true)
    }

    /// Write `text` to `stream`, optionally followed by a newline
    ///
    /// A full pipe blocks until the child reads from it.
    pub fn write_to(&mut self, stream: StreamId, text: &str, append_newline: bool) -> Result<()> {
        if stream != StreamId::Stdin {
            return Err(ProcessError::InvalidStream {
                stream,
                operation: "write to",
            });
        }

        let stdin = self.stdin.as_mut().ok_or_else(|| {
            ProcessError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "stdin is closed"))
        })?;

        stdin.write_all(text.as_bytes())?;
        if append_newline {
            stdin.write_all(b"\n")?;
        }
        stdin.flush()?;
        Ok(())
    }

    /// Close stdin so children reading to EOF can finish
    pub fn close_input(&mut self) {
        if self.stdin.take().is_some() {
            debug!(pid = %self.pid, "Closed stdin");
        }
    }

    /// Process ID of a live process
    ///
    /// # Errors
    /// [`ProcessError::NotRunning`] once the process has exited.
    pub fn pid(&mut self) -> Result<u32> {
        if !self.is_running() {
            return Err(ProcessError::NotRunning);
        }
        Ok(self.pid)
    }

    /// Terminal output, built once and cached
    ///
    /// # Errors
    /// [`ProcessError::StillRunning`] while the process has not exited.
    pub fn process_output(&mut self) -> Result<ProcessOutput> {
        if let Some(output) = &self.terminal_output {
            return Ok(output.clone());
        }
        if self.is_running() {
            return Err(ProcessError::StillRunning);
        }
        Ok(self.finish(&mut |_, _| {}))
    }

    /// Drive the process on the current tokio runtime until it exits
    ///
    /// Streams are drained on every tick of the configured async interval.
    /// A configured timeout sends SIGTERM once, then SIGKILL once after the
    /// kill timeout. Signal failures during a tick are logged, not raised.
    pub async fn wait_async(&mut self) -> AsyncOutcome {
        let mut ticker = tokio::time::interval(self.async_tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut escalation = Escalation::None;

        loop {
            ticker.tick().await;

            if let Err(e) = self.drain_streams() {
                warn!(pid = %self.pid, error = %e, "Failed to drain process output");
            }

            if !self.is_running() {
                break;
            }

            escalation = self.escalate(escalation);
        }

        let output = self.finish(&mut |_, _| {});
        if output.success() {
            Ok(output)
        } else {
            Err(output)
        }
    }

    /// Hand the process to a caller-supplied runtime
    pub fn spawn_on(mut self, handle: &Handle) -> JoinHandle<AsyncOutcome> {
        handle.spawn(async move { self.wait_async().await })
    }

    /// Exit code, once termination has been observed
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Time since spawn
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_dir
    }

    fn timed_out(&self) -> bool {
        self.timeout.is_some_and(|timeout| self.elapsed() > timeout)
    }

    fn escalate(&mut self, escalation: Escalation) -> Escalation {
        match escalation {
            Escalation::None if self.timed_out() => {
                warn!(pid = %self.pid, "Process exceeded timeout, sending SIGTERM");
                if let Err(e) = self.send_signal(Signal::Term) {
                    warn!(pid = %self.pid, error = %e, "Failed to send SIGTERM");
                }
                Escalation::Terminating {
                    since: Instant::now(),
                }
            }
            Escalation::Terminating { since } if since.elapsed() > self.kill_timeout => {
                warn!(pid = %self.pid, "Process ignored SIGTERM, escalating to SIGKILL");
                if let Err(e) = self.send_signal(Signal::Kill) {
                    warn!(pid = %self.pid, error = %e, "Failed to send SIGKILL");
                }
                Escalation::Killed
            }
            other => other,
        }
    }

    /// Non-blocking drain of both output pipes into the accumulators
    fn drain_streams(&mut self) -> Result<(String, String)> {
        let stdout = read_available(&mut self.stdout)?;
        let stderr = read_available(&mut self.stderr)?;
        Ok(self.record(stdout, stderr, false))
    }

    /// Drain to EOF once the process is dead, giving up after a short grace
    fn drain_remaining(&mut self) -> (String, String) {
        let deadline = Instant::now() + self.poll_interval.max(FINAL_DRAIN_GRACE);
        let (stdout, stderr) = match drain_until(&mut self.stdout, &mut self.stderr, deadline) {
            Ok(FinalDrain { stdout, stderr, eof }) => {
                if !eof {
                    warn!(pid = %self.pid, "Output pipes still open after exit, abandoning drain");
                }
                (stdout, stderr)
            }
            Err(e) => {
                warn!(pid = %self.pid, error = %e, "Failed to drain remaining output");
                (Vec::new(), Vec::new())
            }
        };
        self.record(stdout, stderr, true)
    }

    /// Append drained bytes and notify the observer
    ///
    /// A multi-byte character split across reads is held back until its
    /// remaining bytes arrive, unless `flush` is set.
    fn record(&mut self, stdout: Vec<u8>, stderr: Vec<u8>, flush: bool) -> (String, String) {
        let mut stdout_chunk = self.stdout_carry.decode(&stdout);
        let mut stderr_chunk = self.stderr_carry.decode(&stderr);
        if flush {
            stdout_chunk.push_str(&self.stdout_carry.flush());
            stderr_chunk.push_str(&self.stderr_carry.flush());
        }
        self.stdout_buf.extend_from_slice(&stdout);
        self.stderr_buf.extend_from_slice(&stderr);

        self.observer.stdout_read(self.pid, &stdout_chunk);
        self.observer.stderr_read(self.pid, &stderr_chunk);
        (stdout_chunk, stderr_chunk)
    }

    /// Build the terminal output exactly once; callers must have observed termination
    fn finish(&mut self, on_drain: &mut dyn FnMut(&str, &str)) -> ProcessOutput {
        if let Some(output) = &self.terminal_output {
            return output.clone();
        }

        let (stdout, stderr) = self.drain_remaining();
        on_drain(&stdout, &stderr);
        self.stdin = None;

        let exit_code = self.exit_code.unwrap_or(UNKNOWN_EXIT_CODE);
        let output = ProcessOutput::new(
            exit_code,
            String::from_utf8_lossy(&self.stdout_buf),
            String::from_utf8_lossy(&self.stderr_buf),
            self.command.clone(),
            self.working_dir.clone(),
        );

        info!(
            pid = %self.pid,
            exit_code = exit_code,
            duration_ms = self.elapsed().as_millis() as u64,
            "Process exited"
        );

        self.terminal_output = Some(output.clone());
        self.observer.process_exited(self.pid, &output);
        output
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        if self.exit_code.is_some() {
            return;
        }
        match self.child.try_wait() {
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => {
                debug!(pid = %self.pid, "Killing process dropped while running");
                abandon(&mut self.child);
            }
        }
    }
}

/// Holds back an incomplete trailing UTF-8 sequence until the next chunk
#[derive(Debug, Default)]
struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let complete = self.pending.len() - incomplete_tail(&self.pending);
        let chunk: Vec<u8> = self.pending.drain(..complete).collect();
        String::from_utf8_lossy(&chunk).into_owned()
    }

    fn flush(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&rest).into_owned()
    }
}

/// Number of bytes at the end of `bytes` that start a multi-byte sequence
/// which has not been completed yet
fn incomplete_tail(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(3) {
        let byte = bytes[bytes.len() - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let width = match byte {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        return if width > back { back } else { 0 };
    }
    0
}

fn take_pipes(child: &mut Child) -> io::Result<(ChildStdin, ChildStdout, ChildStderr)> {
    let missing = |name: &str| io::Error::new(io::ErrorKind::Other, format!("{} was not piped", name));
    let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
    let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
    let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;
    Ok((stdin, stdout, stderr))
}

/// Kill and reap a child that cannot be handed out
fn abandon(child: &mut Child) {
    if let Err(e) = child.kill() {
        warn!(pid = %child.id(), error = %e, "Failed to kill abandoned process");
    }
    if let Err(e) = child.wait() {
        warn!(pid = %child.id(), error = %e, "Failed to reap abandoned process");
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    use nix::fcntl::{fcntl, FcntlArg, OFlag};

    let flags = fcntl(fd, FcntlArg::F_GETFL)?;
    let mut flags = OFlag::from_bits_truncate(flags);
    flags.insert(OFlag::O_NONBLOCK);
    fcntl(fd, FcntlArg::F_SETFL(flags))?;
    Ok(())
}

/// Read until the pipe would block or hits EOF
fn read_available<R: Read>(pipe: &mut R) -> io::Result<Vec<u8>> {
    let mut collected = Vec::new();
    read_into(pipe, &mut collected)?;
    Ok(collected)
}

/// Append everything readable right now; `true` once EOF is reached
fn read_into<R: Read>(pipe: &mut R, collected: &mut Vec<u8>) -> io::Result<bool> {
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match pipe.read(&mut chunk) {
            Ok(0) => return Ok(true),
            Ok(n) => collected.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

struct FinalDrain {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    /// Both pipes reached EOF before the deadline
    eof: bool,
}

/// Read both (non-blocking) pipes until EOF or `deadline`
fn drain_until(
    stdout: &mut ChildStdout,
    stderr: &mut ChildStderr,
    deadline: Instant,
) -> io::Result<FinalDrain> {
    use nix::errno::Errno;
    use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

    let mut drained = FinalDrain {
        stdout: Vec::new(),
        stderr: Vec::new(),
        eof: false,
    };
    let mut stdout_open = true;
    let mut stderr_open = true;

    while stdout_open || stderr_open {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(drained);
        }
        let timeout = PollTimeout::from(u16::try_from(remaining.as_millis()).unwrap_or(u16::MAX));

        let (stdout_ready, stderr_ready) = {
            let mut fds = Vec::with_capacity(2);
            if stdout_open {
                fds.push(PollFd::new(stdout.as_fd(), PollFlags::POLLIN));
            }
            if stderr_open {
                fds.push(PollFd::new(stderr.as_fd(), PollFlags::POLLIN));
            }

            match poll(&mut fds, timeout) {
                Ok(0) => return Ok(drained),
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }

            // POLLHUP and POLLERR count as ready so the read can observe EOF
            let mut ready = fds
                .iter()
                .map(|fd| fd.revents().is_some_and(|events| !events.is_empty()));
            let stdout_ready = stdout_open && ready.next().unwrap_or(false);
            let stderr_ready = stderr_open && ready.next().unwrap_or(false);
            (stdout_ready, stderr_ready)
        };

        if stdout_ready {
            stdout_open = !read_into(stdout, &mut drained.stdout)?;
        }
        if stderr_ready {
            stderr_open = !read_into(stderr, &mut drained.stderr)?;
        }
    }

    drained.eof = true;
    Ok(drained)
}

/// Normal exits report their code; signal deaths report the negated signal number
fn exit_code_of(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .or_else(|| status.signal().map(|signal| -signal))
        .unwrap_or(UNKNOWN_EXIT_CODE)
}
