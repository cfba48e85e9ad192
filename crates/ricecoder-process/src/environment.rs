//! OS-specific policy: command validation, path expansion, spawning and signals
//!
//! The [`Environment`] trait is the seam between the lifecycle controller and
//! the host OS. Tests substitute their own implementation to inject spawn or
//! signal failures.

use std::collections::BTreeMap;
use std::env;
use std::ffi::OsString;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::process::{Child, Command, Stdio};

use tracing::{debug, warn};

use crate::{
    error::{ProcessError, Result},
    signal::Signal,
};

/// Environment variables passed to a child, ordered by key
pub type EnvironmentVariables = BTreeMap<String, String>;

/// Shell used to interpret command lines
const SHELL: &str = "/bin/sh";

/// OS identifiers (as reported by `std::env::consts::OS`) with full support
const UNIX_SUPPORTED_OS: &[&str] = &[
    "linux",
    "macos",
    "freebsd",
    "openbsd",
    "netbsd",
    "dragonfly",
    "solaris",
    "illumos",
];

/// Everything needed to start a child process
#[derive(Debug, Clone, Copy)]
pub struct SpawnRequest<'a> {
    /// Full command line, interpreted by the shell
    pub command: &'a str,
    /// Resolved working directory
    pub cwd: &'a Path,
    /// Variables overriding the inherited environment
    pub env: &'a EnvironmentVariables,
}

/// Host OS policy consumed by the process controller and command builder
pub trait Environment: Send + Sync {
    /// Whether `command` resolves to an executable file
    ///
    /// Bare names are searched on `PATH`; anything containing a separator is
    /// resolved against `cwd` (or the current directory).
    fn validate_command(&self, command: &str, cwd: Option<&Path>) -> bool;

    /// Expand `~` and make relative paths absolute
    fn expand_path(&self, path: &Path) -> PathBuf;

    /// Deliver `signal` to the process `pid`
    fn send_signal(&self, pid: u32, signal: Signal) -> Result<()>;

    /// Quote an argument so the shell passes it through verbatim
    fn escape_shell_arg(&self, raw: &str) -> String;

    /// OS identifiers this environment supports
    fn supported_os(&self) -> &'static [&'static str];

    /// Start the child with stdin, stdout and stderr piped
    fn spawn(&self, request: &SpawnRequest<'_>) -> io::Result<Child>;

    /// Prefix `command` with `KEY='value'` assignments
    fn apply_environment_variables(&self, command: &str, vars: &EnvironmentVariables) -> String {
        if vars.is_empty() {
            return command.to_string();
        }

        let assignments: Vec<String> = vars
            .iter()
            .map(|(key, value)| format!("{}={}", key, self.escape_shell_arg(value)))
            .collect();

        format!("{} {}", assignments.join(" "), command)
    }

    /// Resolve the directory a process should run in
    fn normalize_working_directory(&self, cwd: Option<&Path>) -> PathBuf {
        match cwd {
            Some(dir) => self.expand_path(dir),
            None => current_dir_or_root(),
        }
    }
}

/// Environment for Unix-family systems
#[derive(Debug, Clone, Default)]
pub struct UnixEnvironment {
    /// Overrides `$PATH` for command validation
    search_path: Option<OsString>,
}

impl UnixEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate commands against a custom search path instead of `$PATH`
    pub fn with_search_path(search_path: impl Into<OsString>) -> Self {
        Self {
            search_path: Some(search_path.into()),
        }
    }

    /// Whether the running OS is one this environment supports
    pub fn is_supported() -> bool {
        UNIX_SUPPORTED_OS.contains(&env::consts::OS)
    }
}

impl Environment for UnixEnvironment {
    fn validate_command(&self, command: &str, cwd: Option<&Path>) -> bool {
        let command = command.trim();
        if command.is_empty() {
            return false;
        }

        let expanded = self.expand_tilde(Path::new(command));
        let cwd = cwd
            .map(|dir| self.expand_path(dir))
            .unwrap_or_else(current_dir_or_root);
        let search_path = self.search_path.clone().or_else(|| env::var_os("PATH"));

        match which::which_in(&expanded, search_path, &cwd) {
            Ok(resolved) => {
                debug!(command = %command, resolved = %resolved.display(), "Command resolved");
                true
            }
            Err(e) => {
                debug!(command = %command, error = %e, "Command did not resolve");
                false
            }
        }
    }

    fn expand_path(&self, path: &Path) -> PathBuf {
        let expanded = self.expand_tilde(path);
        let absolute = if expanded.is_absolute() {
            expanded
        } else {
            current_dir_or_root().join(expanded)
        };
        normalize_components(&absolute)
    }

    fn send_signal(&self, pid: u32, signal: Signal) -> Result<()> {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let raw = i32::try_from(pid).map_err(|_| ProcessError::SignalFailed {
            pid,
            signal,
            reason: "PID out of range".to_string(),
        })?;

        kill(Pid::from_raw(raw), signal.to_nix()).map_err(|errno| {
            warn!(pid = %pid, signal = %signal, error = %errno, "Failed to send signal");
            ProcessError::SignalFailed {
                pid,
                signal,
                reason: errno.desc().to_string(),
            }
        })
    }

    fn escape_shell_arg(&self, raw: &str) -> String {
        format!("'{}'", raw.replace('\'', r"'\''"))
    }

    fn supported_os(&self) -> &'static [&'static str] {
        UNIX_SUPPORTED_OS
    }

    fn spawn(&self, request: &SpawnRequest<'_>) -> io::Result<Child> {
        debug!(command = %request.command, cwd = %request.cwd.display(), "Spawning shell");

        Command::new(SHELL)
            .arg("-c")
            .arg(request.command)
            .current_dir(request.cwd)
            .envs(request.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
    }
}

impl UnixEnvironment {
    fn expand_tilde(&self, path: &Path) -> PathBuf {
        let mut components = path.components();
        match components.next() {
            Some(Component::Normal(first)) if first == "~" => match dirs::home_dir() {
                Some(home) => home.join(components.as_path()),
                None => path.to_path_buf(),
            },
            _ => path.to_path_buf(),
        }
    }
}

fn current_dir_or_root() -> PathBuf {
    env::current_dir().unwrap_or_else(|_| PathBuf::from("/"))
}

/// Collapse `.` and `..` without touching the filesystem
fn normalize_components(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_escape_shell_arg() {
        let env = UnixEnvironment::new();
        assert_eq!(env.escape_shell_arg("plain"), "'plain'");
        assert_eq!(env.escape_shell_arg(""), "''");
        assert_eq!(
            env.escape_shell_arg("if=/dev/sha1 of=/dev/sdb2"),
            "'if=/dev/sha1 of=/dev/sdb2'"
        );
        assert_eq!(env.escape_shell_arg("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_apply_environment_variables() {
        let env = UnixEnvironment::new();
        let mut vars = EnvironmentVariables::new();
        assert_eq!(env.apply_environment_variables("ls", &vars), "ls");

        vars.insert("MY_VAR".to_string(), "value".to_string());
        vars.insert("A".to_string(), "b c".to_string());
        assert_eq!(
            env.apply_environment_variables("ls -l", &vars),
            "A='b c' MY_VAR='value' ls -l"
        );
    }

    #[test]
    fn test_expand_path() {
        let env = UnixEnvironment::new();
        assert_eq!(env.expand_path(Path::new("/tmp/./a/../b")), PathBuf::from("/tmp/b"));

        let cwd = env::current_dir().unwrap();
        assert_eq!(env.expand_path(Path::new("sub")), cwd.join("sub"));

        if let Some(home) = dirs::home_dir() {
            assert_eq!(env.expand_path(Path::new("~/docs")), home.join("docs"));
            assert_eq!(env.expand_path(Path::new("~")), home);
        }

        // only a leading bare tilde is expanded
        assert_eq!(env.expand_path(Path::new("/a/~/b")), PathBuf::from("/a/~/b"));
    }

    #[test]
    fn test_normalize_working_directory() {
        let env = UnixEnvironment::new();
        assert_eq!(
            env.normalize_working_directory(None),
            env::current_dir().unwrap()
        );
        assert_eq!(
            env.normalize_working_directory(Some(Path::new("/usr/../tmp"))),
            PathBuf::from("/tmp")
        );
    }

    #[test]
    fn test_validate_command() {
        let env = UnixEnvironment::new();
        assert!(env.validate_command("sh", None));
        assert!(env.validate_command("/bin/sh", None));
        assert!(!env.validate_command("", None));
        assert!(!env.validate_command("definitely-not-a-real-binary-xyz", None));
        assert!(!env.validate_command("/nonexistent/bin/tool", None));
    }

    #[test]
    fn test_validate_relative_command_against_cwd() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("run.sh");
        std::fs::write(&script, "#!/bin/sh\necho hi\n").unwrap();

        let env = UnixEnvironment::new();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(!env.validate_command("./run.sh", Some(dir.path())));

        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert!(env.validate_command("./run.sh", Some(dir.path())));
        assert!(!env.validate_command("./run.sh", Some(Path::new("/"))));
    }

    #[test]
    fn test_custom_search_path() {
        let env = UnixEnvironment::with_search_path("/nonexistent");
        assert!(!env.validate_command("sh", None));
        assert!(env.validate_command("/bin/sh", None));
    }

    #[test]
    fn test_supported_os() {
        let env = UnixEnvironment::new();
        assert!(env.supported_os().contains(&"linux"));
        assert!(!env.supported_os().contains(&"windows"));
    }

    #[test]
    fn test_send_signal_to_missing_process_fails() {
        let env = UnixEnvironment::new();
        // PIDs this large are never allocated on Linux or macOS
        let err = env.send_signal(i32::MAX as u32, Signal::Term).unwrap_err();
        assert!(matches!(err, ProcessError::SignalFailed { signal: Signal::Term, .. }));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_escaped_arg_round_trips_through_shell(raw in "[ -~]{0,24}") {
            let env = UnixEnvironment::new();
            let script = format!("printf %s {}", env.escape_shell_arg(&raw));
            let output = Command::new(SHELL).arg("-c").arg(&script).output().unwrap();
            prop_assert!(output.status.success());
            prop_assert_eq!(String::from_utf8_lossy(&output.stdout), raw);
        }
    }
}
