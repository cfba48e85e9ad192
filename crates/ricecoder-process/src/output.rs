//! Terminal output of a finished process

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Snapshot of a process after it terminated
///
/// Equality is structural over every field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOutput {
    exit_code: i32,
    stdout: String,
    stderr: String,
    command: String,
    working_directory: PathBuf,
}

impl ProcessOutput {
    /// Create a new output snapshot
    pub fn new(
        exit_code: i32,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        command: impl Into<String>,
        working_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            command: command.into(),
            working_directory: working_directory.into(),
        }
    }

    /// Exit code; a child killed by a signal reports the negated signal number
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// Whether the process exited with code 0
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Everything the process wrote to stdout
    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    /// Stdout split into lines, see [`split_lines`]
    pub fn stdout_lines(&self) -> Vec<&str> {
        split_lines(&self.stdout)
    }

    /// Everything the process wrote to stderr
    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    /// Stderr split into lines, see [`split_lines`]
    pub fn stderr_lines(&self) -> Vec<&str> {
        split_lines(&self.stderr)
    }

    /// The command line that was executed
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Working directory the process ran in
    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }
}

/// Split text on every line separator (`\r\n`, `\n` or `\r`).
///
/// An empty string yields no lines. Every separator ends a line, so a
/// trailing separator produces a trailing empty element:
/// `"a\nb\n"` becomes `["a", "b", ""]` and `"a\n\nb"` becomes `["a", "", "b"]`.
pub fn split_lines(text: &str) -> Vec<&str> {
    if text.is_empty() {
        return Vec::new();
    }

    let bytes = text.as_bytes();
    let mut lines = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\n' => {
                lines.push(&text[start..i]);
                i += 1;
                start = i;
            }
            b'\r' => {
                lines.push(&text[start..i]);
                i += if bytes.get(i + 1) == Some(&b'\n') { 2 } else { 1 };
                start = i;
            }
            _ => i += 1,
        }
    }

    lines.push(&text[start..]);
    lines
}
