//! Shell command execution
//!
//! Test commands, package-manager commands and coverage runs all go through
//! [`CommandRunner`] so the validation loop can be driven by a fake in tests.

use crate::error::{GenError, Result};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::process::Command;
use std::time::{Duration, Instant};

/// Captured result of one command execution
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Process exit code, `-1` when the process was terminated by a signal
    pub exit_code: i32,
    pub finished_at: DateTime<Utc>,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// When the command was launched; reports written by it are newer
    pub fn started_at(&self) -> DateTime<Utc> {
        match chrono::Duration::from_std(self.duration) {
            Ok(elapsed) => self.finished_at - elapsed,
            Err(_) => self.finished_at,
        }
    }

    /// stdout and stderr joined, skipping whichever is empty
    pub fn combined(&self) -> String {
        let mut combined = String::new();
        if !self.stdout.is_empty() {
            combined.push_str(&self.stdout);
        }
        if !self.stderr.is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str(&self.stderr);
        }
        combined
    }
}

pub trait CommandRunner: Send + Sync {
    /// Run `command` through the shell. `working_dir` of `None` means the
    /// current directory. A non-zero exit is not an error; failing to start
    /// the process is.
    fn run(&self, command: &str, working_dir: Option<&Path>) -> Result<CommandOutput>;
}

/// Runs commands with `sh -c`, blocking until they exit.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&self, command: &str, working_dir: Option<&Path>) -> Result<CommandOutput> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        if let Some(dir) = working_dir.filter(|d| !d.as_os_str().is_empty()) {
            cmd.current_dir(dir);
        }

        tracing::debug!(command, "running command");
        let start = Instant::now();
        let output = cmd.output().map_err(|source| GenError::Command {
            command: command.to_string(),
            source,
        })?;
        let duration = start.elapsed();

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            finished_at: Utc::now(),
            duration,
        })
    }
}

/// Human-readable duration, e.g. `1m 12s` or `850ms`
pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    if total_secs == 0 {
        return format!("{}ms", duration.as_millis());
    }
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_runner_captures_exit_code_and_output() {
        let out = ShellRunner.run("echo hello && echo oops >&2 && exit 3", None).unwrap();
        assert_eq!(out.exit_code, 3);
        assert!(!out.success());
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
        assert_eq!(out.combined(), "hello\n\noops\n");
    }

    #[test]
    fn test_shell_runner_uses_working_dir() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("marker.txt"), "x").unwrap();
        let out = ShellRunner.run("ls", Some(tmp.path())).unwrap();
        assert!(out.success());
        assert!(out.stdout.contains("marker.txt"));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(850)), "850ms");
        assert_eq!(format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(format_duration(Duration::from_secs(72)), "1m 12s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }
}
