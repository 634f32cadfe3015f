//! External tool invoker.
//!
//! Runs one external command to completion, captures its output and returns
//! the exit status. A non-zero exit code is a normal result the caller
//! inspects, never an error: errors here mean the process could not be
//! started at all.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::debug;

/// Errors that can occur while starting external processes.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The command could not be spawned.
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Required external commands are not installed.
    #[error("Missing required commands: {0}")]
    MissingCommands(String),

    /// IO error while waiting on a process.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Captured result of a completed external command.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit code (-1 if terminated by a signal).
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl ToolOutput {
    /// Returns true if the process exited with code 0.
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs external commands and reports their outcome.
///
/// The invoker does not verify file side effects of the tools it runs;
/// callers re-check expected output files themselves.
#[derive(Debug, Clone, Default)]
pub struct ToolInvoker;

impl ToolInvoker {
    /// Creates a new invoker.
    pub fn new() -> Self {
        Self
    }

    /// Runs a command to completion and captures its output.
    ///
    /// # Errors
    ///
    /// Returns `ToolError::Spawn` if the process cannot be started. A
    /// non-zero exit code is reported through `ToolOutput`, not an error.
    pub async fn run<S: AsRef<str>>(&self, command: &str, args: &[S]) -> Result<ToolOutput, ToolError> {
        let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
        debug!(command = %command, args = ?args, "Invoking external tool");

        let output = Command::new(command)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ToolError::Spawn {
                command: command.to_string(),
                source: e,
            })?;

        Ok(ToolOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    /// Spawns a long-running command with piped stdout and stderr.
    ///
    /// The caller owns the child and streams its output as it arrives.
    pub fn spawn_streaming<S: AsRef<str>>(
        &self,
        command: &str,
        args: &[S],
    ) -> Result<Child, ToolError> {
        let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
        debug!(command = %command, args = ?args, "Spawning streaming tool");

        Command::new(command)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ToolError::Spawn {
                command: command.to_string(),
                source: e,
            })
    }

    /// Verifies that every listed command resolves on PATH.
    ///
    /// # Errors
    ///
    /// Returns `ToolError::MissingCommands` naming every unresolvable
    /// command, so the operator can fix them all at once.
    pub fn check_required<S: AsRef<str>>(&self, commands: &[S]) -> Result<(), ToolError> {
        let missing: Vec<&str> = commands
            .iter()
            .map(AsRef::as_ref)
            .filter(|cmd| locate(cmd).is_none())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ToolError::MissingCommands(missing.join(", ")))
        }
    }
}

/// Resolves a command name to an executable path.
///
/// Commands containing a path separator are checked directly; bare names are
/// searched on the `PATH` environment variable.
pub fn locate(command: &str) -> Option<PathBuf> {
    let candidate = Path::new(command);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(command))
        .find(|p| p.is_file())
}
