//! Process-spawning abstraction shared by every session variant.
//!
//! Sessions never call [`std::process::Command`] directly; they go through
//! [`CommandRunner`] so tests can substitute scripted fakes.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::process::Command;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Spawn-time settings applied to a command invocation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RunOptions {
    /// Working directory for the spawned process, when set.
    pub cwd: Option<Utf8PathBuf>,
    /// Extra environment variables layered over the inherited environment.
    pub env: BTreeMap<String, String>,
}

impl RunOptions {
    /// Returns options with no working directory and no extra environment.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cwd: None,
            env: BTreeMap::new(),
        }
    }
}

/// Raised when a command cannot be started at all.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("failed to spawn {program}: {message}")]
pub struct SpawnError {
    /// Command that failed to start.
    pub program: String,
    /// Operating system error string.
    pub message: String,
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`SpawnError`] if the command cannot be started.
    fn run(
        &self,
        program: &str,
        args: &[OsString],
        options: &RunOptions,
    ) -> Result<CommandOutput, SpawnError>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(
        &self,
        program: &str,
        args: &[OsString],
        options: &RunOptions,
    ) -> Result<CommandOutput, SpawnError> {
        let mut command = Command::new(program);
        command.args(args);
        if let Some(ref cwd) = options.cwd {
            command.current_dir(cwd);
        }
        command.envs(&options.env);

        let output = command.output().map_err(|err| SpawnError {
            program: program.to_owned(),
            message: err.to_string(),
        })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
