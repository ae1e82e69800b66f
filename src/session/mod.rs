//! Uniform command-execution and file-access contract over heterogeneous
//! execution targets.
//!
//! A [`Session`] hides whether a command runs in a local process, over SSH,
//! or inside a container. Orchestration code is written purely against this
//! contract, so adding a new target type means implementing this trait and
//! nothing else.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

mod container;
mod runner;
mod shell;
mod ssh;

pub use container::{ContainerSession, ContainerSessionConfig};
pub use runner::{CommandOutput, CommandRunner, ProcessCommandRunner, RunOptions, SpawnError};
pub use shell::ShellSession;
pub use ssh::{SshSession, SshSessionConfig};

/// Captured streams of a successfully executed command.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExecOutput {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

/// Per-item result of a batched command execution.
///
/// Unlike [`Session::execute_command`], a non-zero item does not surface as
/// an error; its status is recorded here so the batch can continue.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BatchItemOutput {
    /// Captured standard output for this item.
    pub stdout: String,
    /// Captured standard error for this item.
    pub stderr: String,
    /// Exit status for this item, when the target reported one.
    pub status: Option<i32>,
}

/// Execution settings for [`Session::execute_command`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExecuteOptions {
    /// Remote working directory for the command, when set.
    pub cwd: Option<Utf8PathBuf>,
    /// Extra environment variables visible to the command.
    pub env: BTreeMap<String, String>,
}

impl ExecuteOptions {
    /// Returns options with no working directory and no extra environment.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cwd: None,
            env: BTreeMap::new(),
        }
    }
}

/// Errors raised while executing a command through a session.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CommandError {
    /// The command ran but exited with a non-zero status. Captured output is
    /// preserved because callers depend on the exact exit behaviour.
    #[error("command exited with status {status:?}: {stderr}")]
    Failed {
        /// Exit status as reported by the target, if available.
        status: Option<i32>,
        /// Captured standard output.
        stdout: String,
        /// Captured standard error.
        stderr: String,
    },
    /// The target could not invoke the command at all, for example because
    /// the transport refused the connection.
    #[error("failed to invoke command: {message}")]
    Invoke {
        /// Human-readable description of the invocation failure.
        message: String,
    },
    /// The session variant cannot honour the requested execution settings.
    /// This is a documented limitation of the variant, not a bug.
    #[error("unsupported by this session type: {reason}")]
    Unsupported {
        /// Which setting the variant cannot honour.
        reason: String,
    },
}

/// Errors raised while transferring files through a session.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TransferError {
    /// The source of a `get`/`put` does not exist.
    #[error("transfer source missing: {path}")]
    MissingSource {
        /// Path that was expected to exist.
        path: Utf8PathBuf,
    },
    /// The transfer itself failed after the source was found.
    #[error("failed to copy {from} to {to}: {message}")]
    Copy {
        /// Source path of the failed transfer.
        from: Utf8PathBuf,
        /// Destination path of the failed transfer.
        to: Utf8PathBuf,
        /// Underlying error message.
        message: String,
    },
}

/// Errors raised by non-transfer session operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SessionError {
    /// A command executed on the session's behalf failed.
    #[error(transparent)]
    Command(#[from] CommandError),
    /// A file transfer performed on the session's behalf failed.
    #[error(transparent)]
    Transfer(#[from] TransferError),
    /// A filesystem operation on the target failed.
    #[error("filesystem operation on {path} failed: {message}")]
    Filesystem {
        /// Path the operation touched.
        path: Utf8PathBuf,
        /// Underlying error message.
        message: String,
    },
    /// The remote environment could not be queried or parsed.
    #[error("failed to query remote environment: {message}")]
    Environment {
        /// Underlying error message.
        message: String,
    },
    /// Session configuration is missing a required value.
    #[error("missing or empty session configuration field: {field}")]
    InvalidConfig {
        /// Configuration field that failed validation.
        field: String,
    },
}

/// Command execution, path predicates, and file transfer for one connected
/// execution target.
///
/// All paths are resolved against the *session's* filesystem, never the
/// caller's, except for the explicit local side of [`Session::get`] and
/// [`Session::put`].
pub trait Session {
    /// Runs `argv` on the target and returns its captured output.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Failed`] when the command exits non-zero,
    /// [`CommandError::Invoke`] when the target cannot start it, and
    /// [`CommandError::Unsupported`] when the variant cannot honour the
    /// requested options.
    fn execute_command(
        &self,
        argv: &[String],
        options: &ExecuteOptions,
    ) -> Result<ExecOutput, CommandError>;

    /// Executes one logical command per entry of `items`, appending each
    /// item to `cmd`, in as few underlying round-trips as the variant
    /// allows.
    ///
    /// The result sequence preserves the order of `items` and always has
    /// exactly one entry per item. A non-zero exit on one item is recorded
    /// in that item's [`BatchItemOutput`] and does not abort the batch.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] only when the batch as a whole cannot be
    /// executed (for example the transport is unreachable).
    fn execute_command_batch(
        &self,
        cmd: &[String],
        items: &[String],
    ) -> Result<Vec<BatchItemOutput>, CommandError> {
        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let mut argv = cmd.to_vec();
            argv.push(item.clone());
            match self.execute_command(&argv, &ExecuteOptions::new()) {
                Ok(output) => results.push(BatchItemOutput {
                    stdout: output.stdout,
                    stderr: output.stderr,
                    status: Some(0),
                }),
                Err(CommandError::Failed {
                    status,
                    stdout,
                    stderr,
                }) => results.push(BatchItemOutput {
                    stdout,
                    stderr,
                    status,
                }),
                Err(err) => return Err(err),
            }
        }
        Ok(results)
    }

    /// Returns `true` when `path` exists on the target. Never errors; an
    /// unreachable target reads as absent.
    fn exists(&self, path: &Utf8Path) -> bool;

    /// Returns `true` when `path` exists on the target and is a directory.
    fn isdir(&self, path: &Utf8Path) -> bool;

    /// Creates `path` as a directory. Succeeds without effect when the
    /// directory already exists.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Filesystem`] when an intermediate component
    /// is missing and `parents` is `false`, or the target refuses the
    /// operation.
    fn mkdir(&self, path: &Utf8Path, parents: bool) -> Result<(), SessionError>;

    /// Copies `remote_path` on the target to `local_path` on the caller's
    /// filesystem, overwriting any existing destination.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::MissingSource`] when the remote path does
    /// not exist, or [`TransferError::Copy`] when the transfer fails.
    fn get(&self, remote_path: &Utf8Path, local_path: &Utf8Path) -> Result<(), TransferError>;

    /// Copies `local_path` on the caller's filesystem to `remote_path` on
    /// the target, overwriting any existing destination.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::MissingSource`] when the local path does
    /// not exist, or [`TransferError::Copy`] when the transfer fails.
    fn put(&self, local_path: &Utf8Path, remote_path: &Utf8Path) -> Result<(), TransferError>;

    /// Reads the full contents of `path` on the target as text.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the path does not exist or cannot be
    /// read.
    fn read(&self, path: &Utf8Path) -> Result<String, SessionError>;

    /// Returns the target's environment, used notably to resolve paths
    /// relative to the remote home directory.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Environment`] when the environment cannot be
    /// queried.
    fn query_envvars(&self) -> Result<BTreeMap<String, String>, SessionError>;
}

/// Renders `argv` as a single shell command line with each word escaped.
#[must_use]
pub fn shell_join(argv: &[String]) -> String {
    let mut rendered = String::new();
    for (index, arg) in argv.iter().enumerate() {
        if index > 0 {
            rendered.push(' ');
        }
        rendered.push_str(shell_escape::unix::escape(arg.as_str().into()).as_ref());
    }
    rendered
}

/// Parses `env`-style `KEY=VALUE` lines into a mapping.
///
/// Lines without a `=` (continuations of multi-line values) are skipped;
/// only the first `=` splits key from value.
#[must_use]
pub fn parse_env_output(raw: &str) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    for line in raw.lines() {
        if let Some((key, value)) = line.split_once('=')
            && !key.is_empty()
        {
            vars.insert(key.to_owned(), value.to_owned());
        }
    }
    vars
}
