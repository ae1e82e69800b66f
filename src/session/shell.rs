//! Session variant for the local machine.
//!
//! Commands spawn as ordinary child processes and file operations act on
//! the local filesystem directly, so the "remote" side of the contract is
//! simply this host.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;

use camino::Utf8Path;

use super::runner::{CommandRunner, ProcessCommandRunner, RunOptions};
use super::{CommandError, ExecOutput, ExecuteOptions, Session, SessionError, TransferError};

/// Session bound to the local shell.
#[derive(Clone, Debug, Default)]
pub struct ShellSession<R: CommandRunner = ProcessCommandRunner> {
    runner: R,
}

impl ShellSession<ProcessCommandRunner> {
    /// Creates a session that spawns real local processes.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            runner: ProcessCommandRunner,
        }
    }
}

impl<R: CommandRunner> ShellSession<R> {
    /// Creates a session using the provided command runner.
    #[must_use]
    pub const fn with_runner(runner: R) -> Self {
        Self { runner }
    }
}

fn copy_file(from: &Utf8Path, to: &Utf8Path) -> Result<(), TransferError> {
    if !from.is_file() {
        return Err(TransferError::MissingSource {
            path: from.to_path_buf(),
        });
    }
    if let Some(parent) = to.parent()
        && !parent.as_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|err| TransferError::Copy {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            message: err.to_string(),
        })?;
    }
    fs::copy(from, to)
        .map(|_| ())
        .map_err(|err| TransferError::Copy {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            message: err.to_string(),
        })
}

impl<R: CommandRunner> Session for ShellSession<R> {
    fn execute_command(
        &self,
        argv: &[String],
        options: &ExecuteOptions,
    ) -> Result<ExecOutput, CommandError> {
        let (program, rest) = argv.split_first().ok_or_else(|| CommandError::Invoke {
            message: String::from("empty argument vector"),
        })?;

        let args: Vec<OsString> = rest.iter().map(OsString::from).collect();
        let run_options = RunOptions {
            cwd: options.cwd.clone(),
            env: options.env.clone(),
        };

        let output = self
            .runner
            .run(program, &args, &run_options)
            .map_err(|err| CommandError::Invoke {
                message: err.to_string(),
            })?;

        if output.is_success() {
            Ok(ExecOutput {
                stdout: output.stdout,
                stderr: output.stderr,
            })
        } else {
            Err(CommandError::Failed {
                status: output.code,
                stdout: output.stdout,
                stderr: output.stderr,
            })
        }
    }

    fn exists(&self, path: &Utf8Path) -> bool {
        path.as_std_path().exists()
    }

    fn isdir(&self, path: &Utf8Path) -> bool {
        path.as_std_path().is_dir()
    }

    fn mkdir(&self, path: &Utf8Path, parents: bool) -> Result<(), SessionError> {
        if path.is_dir() {
            return Ok(());
        }
        let result = if parents {
            fs::create_dir_all(path)
        } else {
            fs::create_dir(path)
        };
        result.map_err(|err| SessionError::Filesystem {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    }

    fn get(&self, remote_path: &Utf8Path, local_path: &Utf8Path) -> Result<(), TransferError> {
        copy_file(remote_path, local_path)
    }

    fn put(&self, local_path: &Utf8Path, remote_path: &Utf8Path) -> Result<(), TransferError> {
        copy_file(local_path, remote_path)
    }

    fn read(&self, path: &Utf8Path) -> Result<String, SessionError> {
        fs::read_to_string(path).map_err(|err| SessionError::Filesystem {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    }

    fn query_envvars(&self) -> Result<BTreeMap<String, String>, SessionError> {
        Ok(std::env::vars().collect())
    }
}
