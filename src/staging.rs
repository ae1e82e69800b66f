//! Strategies for moving job inputs and outputs across the staging
//! boundary.
//!
//! [`PlainStaging`] copies bytes through the session. [`PairStaging`]
//! additionally mirrors staged paths into a content-tracked dataset pair
//! driven by an external dataset-versioning CLI; when that collaborator is
//! unavailable the strategy fails fast instead of silently degrading to
//! plain copies.

use std::ffi::OsString;

use camino::Utf8Path;
use thiserror::Error;

use crate::session::{
    CommandError, CommandRunner, ExecuteOptions, ProcessCommandRunner, RunOptions, Session,
    TransferError,
};

/// Errors raised while staging inputs or retrieving outputs.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StagingError {
    /// The chosen strategy needs an external collaborator that is not
    /// installed or not reachable. Raised eagerly, before any
    /// state-mutating operation.
    #[error("missing external dependency {name}: {message}")]
    MissingExternalDependency {
        /// Name of the absent collaborator.
        name: String,
        /// Why it was judged unavailable.
        message: String,
    },
    /// A byte transfer through the session failed.
    #[error(transparent)]
    Transfer(#[from] TransferError),
    /// A versioning command run on the session failed.
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Policy for moving job files between the caller's filesystem and the
/// working directory on the execution target.
pub trait DataStaging {
    /// Returns the strategy tag.
    fn kind(&self) -> &'static str;

    /// Verifies every collaborator this strategy needs is available.
    ///
    /// # Errors
    ///
    /// Returns [`StagingError::MissingExternalDependency`] when one is
    /// not.
    fn check_available(&self) -> Result<(), StagingError>;

    /// Copies one input into the working directory.
    ///
    /// # Errors
    ///
    /// Returns [`StagingError`] when the transfer or tracking fails.
    fn stage_input(
        &self,
        session: &dyn Session,
        local: &Utf8Path,
        remote: &Utf8Path,
    ) -> Result<(), StagingError>;

    /// Retrieves one output from the working directory.
    ///
    /// # Errors
    ///
    /// Returns [`StagingError`] when the transfer or tracking fails.
    fn retrieve_output(
        &self,
        session: &dyn Session,
        remote: &Utf8Path,
        local: &Utf8Path,
    ) -> Result<(), StagingError>;
}

/// Direct byte copies through the session, no versioning.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlainStaging;

impl PlainStaging {
    /// Creates the plain strategy.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl DataStaging for PlainStaging {
    fn kind(&self) -> &'static str {
        "plain"
    }

    fn check_available(&self) -> Result<(), StagingError> {
        Ok(())
    }

    fn stage_input(
        &self,
        session: &dyn Session,
        local: &Utf8Path,
        remote: &Utf8Path,
    ) -> Result<(), StagingError> {
        Ok(session.put(local, remote)?)
    }

    fn retrieve_output(
        &self,
        session: &dyn Session,
        remote: &Utf8Path,
        local: &Utf8Path,
    ) -> Result<(), StagingError> {
        Ok(session.get(remote, local)?)
    }
}

/// Byte copies mirrored into a content-tracked dataset pair for
/// provenance.
///
/// Tracking semantics belong to the external versioning CLI; this
/// strategy only verifies the CLI is present, copies bytes, and records
/// each staged path with it on the execution target.
#[derive(Clone, Debug)]
pub struct PairStaging<R: CommandRunner = ProcessCommandRunner> {
    tracker_bin: String,
    runner: R,
}

impl PairStaging<ProcessCommandRunner> {
    /// Creates the pair strategy around the given versioning CLI.
    #[must_use]
    pub const fn new(tracker_bin: String) -> Self {
        Self {
            tracker_bin,
            runner: ProcessCommandRunner,
        }
    }
}

impl<R: CommandRunner> PairStaging<R> {
    /// Creates the pair strategy with an injected runner for the local
    /// availability probe.
    #[must_use]
    pub const fn with_runner(tracker_bin: String, runner: R) -> Self {
        Self {
            tracker_bin,
            runner,
        }
    }

    fn track(
        &self,
        session: &dyn Session,
        path: &Utf8Path,
        message: &str,
    ) -> Result<(), StagingError> {
        let argv = vec![
            self.tracker_bin.clone(),
            String::from("save"),
            String::from("-m"),
            message.to_owned(),
            path.as_str().to_owned(),
        ];
        let options = ExecuteOptions {
            cwd: path.parent().map(Utf8Path::to_path_buf),
            ..ExecuteOptions::default()
        };
        session.execute_command(&argv, &options)?;
        Ok(())
    }
}

impl<R: CommandRunner> DataStaging for PairStaging<R> {
    fn kind(&self) -> &'static str {
        "pair"
    }

    fn check_available(&self) -> Result<(), StagingError> {
        let args = [OsString::from("--version")];
        let probe = self
            .runner
            .run(&self.tracker_bin, &args, &RunOptions::new())
            .map_err(|err| StagingError::MissingExternalDependency {
                name: self.tracker_bin.clone(),
                message: err.to_string(),
            })?;
        if probe.is_success() {
            Ok(())
        } else {
            Err(StagingError::MissingExternalDependency {
                name: self.tracker_bin.clone(),
                message: format!("version probe exited with status {:?}", probe.code),
            })
        }
    }

    fn stage_input(
        &self,
        session: &dyn Session,
        local: &Utf8Path,
        remote: &Utf8Path,
    ) -> Result<(), StagingError> {
        session.put(local, remote)?;
        self.track(session, remote, "stage job input")
    }

    fn retrieve_output(
        &self,
        session: &dyn Session,
        remote: &Utf8Path,
        local: &Utf8Path,
    ) -> Result<(), StagingError> {
        self.track(session, remote, "record job output")?;
        Ok(session.get(remote, local)?)
    }
}
