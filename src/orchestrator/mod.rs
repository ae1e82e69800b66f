//! Per-job lifecycle state machine: stage inputs, submit, monitor,
//! retrieve outputs.
//!
//! One [`Orchestrator`] drives exactly one [`JobSpec`] through
//! `prepare_remote → submit → follow → fetch` against a borrowed session,
//! an owned submission backend, and an owned staging strategy. No
//! transition skips a predecessor; calling an operation out of order is a
//! usage error, not a panic.

use std::cell::OnceCell;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use shell_escape::unix::escape;
use thiserror::Error;
use tokio::time::{Instant, sleep};
use uuid::Uuid;

use crate::config::DroverConfig;
use crate::provenance::{JobRecord, PackageListing};
use crate::session::{Session, SessionError};
use crate::staging::{DataStaging, PlainStaging, StagingError};
use crate::submission::{
    self, JobStatus, PollError, SubmissionBackend, SubmissionError, SubmissionHandle,
    SubmitOptions,
};

/// Default remote base path for staging, resolved against the remote
/// home directory.
pub const DEFAULT_ROOT_DIRECTORY: &str = ".drover/run-root";

const STDOUT_LOG: &str = "stdout";
const STDERR_LOG: &str = "stderr";

/// Immutable description of one job: what to run, what to stage in, and
/// what to expect back.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JobSpec {
    /// Remote base path for staging; resolved against the remote home
    /// directory when relative.
    pub root_directory: Utf8PathBuf,
    /// Relative paths copied into the working directory before
    /// submission, in order.
    pub inputs: Vec<Utf8PathBuf>,
    /// Relative paths expected in the working directory after
    /// completion, in order.
    pub outputs: Vec<Utf8PathBuf>,
    /// Command executed in the working directory.
    pub command_str: String,
    /// Tag selecting the submission backend variant.
    pub submission_type: String,
    /// Backend-specific options passed through to the scheduler.
    pub options: BTreeMap<String, String>,
}

impl JobSpec {
    /// Starts a builder for a [`JobSpec`].
    #[must_use]
    pub fn builder() -> JobSpecBuilder {
        JobSpecBuilder::default()
    }
}

/// Builder for [`JobSpec`] that defers validation to construction.
#[derive(Clone, Debug, Default)]
pub struct JobSpecBuilder {
    root_directory: Option<Utf8PathBuf>,
    inputs: Vec<Utf8PathBuf>,
    outputs: Vec<Utf8PathBuf>,
    command_str: String,
    submission_type: Option<String>,
    options: BTreeMap<String, String>,
}

impl JobSpecBuilder {
    /// Sets the remote base path for staging.
    #[must_use]
    pub fn root_directory(mut self, value: impl Into<Utf8PathBuf>) -> Self {
        self.root_directory = Some(value.into());
        self
    }

    /// Appends one input path.
    #[must_use]
    pub fn input(mut self, value: impl Into<Utf8PathBuf>) -> Self {
        self.inputs.push(value.into());
        self
    }

    /// Appends one output path.
    #[must_use]
    pub fn output(mut self, value: impl Into<Utf8PathBuf>) -> Self {
        self.outputs.push(value.into());
        self
    }

    /// Sets the command to execute.
    #[must_use]
    pub fn command(mut self, value: impl Into<String>) -> Self {
        self.command_str = value.into();
        self
    }

    /// Sets the submission backend tag.
    #[must_use]
    pub fn submission_type(mut self, value: impl Into<String>) -> Self {
        self.submission_type = Some(value.into());
        self
    }

    /// Adds one backend-specific option.
    #[must_use]
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Builds and validates the [`JobSpec`].
    ///
    /// # Errors
    ///
    /// Returns [`JobSpecError::Validation`] when the command is empty.
    pub fn build(self) -> Result<JobSpec, JobSpecError> {
        if self.command_str.trim().is_empty() {
            return Err(JobSpecError::Validation(String::from("command_str")));
        }
        let submission_type = self
            .submission_type
            .unwrap_or_else(|| String::from("local"));
        if submission_type.trim().is_empty() {
            return Err(JobSpecError::Validation(String::from("submission_type")));
        }
        Ok(JobSpec {
            root_directory: self
                .root_directory
                .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_ROOT_DIRECTORY)),
            inputs: self.inputs,
            outputs: self.outputs,
            command_str: self.command_str,
            submission_type,
            options: self.options,
        })
    }
}

/// Errors raised while building a [`JobSpec`].
#[derive(Debug, Error, Eq, PartialEq)]
pub enum JobSpecError {
    /// Raised when a required field is missing or empty.
    #[error("missing or empty field: {0}")]
    Validation(String),
}

/// Lifecycle phase of one orchestrated job.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JobPhase {
    /// Constructed; nothing staged yet.
    Created,
    /// Inputs staged into the working directory.
    RemotePrepared,
    /// Handed to the submission backend.
    Submitted,
    /// Observed running by the backend.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished unsuccessfully.
    Failed,
    /// Cancelled before completion.
    Cancelled,
}

impl JobPhase {
    /// Returns `true` for phases a job can never leave.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = match self {
            Self::Created => "created",
            Self::RemotePrepared => "remote-prepared",
            Self::Submitted => "submitted",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        formatter.write_str(rendered)
    }
}

const fn terminal_phase(status: JobStatus) -> Option<JobPhase> {
    match status {
        JobStatus::Queued | JobStatus::Running => None,
        JobStatus::Completed => Some(JobPhase::Completed),
        JobStatus::Failed => Some(JobPhase::Failed),
        JobStatus::Cancelled => Some(JobPhase::Cancelled),
    }
}

/// Result of a bounded [`Orchestrator::follow`] call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FollowOutcome {
    /// The job reached a terminal state.
    Terminal(JobStatus),
    /// The caller's timeout elapsed first; the job is still in flight.
    StillRunning,
}

/// Per-output results of [`Orchestrator::fetch`].
///
/// Absent outputs are recorded rather than aborting the whole fetch, so
/// partial results and logs survive failed or cancelled jobs.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FetchReport {
    /// Outputs that were retrieved.
    pub retrieved: Vec<Utf8PathBuf>,
    /// Declared outputs that were absent or could not be retrieved.
    pub missing: Vec<Utf8PathBuf>,
}

impl FetchReport {
    /// Returns `true` when every declared output was retrieved.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

fn format_paths(paths: &[Utf8PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors raised by the job lifecycle state machine.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// An operation was called out of lifecycle order.
    #[error("{operation} cannot run while the job is {phase}")]
    Phase {
        /// Operation that was refused.
        operation: &'static str,
        /// Phase the job was in.
        phase: JobPhase,
    },
    /// The remote environment has no home directory to resolve a
    /// relative root against.
    #[error("remote environment has no HOME entry to resolve the root directory")]
    MissingHome,
    /// The remote home directory is itself relative, which is refused as
    /// a staging base.
    #[error("remote HOME is not an absolute path: {home}")]
    RelativeHome {
        /// The offending home value.
        home: String,
    },
    /// Querying the remote environment failed.
    #[error("failed to query the remote environment")]
    Environment(#[source] SessionError),
    /// One or more declared inputs are absent locally.
    #[error("missing local inputs: {}", format_paths(.paths))]
    MissingInputs {
        /// Every input that was absent.
        paths: Vec<Utf8PathBuf>,
    },
    /// The working directory could not be created.
    #[error("failed to create working directory {path}")]
    CreateWorkdir {
        /// Directory that could not be created.
        path: Utf8PathBuf,
        /// Underlying session error.
        #[source]
        source: SessionError,
    },
    /// Staging an input or retrieving an output failed.
    #[error(transparent)]
    Staging(#[from] StagingError),
    /// The submission backend refused or failed.
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    /// Polling failed in a non-transient way.
    #[error(transparent)]
    Poll(#[from] PollError),
}

/// Drives one job through its lifecycle using a resource's session, a
/// submission backend, and a data-staging strategy.
pub struct Orchestrator<'s> {
    session: &'s dyn Session,
    backend: Box<dyn SubmissionBackend>,
    staging: Box<dyn DataStaging>,
    spec: JobSpec,
    local_directory: Utf8PathBuf,
    job_id: String,
    phase: JobPhase,
    handle: Option<SubmissionHandle>,
    root: OnceCell<Utf8PathBuf>,
    poll_interval: Duration,
    poll_backoff_cap: Duration,
}

impl fmt::Debug for Orchestrator<'_> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Orchestrator")
            .field("job_id", &self.job_id)
            .field("phase", &self.phase)
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

impl<'s> Orchestrator<'s> {
    /// Creates an orchestrator from explicit parts.
    ///
    /// The staging strategy's availability is verified here, before any
    /// state-mutating operation, so a missing external collaborator
    /// surfaces eagerly rather than mid-lifecycle.
    ///
    /// # Errors
    ///
    /// Returns [`StagingError::MissingExternalDependency`] (wrapped) when
    /// the staging strategy's collaborator is unavailable.
    pub fn new(
        session: &'s dyn Session,
        backend: Box<dyn SubmissionBackend>,
        staging: Box<dyn DataStaging>,
        spec: JobSpec,
        local_directory: Utf8PathBuf,
    ) -> Result<Self, OrchestratorError> {
        staging.check_available()?;
        Ok(Self {
            session,
            backend,
            staging,
            spec,
            local_directory,
            job_id: Uuid::new_v4().simple().to_string(),
            phase: JobPhase::Created,
            handle: None,
            root: OnceCell::new(),
            poll_interval: Duration::from_secs(2),
            poll_backoff_cap: Duration::from_secs(60),
        })
    }

    /// Creates an orchestrator with plain staging and the backend
    /// selected by the job spec's `submission_type`.
    ///
    /// # Errors
    ///
    /// Returns [`SubmissionError::UnknownType`] (wrapped) for an
    /// unrecognised submission tag.
    pub fn from_spec(
        session: &'s dyn Session,
        spec: JobSpec,
        local_directory: Utf8PathBuf,
        config: &DroverConfig,
    ) -> Result<Self, OrchestratorError> {
        let backend = submission::backend_for(&spec.submission_type, config)?;
        let orchestrator =
            Self::new(session, backend, Box::new(PlainStaging), spec, local_directory)?;
        Ok(orchestrator
            .with_poll_interval(config.poll_interval())
            .with_poll_backoff_cap(config.poll_backoff_cap()))
    }

    /// Overrides the poll interval.
    ///
    /// This is primarily used by tests to keep timeout scenarios fast.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Overrides the poll backoff cap applied after transient failures.
    #[must_use]
    pub const fn with_poll_backoff_cap(mut self, cap: Duration) -> Self {
        self.poll_backoff_cap = cap;
        self
    }

    /// Returns the job-unique identifier used for the working directory.
    #[must_use]
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Returns the current lifecycle phase.
    #[must_use]
    pub const fn phase(&self) -> JobPhase {
        self.phase
    }

    /// Returns the submission handle, once submitted.
    #[must_use]
    pub const fn submission_handle(&self) -> Option<&SubmissionHandle> {
        self.handle.as_ref()
    }

    /// Returns the resolved remote base directory for staging.
    ///
    /// Evaluated on first access and cached: an absolute spec value is
    /// used as-is, a relative one resolves against the session's `HOME`.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::MissingHome`] when the remote
    /// environment has no home entry and
    /// [`OrchestratorError::RelativeHome`] when that entry is itself
    /// relative.
    pub fn root_directory(&self) -> Result<Utf8PathBuf, OrchestratorError> {
        if let Some(root) = self.root.get() {
            return Ok(root.clone());
        }
        let resolved = self.resolve_root()?;
        self.root.set(resolved.clone()).ok();
        Ok(resolved)
    }

    fn resolve_root(&self) -> Result<Utf8PathBuf, OrchestratorError> {
        if self.spec.root_directory.is_absolute() {
            return Ok(self.spec.root_directory.clone());
        }
        let env = self
            .session
            .query_envvars()
            .map_err(OrchestratorError::Environment)?;
        let home = env.get("HOME").ok_or(OrchestratorError::MissingHome)?;
        let home_path = Utf8Path::new(home);
        if !home_path.is_absolute() {
            return Err(OrchestratorError::RelativeHome { home: home.clone() });
        }
        Ok(home_path.join(&self.spec.root_directory))
    }

    /// Returns the per-job staging directory under the root directory.
    ///
    /// # Errors
    ///
    /// Propagates [`Orchestrator::root_directory`] failures.
    pub fn working_directory(&self) -> Result<Utf8PathBuf, OrchestratorError> {
        Ok(self.root_directory()?.join(&self.job_id))
    }

    fn require_phase(
        &self,
        expected: &[JobPhase],
        operation: &'static str,
    ) -> Result<(), OrchestratorError> {
        if expected.contains(&self.phase) {
            Ok(())
        } else {
            Err(OrchestratorError::Phase {
                operation,
                phase: self.phase,
            })
        }
    }

    /// Creates the working directory and stages every declared input
    /// into it.
    ///
    /// All inputs are checked locally before anything is transferred, so
    /// a missing input leaves both sides untouched and the job in
    /// `Created`.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::MissingInputs`] listing every absent
    /// input, or staging/directory errors.
    pub fn prepare_remote(&mut self) -> Result<(), OrchestratorError> {
        self.require_phase(&[JobPhase::Created], "prepare_remote")?;

        let missing: Vec<Utf8PathBuf> = self
            .spec
            .inputs
            .iter()
            .filter(|input| !self.local_directory.join(input).as_std_path().is_file())
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(OrchestratorError::MissingInputs { paths: missing });
        }

        let workdir = self.working_directory()?;
        self.session
            .mkdir(&workdir, true)
            .map_err(|source| OrchestratorError::CreateWorkdir {
                path: workdir.clone(),
                source,
            })?;
        tracing::debug!(%workdir, "created working directory");

        for input in &self.spec.inputs {
            let remote = workdir.join(input);
            if let Some(parent) = remote.parent()
                && parent != workdir
            {
                self.session.mkdir(parent, true).map_err(|source| {
                    OrchestratorError::CreateWorkdir {
                        path: parent.to_path_buf(),
                        source,
                    }
                })?;
            }
            self.staging
                .stage_input(self.session, &self.local_directory.join(input), &remote)?;
            tracing::debug!(%input, "staged input");
        }

        self.phase = JobPhase::RemotePrepared;
        Ok(())
    }

    /// Builds the full command line and hands it to the submission
    /// backend, storing the returned handle.
    ///
    /// The command changes into the working directory and redirects the
    /// job's streams into `stdout`/`stderr` files there.
    ///
    /// # Errors
    ///
    /// Returns [`SubmissionError`] (wrapped) when the backend rejects
    /// the job description; this is not retried automatically.
    pub fn submit(&mut self) -> Result<(), OrchestratorError> {
        self.require_phase(&[JobPhase::RemotePrepared], "submit")?;

        let workdir = self.working_directory()?;
        let command = format!(
            "cd {wd} && {{ {command}; }} > {out} 2> {err}",
            wd = escape(workdir.as_str().into()),
            command = self.spec.command_str,
            out = escape(workdir.join(STDOUT_LOG).as_str().into()),
            err = escape(workdir.join(STDERR_LOG).as_str().into()),
        );
        let options = SubmitOptions {
            working_directory: workdir,
            job_name: format!("drover-{}", self.job_id),
            options: self.spec.options.clone(),
        };

        let handle = self.backend.submit(self.session, &command, &options)?;
        tracing::info!(job_id = %self.job_id, handle = %handle, "submitted job");
        self.handle = Some(handle);
        self.phase = JobPhase::Submitted;
        Ok(())
    }

    /// Polls the submission backend until the job reaches a terminal
    /// state or `timeout` elapses.
    ///
    /// Transient scheduler failures are retried with doubling backoff; a
    /// timed-out follow returns [`FollowOutcome::StillRunning`] rather
    /// than failing, and never cancels the job.
    ///
    /// # Errors
    ///
    /// Returns [`PollError`] (wrapped) for non-transient polling
    /// failures.
    pub async fn follow(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<FollowOutcome, OrchestratorError> {
        self.require_phase(&[JobPhase::Submitted, JobPhase::Running], "follow")?;
        let Some(handle) = self.handle.clone() else {
            return Err(OrchestratorError::Phase {
                operation: "follow",
                phase: self.phase,
            });
        };

        let deadline = timeout.map(|limit| Instant::now() + limit);
        let mut backoff = self.poll_interval;
        loop {
            match self.backend.poll(self.session, &handle) {
                Ok(status) => {
                    backoff = self.poll_interval;
                    if let Some(phase) = terminal_phase(status) {
                        self.phase = phase;
                        tracing::info!(job_id = %self.job_id, %status, "job finished");
                        return Ok(FollowOutcome::Terminal(status));
                    }
                    if status == JobStatus::Running {
                        self.phase = JobPhase::Running;
                    }
                }
                Err(PollError::Unreachable { message }) => {
                    tracing::debug!(%message, ?backoff, "scheduler unreachable, backing off");
                    backoff = backoff
                        .checked_mul(2)
                        .unwrap_or(self.poll_backoff_cap)
                        .min(self.poll_backoff_cap);
                }
                Err(err) => return Err(err.into()),
            }

            if deadline.is_some_and(|limit| Instant::now() >= limit) {
                return Ok(FollowOutcome::StillRunning);
            }
            sleep(backoff).await;
        }
    }

    /// Requests cancellation of the submitted job. Best-effort; the
    /// terminal state is observed through a later `follow`.
    ///
    /// # Errors
    ///
    /// Returns [`SubmissionError`] (wrapped) when the request cannot be
    /// delivered.
    pub fn cancel(&mut self) -> Result<(), OrchestratorError> {
        self.require_phase(&[JobPhase::Submitted, JobPhase::Running], "cancel")?;
        let Some(handle) = self.handle.clone() else {
            return Err(OrchestratorError::Phase {
                operation: "cancel",
                phase: self.phase,
            });
        };
        self.backend.cancel(self.session, &handle)?;
        Ok(())
    }

    /// Retrieves every declared output, plus the job's `stdout`/`stderr`
    /// logs, into the local directory.
    ///
    /// Callable in any terminal phase; after failure or cancellation it
    /// retrieves whatever partial outputs exist. Absent outputs are
    /// recorded per path in the report; the fetch never aborts on the
    /// first miss.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Phase`] before a terminal phase.
    pub fn fetch(&mut self) -> Result<FetchReport, OrchestratorError> {
        self.require_phase(
            &[JobPhase::Completed, JobPhase::Failed, JobPhase::Cancelled],
            "fetch",
        )?;
        let workdir = self.working_directory()?;

        let mut report = FetchReport::default();
        for output in &self.spec.outputs {
            let remote = workdir.join(output);
            let local = self.local_directory.join(output);
            match self.staging.retrieve_output(self.session, &remote, &local) {
                Ok(()) => report.retrieved.push(output.clone()),
                Err(err) => {
                    tracing::debug!(%output, error = %err, "declared output not retrieved");
                    report.missing.push(output.clone());
                }
            }
        }

        for log in [STDOUT_LOG, STDERR_LOG] {
            let remote = workdir.join(log);
            let local = self.local_directory.join(log);
            if self.session.get(&remote, &local).is_ok() {
                report.retrieved.push(Utf8PathBuf::from(log));
            }
        }

        Ok(report)
    }

    /// Builds a serialisable record of this job, optionally attaching a
    /// package listing supplied by an external collaborator.
    #[must_use]
    pub fn record(&self, packages: Option<PackageListing>) -> JobRecord {
        JobRecord {
            job_id: self.job_id.clone(),
            command: self.spec.command_str.clone(),
            submission_type: self.spec.submission_type.clone(),
            status: self.phase.to_string(),
            inputs: self
                .spec
                .inputs
                .iter()
                .map(|path| path.as_str().to_owned())
                .collect(),
            outputs: self
                .spec
                .outputs
                .iter()
                .map(|path| path.as_str().to_owned())
                .collect(),
            packages,
        }
    }
}

#[cfg(test)]
mod tests;
