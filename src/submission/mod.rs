//! Pluggable adapters that turn a prepared command into a running unit of
//! work on a resource.
//!
//! A [`SubmissionBackend`] owns submit/poll/cancel for one queueing
//! discipline: [`LocalSubmission`] runs the command immediately through
//! the session, [`BatchSubmission`] hands it to an external batch
//! scheduler and polls its queue.

use std::collections::BTreeMap;
use std::fmt;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::config::DroverConfig;
use crate::session::{CommandError, Session};

mod batch;
mod local;

pub use batch::{BatchConfig, BatchSubmission};
pub use local::LocalSubmission;

/// Queue state of one submitted job.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JobStatus {
    /// Accepted but not yet running.
    Queued,
    /// Currently executing.
    Running,
    /// Finished with a zero exit status.
    Completed,
    /// Finished with a non-zero exit status, or was lost by the scheduler.
    Failed,
    /// Cancelled before completion.
    Cancelled,
}

impl JobStatus {
    /// Returns `true` for states a job can never leave.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        formatter.write_str(rendered)
    }
}

/// Opaque identifier for one queue entry, meaningful only for the
/// lifetime of the backend that issued it.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SubmissionHandle(String);

impl SubmissionHandle {
    /// Wraps the backend's raw job identifier.
    #[must_use]
    pub const fn new(raw: String) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubmissionHandle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Submission settings derived from the job spec.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SubmitOptions {
    /// Working directory the job runs in.
    pub working_directory: Utf8PathBuf,
    /// Scheduler-visible job name.
    pub job_name: String,
    /// Backend-specific options passed through from the job spec, rendered as
    /// `--key=value` scheduler arguments by backends that accept them.
    pub options: BTreeMap<String, String>,
}

/// Errors raised while submitting or cancelling work.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SubmissionError {
    /// The backend rejected the job description, for example malformed
    /// resource limits. Not retried automatically.
    #[error("submission rejected: {message}")]
    Rejected {
        /// The backend's rejection message.
        message: String,
    },
    /// Running the backend's command failed.
    #[error(transparent)]
    Command(#[from] CommandError),
    /// The handle does not belong to this backend instance.
    #[error("unknown submission handle: {handle}")]
    UnknownHandle {
        /// The unrecognised handle.
        handle: String,
    },
    /// The requested submission type does not select a known backend.
    #[error("unknown submission type: {submission_type}")]
    UnknownType {
        /// The unrecognised tag.
        submission_type: String,
    },
}

/// Errors raised while polling a submitted job.
///
/// `Unreachable` is transient: the scheduler could not be asked, which
/// says nothing about the job itself, and the follow loop retries it.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PollError {
    /// The scheduler could not be reached; retry later.
    #[error("scheduler unreachable: {message}")]
    Unreachable {
        /// Why the status query failed.
        message: String,
    },
    /// The scheduler answered with something unintelligible.
    #[error("unexpected scheduler response: {message}")]
    Protocol {
        /// The offending response.
        message: String,
    },
    /// The handle does not belong to this backend instance.
    #[error("unknown submission handle: {handle}")]
    UnknownHandle {
        /// The unrecognised handle.
        handle: String,
    },
}

/// Turns a prepared command into a running unit of work and exposes
/// status polling and best-effort cancellation.
pub trait SubmissionBackend {
    /// Returns the backend tag.
    fn kind(&self) -> &'static str;

    /// Submits `command` for execution on the session's target.
    ///
    /// # Errors
    ///
    /// Returns [`SubmissionError::Rejected`] when the backend refuses the
    /// job description and [`SubmissionError::Command`] when the
    /// submission transport fails.
    fn submit(
        &mut self,
        session: &dyn Session,
        command: &str,
        options: &SubmitOptions,
    ) -> Result<SubmissionHandle, SubmissionError>;

    /// Reports the job's current queue state.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::Unreachable`] for transient scheduler
    /// failures, distinct from the job itself finishing in a failed
    /// state.
    fn poll(
        &mut self,
        session: &dyn Session,
        handle: &SubmissionHandle,
    ) -> Result<JobStatus, PollError>;

    /// Requests cancellation. Best-effort; not guaranteed instantaneous.
    ///
    /// # Errors
    ///
    /// Returns [`SubmissionError`] when the request cannot be delivered.
    fn cancel(
        &mut self,
        session: &dyn Session,
        handle: &SubmissionHandle,
    ) -> Result<(), SubmissionError>;
}

/// Constructs the backend selected by a spec's `submission_type` tag.
///
/// # Errors
///
/// Returns [`SubmissionError::UnknownType`] for an unrecognised tag.
pub fn backend_for(
    submission_type: &str,
    config: &DroverConfig,
) -> Result<Box<dyn SubmissionBackend>, SubmissionError> {
    match submission_type {
        "local" => Ok(Box::new(LocalSubmission::new())),
        "batch" => Ok(Box::new(BatchSubmission::new(BatchConfig {
            submit_bin: config.batch_submit_bin.clone(),
            queue_bin: config.batch_queue_bin.clone(),
            cancel_bin: config.batch_cancel_bin.clone(),
        }))),
        other => Err(SubmissionError::UnknownType {
            submission_type: other.to_owned(),
        }),
    }
}
