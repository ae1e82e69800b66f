//! Submission through an external batch scheduler.
//!
//! The backend drives the scheduler's own CLI: one submit command that
//! wraps the job, one queue-status command for polling, and one
//! cancellation command. A scheduler that cannot be reached is a
//! *transient* poll failure; a job the scheduler no longer knows is
//! resolved through the exit-status file the wrapped command leaves in
//! the working directory, and counts as a terminal failure when that
//! file never appeared.

use std::collections::{BTreeMap, BTreeSet};

use camino::Utf8PathBuf;
use shell_escape::unix::escape;

use crate::session::{CommandError, ExecuteOptions, Session};

use super::{
    JobStatus, PollError, SubmissionBackend, SubmissionError, SubmissionHandle, SubmitOptions,
};

const EXIT_STATUS_FILE: &str = ".exit-status";

/// Scheduler CLI commands used by [`BatchSubmission`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BatchConfig {
    /// Submission command.
    pub submit_bin: String,
    /// Queue-status command.
    pub queue_bin: String,
    /// Cancellation command.
    pub cancel_bin: String,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            submit_bin: String::from("sbatch"),
            queue_bin: String::from("squeue"),
            cancel_bin: String::from("scancel"),
        }
    }
}

/// Backend that submits jobs to a batch queue and polls its status
/// command.
#[derive(Debug, Default)]
pub struct BatchSubmission {
    config: BatchConfig,
    workdirs: BTreeMap<String, Utf8PathBuf>,
    cancel_requested: BTreeSet<String>,
}

impl BatchSubmission {
    /// Creates a backend around the given scheduler commands.
    #[must_use]
    pub const fn new(config: BatchConfig) -> Self {
        Self {
            config,
            workdirs: BTreeMap::new(),
            cancel_requested: BTreeSet::new(),
        }
    }

    fn exit_status_path(&self, handle: &SubmissionHandle) -> Result<Utf8PathBuf, PollError> {
        self.workdirs
            .get(handle.as_str())
            .map(|workdir| workdir.join(EXIT_STATUS_FILE))
            .ok_or_else(|| PollError::UnknownHandle {
                handle: handle.as_str().to_owned(),
            })
    }

    /// Resolves the terminal state of a job the scheduler no longer
    /// reports, from the exit-status file the wrapper left behind.
    fn resolve_departed(
        &self,
        session: &dyn Session,
        handle: &SubmissionHandle,
    ) -> Result<JobStatus, PollError> {
        let status_path = self.exit_status_path(handle)?;
        match session.read(&status_path) {
            Ok(contents) => match contents.trim().parse::<i32>() {
                Ok(0) => Ok(JobStatus::Completed),
                Ok(_) | Err(_) => Ok(JobStatus::Failed),
            },
            // No exit file: the job never finished. A requested cancel
            // explains that; otherwise the scheduler lost the job.
            Err(_) => {
                if self.cancel_requested.contains(handle.as_str()) {
                    Ok(JobStatus::Cancelled)
                } else {
                    Ok(JobStatus::Failed)
                }
            }
        }
    }

    fn map_queue_state(
        &self,
        session: &dyn Session,
        handle: &SubmissionHandle,
        state: &str,
    ) -> Result<JobStatus, PollError> {
        match state {
            "" => self.resolve_departed(session, handle),
            "PENDING" | "CONFIGURING" | "SUSPENDED" | "REQUEUED" => Ok(JobStatus::Queued),
            "RUNNING" | "COMPLETING" => Ok(JobStatus::Running),
            "COMPLETED" => self.resolve_departed(session, handle),
            "CANCELLED" => Ok(JobStatus::Cancelled),
            "FAILED" | "TIMEOUT" | "NODE_FAIL" | "OUT_OF_MEMORY" | "PREEMPTED" | "BOOT_FAIL"
            | "DEADLINE" => Ok(JobStatus::Failed),
            other => Err(PollError::Protocol {
                message: format!("unrecognised queue state: {other}"),
            }),
        }
    }
}

/// Extracts the scheduler-assigned job id from the submit command's
/// output, taking the last all-digit token (`Submitted batch job 4242`).
fn parse_job_id(stdout: &str) -> Option<String> {
    stdout
        .split_whitespace()
        .rev()
        .find(|token| !token.is_empty() && token.bytes().all(|byte| byte.is_ascii_digit()))
        .map(str::to_owned)
}

impl SubmissionBackend for BatchSubmission {
    fn kind(&self) -> &'static str {
        "batch"
    }

    fn submit(
        &mut self,
        session: &dyn Session,
        command: &str,
        options: &SubmitOptions,
    ) -> Result<SubmissionHandle, SubmissionError> {
        let status_path = options.working_directory.join(EXIT_STATUS_FILE);
        let wrapped = format!(
            "{{ {command}; }}; printf '%s' \"$?\" > {status}",
            status = escape(status_path.as_str().into())
        );

        let mut argv = vec![
            self.config.submit_bin.clone(),
            String::from("--job-name"),
            options.job_name.clone(),
            String::from("--chdir"),
            options.working_directory.as_str().to_owned(),
            String::from("--output"),
            options.working_directory.join("scheduler-log").into_string(),
        ];
        for (key, value) in &options.options {
            argv.push(format!("--{key}={value}"));
        }
        argv.push(String::from("--wrap"));
        argv.push(wrapped);

        let output = match session.execute_command(&argv, &ExecuteOptions::new()) {
            Ok(output) => output,
            Err(CommandError::Failed { stderr, .. }) => {
                return Err(SubmissionError::Rejected {
                    message: stderr.trim().to_owned(),
                });
            }
            Err(err) => return Err(SubmissionError::Command(err)),
        };

        let job_id = parse_job_id(&output.stdout).ok_or_else(|| SubmissionError::Rejected {
            message: format!(
                "could not parse a job id from scheduler output: {}",
                output.stdout.trim()
            ),
        })?;
        tracing::info!(%job_id, "submitted batch job");

        self.workdirs
            .insert(job_id.clone(), options.working_directory.clone());
        Ok(SubmissionHandle::new(job_id))
    }

    fn poll(
        &mut self,
        session: &dyn Session,
        handle: &SubmissionHandle,
    ) -> Result<JobStatus, PollError> {
        if !self.workdirs.contains_key(handle.as_str()) {
            return Err(PollError::UnknownHandle {
                handle: handle.as_str().to_owned(),
            });
        }

        let argv = vec![
            self.config.queue_bin.clone(),
            String::from("-h"),
            String::from("-j"),
            handle.as_str().to_owned(),
            String::from("-o"),
            String::from("%T"),
        ];
        match session.execute_command(&argv, &ExecuteOptions::new()) {
            Ok(output) => {
                let state = output.stdout.trim().to_owned();
                self.map_queue_state(session, handle, &state)
            }
            Err(CommandError::Failed { stderr, .. }) => {
                if stderr.to_lowercase().contains("invalid job id") {
                    self.resolve_departed(session, handle)
                } else {
                    // The scheduler answered strangely or not at all;
                    // that is not the job failing.
                    Err(PollError::Unreachable {
                        message: stderr.trim().to_owned(),
                    })
                }
            }
            Err(err) => Err(PollError::Unreachable {
                message: err.to_string(),
            }),
        }
    }

    fn cancel(
        &mut self,
        session: &dyn Session,
        handle: &SubmissionHandle,
    ) -> Result<(), SubmissionError> {
        if !self.workdirs.contains_key(handle.as_str()) {
            return Err(SubmissionError::UnknownHandle {
                handle: handle.as_str().to_owned(),
            });
        }

        // Record the intent first so a job that leaves the queue without
        // an exit file resolves to cancelled even if the request below
        // races the scheduler.
        self.cancel_requested.insert(handle.as_str().to_owned());

        let argv = vec![self.config.cancel_bin.clone(), handle.as_str().to_owned()];
        session
            .execute_command(&argv, &ExecuteOptions::new())
            .map(|_| ())
            .map_err(SubmissionError::Command)
    }
}
