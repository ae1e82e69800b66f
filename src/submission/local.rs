//! Immediate execution through the resource's session.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::session::{CommandError, ExecuteOptions, Session};

use super::{
    JobStatus, PollError, SubmissionBackend, SubmissionError, SubmissionHandle, SubmitOptions,
};

/// Backend that spawns the command directly and treats submit and
/// run-to-completion as effectively synchronous. `poll` reflects the
/// spawned process's exit status.
#[derive(Debug, Default)]
pub struct LocalSubmission {
    jobs: BTreeMap<String, JobStatus>,
}

impl LocalSubmission {
    /// Creates a backend with no recorded jobs.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            jobs: BTreeMap::new(),
        }
    }
}

impl SubmissionBackend for LocalSubmission {
    fn kind(&self) -> &'static str {
        "local"
    }

    fn submit(
        &mut self,
        session: &dyn Session,
        command: &str,
        options: &SubmitOptions,
    ) -> Result<SubmissionHandle, SubmissionError> {
        let handle = SubmissionHandle::new(Uuid::new_v4().simple().to_string());
        let argv = vec![
            String::from("/bin/sh"),
            String::from("-c"),
            command.to_owned(),
        ];

        tracing::debug!(job = %options.job_name, "running job synchronously");
        let status = match session.execute_command(&argv, &ExecuteOptions::new()) {
            Ok(_) => JobStatus::Completed,
            Err(CommandError::Failed { status, .. }) => {
                tracing::debug!(job = %options.job_name, ?status, "job exited non-zero");
                JobStatus::Failed
            }
            Err(err) => return Err(SubmissionError::Command(err)),
        };

        self.jobs.insert(handle.as_str().to_owned(), status);
        Ok(handle)
    }

    fn poll(
        &mut self,
        _session: &dyn Session,
        handle: &SubmissionHandle,
    ) -> Result<JobStatus, PollError> {
        self.jobs
            .get(handle.as_str())
            .copied()
            .ok_or_else(|| PollError::UnknownHandle {
                handle: handle.as_str().to_owned(),
            })
    }

    fn cancel(
        &mut self,
        _session: &dyn Session,
        handle: &SubmissionHandle,
    ) -> Result<(), SubmissionError> {
        let status = self
            .jobs
            .get_mut(handle.as_str())
            .ok_or_else(|| SubmissionError::UnknownHandle {
                handle: handle.as_str().to_owned(),
            })?;
        if !status.is_terminal() {
            *status = JobStatus::Cancelled;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::session::ExecOutput;
    use crate::test_support::ScriptedSession;

    use super::*;

    #[test]
    fn submit_runs_to_completion_and_poll_reflects_success() {
        let session = ScriptedSession::new();
        session.push_exec(Ok(ExecOutput::default()));
        let mut backend = LocalSubmission::new();

        let handle = backend
            .submit(&session, "true", &SubmitOptions::default())
            .expect("submit");
        let status = backend.poll(&session, &handle).expect("poll");
        assert_eq!(status, JobStatus::Completed);

        let (argv, _) = session.commands().first().cloned().expect("spawned command");
        assert_eq!(
            argv,
            vec![
                String::from("/bin/sh"),
                String::from("-c"),
                String::from("true")
            ]
        );
    }

    #[test]
    fn non_zero_exit_reports_failed_not_an_error() {
        let session = ScriptedSession::new();
        session.push_exec(Err(CommandError::Failed {
            status: Some(3),
            stdout: String::new(),
            stderr: String::from("boom"),
        }));
        let mut backend = LocalSubmission::new();

        let handle = backend
            .submit(&session, "exit 3", &SubmitOptions::default())
            .expect("submit records the failure");
        assert_eq!(
            backend.poll(&session, &handle).expect("poll"),
            JobStatus::Failed
        );
    }

    #[test]
    fn poll_rejects_foreign_handles() {
        let session = ScriptedSession::new();
        let mut backend = LocalSubmission::new();
        let foreign = SubmissionHandle::new(String::from("not-ours"));
        assert!(matches!(
            backend.poll(&session, &foreign),
            Err(PollError::UnknownHandle { .. })
        ));
    }
}
