//! Unit tests for the job lifecycle state machine.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use camino::Utf8PathBuf;
use rstest::rstest;

use crate::session::Session;
use crate::staging::PlainStaging;
use crate::submission::{
    JobStatus, PollError, SubmissionBackend, SubmissionError, SubmissionHandle, SubmitOptions,
};
use crate::test_support::ScriptedSession;

use super::*;

/// Backend double whose poll results are scripted in advance.
#[derive(Debug, Default)]
struct ScriptedBackend {
    polls: VecDeque<Result<JobStatus, PollError>>,
    cancelled: bool,
}

impl ScriptedBackend {
    fn with_polls(polls: Vec<Result<JobStatus, PollError>>) -> Self {
        Self {
            polls: polls.into(),
            cancelled: false,
        }
    }
}

impl SubmissionBackend for ScriptedBackend {
    fn kind(&self) -> &'static str {
        "scripted"
    }

    fn submit(
        &mut self,
        _session: &dyn Session,
        _command: &str,
        _options: &SubmitOptions,
    ) -> Result<SubmissionHandle, SubmissionError> {
        Ok(SubmissionHandle::new(String::from("scripted-1")))
    }

    fn poll(
        &mut self,
        _session: &dyn Session,
        _handle: &SubmissionHandle,
    ) -> Result<JobStatus, PollError> {
        self.polls
            .pop_front()
            .unwrap_or_else(|| Ok(JobStatus::Queued))
    }

    fn cancel(
        &mut self,
        _session: &dyn Session,
        _handle: &SubmissionHandle,
    ) -> Result<(), SubmissionError> {
        self.cancelled = true;
        Ok(())
    }
}

fn session_with_home(home: &str) -> ScriptedSession {
    let session = ScriptedSession::new();
    session.set_envvars(BTreeMap::from([(
        String::from("HOME"),
        home.to_owned(),
    )]));
    session
}

fn spec_with_defaults() -> JobSpec {
    JobSpec::builder()
        .command("true")
        .build()
        .expect("valid spec")
}

fn orchestrator<'s>(
    session: &'s ScriptedSession,
    spec: JobSpec,
    local_directory: Utf8PathBuf,
) -> Orchestrator<'s> {
    Orchestrator::new(
        session,
        Box::new(ScriptedBackend::default()),
        Box::new(PlainStaging),
        spec,
        local_directory,
    )
    .expect("plain staging is always available")
}

#[test]
fn builder_rejects_an_empty_command() {
    let err = JobSpec::builder().build().expect_err("empty command");
    assert_eq!(err, JobSpecError::Validation(String::from("command_str")));
}

#[test]
fn builder_defaults_root_and_submission_type() {
    let spec = spec_with_defaults();
    assert_eq!(spec.root_directory, Utf8PathBuf::from(".drover/run-root"));
    assert_eq!(spec.submission_type, "local");
}

#[test]
fn default_root_resolves_under_the_remote_home() {
    let session = session_with_home("/home/u");
    let orc = orchestrator(&session, spec_with_defaults(), Utf8PathBuf::from("/tmp"));
    let root = orc.root_directory().expect("resolve root");
    assert_eq!(root, Utf8PathBuf::from("/home/u/.drover/run-root"));
}

#[test]
fn absolute_root_bypasses_the_environment() {
    let session = ScriptedSession::new();
    let spec = JobSpec::builder()
        .command("true")
        .root_directory("/scratch/runs")
        .build()
        .expect("valid spec");
    let orc = orchestrator(&session, spec, Utf8PathBuf::from("/tmp"));
    assert_eq!(
        orc.root_directory().expect("resolve root"),
        Utf8PathBuf::from("/scratch/runs")
    );
}

#[rstest]
#[case::no_home(BTreeMap::new())]
#[case::relative_home(BTreeMap::from([(String::from("HOME"), String::from("rel/path"))]))]
fn unusable_home_is_an_orchestrator_error(#[case] env: BTreeMap<String, String>) {
    let session = ScriptedSession::new();
    session.set_envvars(env);
    let orc = orchestrator(&session, spec_with_defaults(), Utf8PathBuf::from("/tmp"));
    let err = orc.root_directory().expect_err("unusable home");
    assert!(matches!(
        err,
        OrchestratorError::MissingHome | OrchestratorError::RelativeHome { .. }
    ));
}

#[test]
fn root_directory_is_cached_after_first_resolution() {
    let session = session_with_home("/home/u");
    let orc = orchestrator(&session, spec_with_defaults(), Utf8PathBuf::from("/tmp"));
    let first = orc.root_directory().expect("first resolution");

    // A changed environment no longer matters once the root is cached.
    session.set_envvars(BTreeMap::new());
    let second = orc.root_directory().expect("cached resolution");
    assert_eq!(first, second);
}

#[test]
fn operations_refuse_to_run_out_of_order() {
    let session = session_with_home("/home/u");
    let mut orc = orchestrator(&session, spec_with_defaults(), Utf8PathBuf::from("/tmp"));

    let submit_err = orc.submit().expect_err("submit before prepare");
    assert!(matches!(
        submit_err,
        OrchestratorError::Phase {
            operation: "submit",
            phase: JobPhase::Created
        }
    ));

    let fetch_err = orc.fetch().expect_err("fetch before terminal");
    assert!(matches!(
        fetch_err,
        OrchestratorError::Phase {
            operation: "fetch",
            ..
        }
    ));
}

#[test]
fn prepare_remote_collects_every_missing_input() {
    let local = tempfile::TempDir::new().expect("local dir");
    let local_dir = Utf8PathBuf::from_path_buf(local.path().to_path_buf()).expect("utf8");
    std::fs::write(local.path().join("present"), "x").expect("write input");

    let session = session_with_home("/home/u");
    let spec = JobSpec::builder()
        .command("true")
        .input("present")
        .input("gone")
        .input("also-gone")
        .build()
        .expect("valid spec");
    let mut orc = orchestrator(&session, spec, local_dir);

    let err = orc.prepare_remote().expect_err("missing inputs");
    let OrchestratorError::MissingInputs { paths } = err else {
        panic!("expected MissingInputs, got {err:?}");
    };
    assert_eq!(
        paths,
        vec![Utf8PathBuf::from("gone"), Utf8PathBuf::from("also-gone")]
    );
    // State is unchanged: nothing was staged and prepare can be retried.
    assert_eq!(orc.phase(), JobPhase::Created);
    assert!(session.commands().is_empty());
}

#[test]
fn prepare_remote_stages_inputs_into_the_working_directory() {
    let local = tempfile::TempDir::new().expect("local dir");
    let local_dir = Utf8PathBuf::from_path_buf(local.path().to_path_buf()).expect("utf8");
    std::fs::write(local.path().join("in"), "content\n").expect("write input");

    let session = session_with_home("/home/u");
    let spec = JobSpec::builder()
        .command("cat in >out")
        .input("in")
        .output("out")
        .build()
        .expect("valid spec");
    let mut orc = orchestrator(&session, spec, local_dir);

    orc.prepare_remote().expect("prepare");
    assert_eq!(orc.phase(), JobPhase::RemotePrepared);

    let staged = orc
        .working_directory()
        .expect("working directory")
        .join("in");
    assert!(session.exists(&staged));
    assert_eq!(session.remote_file(&staged).as_deref(), Some("content\n"));
}

#[test]
fn submit_wraps_the_command_with_cwd_and_redirection() {
    let session = session_with_home("/home/u");
    let spec = JobSpec::builder()
        .command("echo hi")
        .build()
        .expect("valid spec");
    let mut orc = Orchestrator::new(
        &session,
        Box::new(crate::submission::LocalSubmission::new()),
        Box::new(PlainStaging),
        spec,
        Utf8PathBuf::from("/tmp"),
    )
    .expect("construct");

    orc.prepare_remote().expect("prepare");
    orc.submit().expect("submit");
    assert_eq!(orc.phase(), JobPhase::Submitted);
    assert!(orc.submission_handle().is_some());

    let workdir = orc.working_directory().expect("working directory");
    let (argv, _) = session.commands().last().cloned().expect("spawned command");
    let command = argv.last().expect("command string");
    assert!(
        command.starts_with(&format!("cd {workdir} && {{ echo hi; }}")),
        "command should change directory first: {command}"
    );
    assert!(
        command.contains(&format!("> {workdir}/stdout")),
        "stdout should be redirected: {command}"
    );
}

#[tokio::test]
async fn follow_reports_terminal_state_and_updates_phase() {
    let session = session_with_home("/home/u");
    let backend = ScriptedBackend::with_polls(vec![
        Ok(JobStatus::Queued),
        Ok(JobStatus::Running),
        Ok(JobStatus::Completed),
    ]);
    let mut orc = Orchestrator::new(
        &session,
        Box::new(backend),
        Box::new(PlainStaging),
        spec_with_defaults(),
        Utf8PathBuf::from("/tmp"),
    )
    .expect("construct")
    .with_poll_interval(Duration::from_millis(1));

    orc.prepare_remote().expect("prepare");
    orc.submit().expect("submit");
    let outcome = orc.follow(None).await.expect("follow");
    assert_eq!(outcome, FollowOutcome::Terminal(JobStatus::Completed));
    assert_eq!(orc.phase(), JobPhase::Completed);
}

#[tokio::test]
async fn follow_retries_transient_poll_failures() {
    let session = session_with_home("/home/u");
    let backend = ScriptedBackend::with_polls(vec![
        Err(PollError::Unreachable {
            message: String::from("connection refused"),
        }),
        Err(PollError::Unreachable {
            message: String::from("connection refused"),
        }),
        Ok(JobStatus::Failed),
    ]);
    let mut orc = Orchestrator::new(
        &session,
        Box::new(backend),
        Box::new(PlainStaging),
        spec_with_defaults(),
        Utf8PathBuf::from("/tmp"),
    )
    .expect("construct")
    .with_poll_interval(Duration::from_millis(1))
    .with_poll_backoff_cap(Duration::from_millis(4));

    orc.prepare_remote().expect("prepare");
    orc.submit().expect("submit");
    let outcome = orc.follow(None).await.expect("follow");
    assert_eq!(outcome, FollowOutcome::Terminal(JobStatus::Failed));
    assert_eq!(orc.phase(), JobPhase::Failed);
}

#[tokio::test]
async fn timed_out_follow_reports_still_running_without_cancelling() {
    let session = session_with_home("/home/u");
    let mut orc = Orchestrator::new(
        &session,
        Box::new(ScriptedBackend::default()),
        Box::new(PlainStaging),
        spec_with_defaults(),
        Utf8PathBuf::from("/tmp"),
    )
    .expect("construct")
    .with_poll_interval(Duration::from_millis(1));

    orc.prepare_remote().expect("prepare");
    orc.submit().expect("submit");
    let outcome = orc
        .follow(Some(Duration::from_millis(0)))
        .await
        .expect("bounded follow");
    assert_eq!(outcome, FollowOutcome::StillRunning);
    assert!(!orc.phase().is_terminal());

    // The job is still followable afterwards.
    assert!(matches!(
        orc.follow(Some(Duration::from_millis(0))).await,
        Ok(FollowOutcome::StillRunning)
    ));
}

#[test]
fn fetch_after_failure_reports_missing_outputs_per_path() {
    let local = tempfile::TempDir::new().expect("local dir");
    let local_dir = Utf8PathBuf::from_path_buf(local.path().to_path_buf()).expect("utf8");

    let session = session_with_home("/home/u");
    let backend = ScriptedBackend::with_polls(vec![Ok(JobStatus::Failed)]);
    let spec = JobSpec::builder()
        .command("true")
        .output("kept")
        .output("never-made")
        .build()
        .expect("valid spec");
    let mut orc = Orchestrator::new(
        &session,
        Box::new(backend),
        Box::new(PlainStaging),
        spec,
        local_dir.clone(),
    )
    .expect("construct")
    .with_poll_interval(Duration::from_millis(1));

    orc.prepare_remote().expect("prepare");
    orc.submit().expect("submit");
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("runtime");
    runtime.block_on(orc.follow(None)).expect("follow");

    // One partial output exists; the other was never produced.
    let workdir = orc.working_directory().expect("working directory");
    session.seed_remote_file(workdir.join("kept"), "partial\n");

    let report = orc.fetch().expect("fetch succeeds despite misses");
    assert!(!report.is_complete());
    assert_eq!(report.missing, vec![Utf8PathBuf::from("never-made")]);
    assert!(report.retrieved.contains(&Utf8PathBuf::from("kept")));
    assert_eq!(
        std::fs::read_to_string(local_dir.join("kept")).expect("kept content"),
        "partial\n"
    );
}

#[tokio::test]
async fn fetch_after_cancellation_reports_absences_without_failing() {
    let local = tempfile::TempDir::new().expect("local dir");
    let local_dir = Utf8PathBuf::from_path_buf(local.path().to_path_buf()).expect("utf8");

    let session = session_with_home("/home/u");
    let backend = ScriptedBackend::with_polls(vec![Ok(JobStatus::Cancelled)]);
    let spec = JobSpec::builder()
        .command("sleep 600")
        .output("out")
        .build()
        .expect("valid spec");
    let mut orc = Orchestrator::new(
        &session,
        Box::new(backend),
        Box::new(PlainStaging),
        spec,
        local_dir,
    )
    .expect("construct")
    .with_poll_interval(Duration::from_millis(1));

    orc.prepare_remote().expect("prepare");
    orc.submit().expect("submit");
    orc.cancel().expect("cancel");
    let outcome = orc.follow(None).await.expect("follow");
    assert_eq!(outcome, FollowOutcome::Terminal(JobStatus::Cancelled));
    assert_eq!(orc.phase(), JobPhase::Cancelled);

    // The job never produced its output; fetch reports that per path
    // instead of erroring.
    let report = orc.fetch().expect("fetch after cancellation");
    assert_eq!(report.missing, vec![Utf8PathBuf::from("out")]);
}

#[test]
fn record_captures_spec_and_phase() {
    let session = session_with_home("/home/u");
    let spec = JobSpec::builder()
        .command("true")
        .input("in")
        .output("out")
        .build()
        .expect("valid spec");
    let orc = orchestrator(&session, spec, Utf8PathBuf::from("/tmp"));

    let record = orc.record(None);
    assert_eq!(record.status, "created");
    assert_eq!(record.inputs, vec![String::from("in")]);
    assert_eq!(record.job_id, orc.job_id());
}
