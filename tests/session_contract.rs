//! Behavioural coverage for the session contract against the local
//! shell, exercising the real filesystem and process spawning.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use drover::{CommandError, ExecuteOptions, Session, ShellSession, TransferError};
use rstest::{fixture, rstest};
use tempfile::TempDir;

struct Workspace {
    root: Utf8PathBuf,
    _tmp: TempDir,
}

#[fixture]
fn workspace() -> Workspace {
    let tmp = TempDir::new().expect("create workspace temp directory");
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .expect("temp path should be valid UTF-8");
    Workspace { root, _tmp: tmp }
}

#[fixture]
fn session() -> ShellSession {
    ShellSession::new()
}

#[rstest]
fn paths_never_created_read_as_absent(workspace: Workspace, session: ShellSession) {
    let ghost = workspace.root.join("never/created/here");
    assert!(!session.exists(&ghost));
    assert!(!session.isdir(&ghost));
}

#[rstest]
fn a_file_is_not_a_directory(workspace: Workspace, session: ShellSession) {
    let file = workspace.root.join("plain-file");
    fs::write(&file, "x").expect("write file");
    assert!(session.exists(&file));
    assert!(!session.isdir(&file));
}

#[rstest]
fn mkdir_with_parents_creates_the_whole_chain(workspace: Workspace, session: ShellSession) {
    let nested = workspace.root.join("a/b/c");
    session.mkdir(&nested, true).expect("mkdir -p");
    assert!(session.isdir(&nested));
    assert!(session.exists(&nested));
}

#[rstest]
fn mkdir_without_parents_requires_the_intermediate(workspace: Workspace, session: ShellSession) {
    let nested = workspace.root.join("x/y");
    let err = session
        .mkdir(&nested, false)
        .expect_err("missing intermediate should fail");
    assert!(err.to_string().contains(nested.as_str()));
}

#[rstest]
fn mkdir_is_a_noop_on_an_existing_directory(workspace: Workspace, session: ShellSession) {
    let dir = workspace.root.join("existing");
    session.mkdir(&dir, false).expect("first mkdir");
    session.mkdir(&dir, false).expect("second mkdir is a no-op");
}

#[rstest]
fn put_then_get_round_trips_bytes_exactly(workspace: Workspace, session: ShellSession) {
    let source = workspace.root.join("source");
    let staged = workspace.root.join("staged/copy");
    let returned = workspace.root.join("returned");
    fs::write(&source, "payload\nwith lines\n").expect("write source");

    session.put(&source, &staged).expect("put");
    session.get(&staged, &returned).expect("get");

    assert_eq!(
        fs::read(&source).expect("source bytes"),
        fs::read(&returned).expect("returned bytes")
    );
}

#[rstest]
fn transfers_overwrite_an_existing_destination(workspace: Workspace, session: ShellSession) {
    let source = workspace.root.join("fresh");
    let dest = workspace.root.join("stale");
    fs::write(&source, "new contents").expect("write source");
    fs::write(&dest, "old contents").expect("write stale destination");

    session.put(&source, &dest).expect("put overwrites");
    assert_eq!(
        fs::read_to_string(&dest).expect("destination contents"),
        "new contents"
    );
}

#[rstest]
fn transfers_fail_distinctly_for_a_missing_source(workspace: Workspace, session: ShellSession) {
    let missing = workspace.root.join("not-there");
    let dest = workspace.root.join("dest");

    let err = session.put(&missing, &dest).expect_err("missing source");
    assert!(matches!(err, TransferError::MissingSource { ref path } if *path == missing));
    assert!(!session.exists(&dest));
}

#[rstest]
fn read_returns_full_text_contents(workspace: Workspace, session: ShellSession) {
    let file = workspace.root.join("notes");
    fs::write(&file, "line one\nline two\n").expect("write file");
    assert_eq!(
        session.read(&file).expect("read"),
        "line one\nline two\n"
    );
    assert!(session.read(&workspace.root.join("absent")).is_err());
}

#[rstest]
fn execute_command_captures_output_and_exit_behaviour(session: ShellSession) {
    let ok = session
        .execute_command(
            &[
                String::from("/bin/sh"),
                String::from("-c"),
                String::from("echo out; echo err >&2"),
            ],
            &ExecuteOptions::new(),
        )
        .expect("successful command");
    assert_eq!(ok.stdout, "out\n");
    assert_eq!(ok.stderr, "err\n");

    let err = session
        .execute_command(
            &[
                String::from("/bin/sh"),
                String::from("-c"),
                String::from("echo doomed >&2; exit 3"),
            ],
            &ExecuteOptions::new(),
        )
        .expect_err("non-zero exit should error");
    let CommandError::Failed { status, stderr, .. } = err else {
        panic!("expected Failed, got {err:?}");
    };
    assert_eq!(status, Some(3));
    assert_eq!(stderr, "doomed\n");
}

#[rstest]
fn execute_command_honours_cwd_and_env(workspace: Workspace, session: ShellSession) {
    let options = ExecuteOptions {
        cwd: Some(workspace.root.clone()),
        env: [(String::from("DROVER_PROBE"), String::from("42"))].into(),
    };
    let output = session
        .execute_command(
            &[
                String::from("/bin/sh"),
                String::from("-c"),
                String::from("pwd; printf '%s\\n' \"$DROVER_PROBE\""),
            ],
            &options,
        )
        .expect("command with options");

    let mut lines = output.stdout.lines();
    let reported_cwd = lines.next().expect("pwd line");
    assert_eq!(
        Utf8Path::new(reported_cwd)
            .file_name()
            .expect("cwd file name"),
        workspace.root.file_name().expect("workspace file name")
    );
    assert_eq!(lines.next(), Some("42"));
}

#[rstest]
fn batch_preserves_item_order_and_per_item_status(workspace: Workspace, session: ShellSession) {
    let present = workspace.root.join("present");
    fs::write(&present, "hello\n").expect("write input");
    let absent = workspace.root.join("absent");

    let results = session
        .execute_command_batch(
            &[String::from("cat")],
            &[
                present.as_str().to_owned(),
                absent.as_str().to_owned(),
                present.as_str().to_owned(),
            ],
        )
        .expect("batch runs to completion");

    assert_eq!(results.len(), 3);
    let first = results.first().expect("first result");
    assert_eq!(first.stdout, "hello\n");
    assert_eq!(first.status, Some(0));

    let second = results.get(1).expect("second result");
    assert_ne!(second.status, Some(0), "missing file should fail its item");

    let third = results.get(2).expect("third result");
    assert_eq!(third.status, Some(0), "later items run despite earlier failures");
}

#[rstest]
fn query_envvars_reflects_the_process_environment(session: ShellSession) {
    let vars = session.query_envvars().expect("environment");
    assert!(vars.contains_key("PATH"));
}
