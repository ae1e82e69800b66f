//! Session variant for remote hosts reached over SSH.
//!
//! Commands are wrapped into a single remote shell line and handed to the
//! system `ssh` client; transfers go through `scp`. Both binaries are
//! invoked through the [`CommandRunner`] seam so behaviour can be scripted
//! in tests without a live host.

use std::collections::BTreeMap;
use std::ffi::OsString;

use camino::Utf8Path;
use shell_escape::unix::escape;
use uuid::Uuid;

use super::runner::{CommandRunner, ProcessCommandRunner, RunOptions};
use super::{
    BatchItemOutput, CommandError, ExecOutput, ExecuteOptions, Session, SessionError,
    TransferError, parse_env_output, shell_join,
};

/// SSH connection settings for one remote host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshSessionConfig {
    /// Path to the `ssh` executable.
    pub ssh_bin: String,
    /// Path to the `scp` executable.
    pub scp_bin: String,
    /// Remote user to connect as.
    pub user: String,
    /// Remote host name or address.
    pub host: String,
    /// TCP port for SSH.
    pub port: u16,
    /// Path to the SSH private key file. Supports tilde expansion
    /// (`~/.ssh/id_ed25519`). Optional; when not provided, SSH falls back
    /// to default key locations.
    pub identity_file: Option<String>,
    /// Whether to force batch mode to avoid password prompts.
    pub batch_mode: bool,
    /// Whether to enforce host key checking.
    pub strict_host_key_checking: bool,
    /// Known hosts file override; empty disables the override.
    pub known_hosts_file: String,
}

impl SshSessionConfig {
    /// Returns settings for `user@host` with the stock client binaries.
    #[must_use]
    pub fn for_host(user: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            ssh_bin: String::from("ssh"),
            scp_bin: String::from("scp"),
            user: user.into(),
            host: host.into(),
            port: 22,
            identity_file: None,
            batch_mode: true,
            strict_host_key_checking: false,
            known_hosts_file: String::from("/dev/null"),
        }
    }

    /// Ensures configuration values are present after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfig`] when any required field is
    /// empty.
    pub fn validate(&self) -> Result<(), SessionError> {
        Self::require_value(&self.ssh_bin, "ssh_bin")?;
        Self::require_value(&self.scp_bin, "scp_bin")?;
        Self::require_value(&self.user, "user")?;
        Self::require_value(&self.host, "host")?;
        Self::require_optional_value(self.identity_file.as_deref(), "identity_file")?;
        Ok(())
    }

    fn require_value(value: &str, field: &str) -> Result<(), SessionError> {
        Self::require_optional_value(Some(value), field)
    }

    fn require_optional_value(value: Option<&str>, field: &str) -> Result<(), SessionError> {
        match value {
            None => Ok(()),
            Some(v) if !v.trim().is_empty() => Ok(()),
            Some(_) => Err(SessionError::InvalidConfig {
                field: field.to_owned(),
            }),
        }
    }
}

/// Expands a leading `~/` prefix to the user's home directory.
///
/// If the `HOME` environment variable is not set, the input is returned
/// unchanged.
#[must_use]
pub(crate) fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}

/// Session bound to a remote host over SSH.
#[derive(Clone, Debug)]
pub struct SshSession<R: CommandRunner = ProcessCommandRunner> {
    config: SshSessionConfig,
    runner: R,
}

impl SshSession<ProcessCommandRunner> {
    /// Creates a session that drives the real `ssh`/`scp` clients.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfig`] when validation fails.
    pub fn connect(config: SshSessionConfig) -> Result<Self, SessionError> {
        Self::with_runner(config, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> SshSession<R> {
    /// Creates a session using the provided runner and configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfig`] when validation fails.
    pub fn with_runner(config: SshSessionConfig, runner: R) -> Result<Self, SessionError> {
        config.validate()?;
        Ok(Self { config, runner })
    }

    /// Returns a reference to the connection settings.
    #[must_use]
    pub const fn config(&self) -> &SshSessionConfig {
        &self.config
    }

    fn common_ssh_options(&self) -> Vec<OsString> {
        let mut args = vec![];

        if let Some(ref identity_file) = self.config.identity_file {
            let expanded = expand_tilde(identity_file);
            args.push(OsString::from("-i"));
            args.push(OsString::from(expanded));
        }

        if self.config.batch_mode {
            args.push(OsString::from("-o"));
            args.push(OsString::from("BatchMode=yes"));
        }

        if !self.config.strict_host_key_checking {
            args.push(OsString::from("-o"));
            args.push(OsString::from("StrictHostKeyChecking=no"));
        }

        if !self.config.known_hosts_file.trim().is_empty() {
            args.push(OsString::from("-o"));
            args.push(OsString::from(format!(
                "UserKnownHostsFile={}",
                self.config.known_hosts_file
            )));
        }

        args
    }

    fn build_ssh_args(&self, remote_command: &str) -> Vec<OsString> {
        let mut args = vec![OsString::from("-p"), OsString::from(self.config.port.to_string())];
        args.extend(self.common_ssh_options());
        args.push(OsString::from(format!(
            "{}@{}",
            self.config.user, self.config.host
        )));
        args.push(OsString::from(remote_command));
        args
    }

    fn scp_target(&self, remote_path: &Utf8Path) -> String {
        format!(
            "{}@{}:{}",
            self.config.user, self.config.host, remote_path
        )
    }

    fn run_scp(&self, from: &str, to: &str) -> Result<(), CommandError> {
        let mut args = vec![OsString::from("-P"), OsString::from(self.config.port.to_string())];
        args.extend(self.common_ssh_options());
        args.push(OsString::from(from));
        args.push(OsString::from(to));

        let output = self
            .runner
            .run(&self.config.scp_bin, &args, &RunOptions::new())
            .map_err(|err| CommandError::Invoke {
                message: err.to_string(),
            })?;
        if output.is_success() {
            Ok(())
        } else {
            Err(CommandError::Failed {
                status: output.code,
                stdout: output.stdout,
                stderr: output.stderr,
            })
        }
    }

    fn execute_remote(&self, remote_command: &str) -> Result<ExecOutput, CommandError> {
        let args = self.build_ssh_args(remote_command);
        let output = self
            .runner
            .run(&self.config.ssh_bin, &args, &RunOptions::new())
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

    /// Succeeds exactly when the remote `test` invocation exits zero.
    fn probe(&self, test_flag: &str, path: &Utf8Path) -> bool {
        let command = format!("test {test_flag} {}", escape(path.as_str().into()));
        self.execute_remote(&command).is_ok()
    }
}

/// Builds the remote command line from `argv` plus execution options.
///
/// The working directory becomes a `cd` prefix and extra environment
/// variables are injected through `env`, so the result runs under any
/// POSIX login shell.
fn build_remote_command(argv: &[String], options: &ExecuteOptions) -> String {
    let mut rendered = String::new();
    if let Some(ref cwd) = options.cwd {
        rendered.push_str("cd ");
        rendered.push_str(escape(cwd.as_str().into()).as_ref());
        rendered.push_str(" && ");
    }
    if !options.env.is_empty() {
        rendered.push_str("env ");
        for (key, value) in &options.env {
            let assignment = format!("{key}={value}");
            rendered.push_str(escape(assignment.into()).as_ref());
            rendered.push(' ');
        }
    }
    rendered.push_str(&shell_join(argv));
    rendered
}

/// Builds the single remote script that executes every batch item.
///
/// Each item's command is followed by a marker line carrying its exit
/// status on stdout and a bare marker line on stderr, so both streams can
/// be split back into per-item chunks after one round-trip.
fn build_batch_script(cmd: &[String], items: &[String], marker: &str) -> String {
    let mut script = String::new();
    for item in items {
        let mut argv = cmd.to_vec();
        argv.push(item.clone());
        script.push_str(&shell_join(&argv));
        script.push_str("; rc=$?; printf '\\n%s %d\\n' ");
        script.push_str(escape(marker.into()).as_ref());
        script.push_str(" \"$rc\"; printf '\\n%s\\n' ");
        script.push_str(escape(marker.into()).as_ref());
        script.push_str(" >&2; ");
    }
    script
}

/// Splits a marker-delimited stream into per-item chunks.
///
/// Returns one `(chunk, status)` pair per marker line; the status is the
/// integer following the marker when present. The protocol's leading
/// newline before each marker is folded back out of the chunk.
fn split_batch_stream(stream: &str, marker: &str) -> Vec<(String, Option<i32>)> {
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in stream.lines() {
        let Some(rest) = line.strip_prefix(marker) else {
            current.push(line);
            continue;
        };
        let status = rest.trim().parse::<i32>().ok();
        // The protocol emits a newline before each marker, so joining
        // the accumulated lines restores the item's own trailing
        // newline through the final empty element.
        chunks.push((current.join("\n"), status));
        current.clear();
    }
    chunks
}

impl<R: CommandRunner> Session for SshSession<R> {
    fn execute_command(
        &self,
        argv: &[String],
        options: &ExecuteOptions,
    ) -> Result<ExecOutput, CommandError> {
        if argv.is_empty() {
            return Err(CommandError::Invoke {
                message: String::from("empty argument vector"),
            });
        }
        self.execute_remote(&build_remote_command(argv, options))
    }

    fn execute_command_batch(
        &self,
        cmd: &[String],
        items: &[String],
    ) -> Result<Vec<BatchItemOutput>, CommandError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let marker = format!("__drover_batch_{}__", Uuid::new_v4().simple());
        let script = build_batch_script(cmd, items, &marker);
        let output = match self.execute_remote(&script) {
            Ok(streams) => streams,
            // The script exits with the last printf's status, but a failing
            // shell still carries every marker in its captured streams.
            Err(CommandError::Failed { stdout, stderr, .. }) => ExecOutput { stdout, stderr },
            Err(err) => return Err(err),
        };

        let out_chunks = split_batch_stream(&output.stdout, &marker);
        let err_chunks = split_batch_stream(&output.stderr, &marker);
        if out_chunks.len() != items.len() || err_chunks.len() != items.len() {
            return Err(CommandError::Invoke {
                message: format!(
                    "batch protocol returned {} stdout and {} stderr chunks for {} items",
                    out_chunks.len(),
                    err_chunks.len(),
                    items.len()
                ),
            });
        }

        Ok(out_chunks
            .into_iter()
            .zip(err_chunks)
            .map(|((stdout, status), (stderr, _))| BatchItemOutput {
                stdout,
                stderr,
                status,
            })
            .collect())
    }

    fn exists(&self, path: &Utf8Path) -> bool {
        self.probe("-e", path)
    }

    fn isdir(&self, path: &Utf8Path) -> bool {
        self.probe("-d", path)
    }

    fn mkdir(&self, path: &Utf8Path, parents: bool) -> Result<(), SessionError> {
        if self.isdir(path) {
            return Ok(());
        }
        let flag = if parents { "-p " } else { "" };
        let command = format!("mkdir {flag}{}", escape(path.as_str().into()));
        self.execute_remote(&command)
            .map(|_| ())
            .map_err(|err| SessionError::Filesystem {
                path: path.to_path_buf(),
                message: err.to_string(),
            })
    }

    fn get(&self, remote_path: &Utf8Path, local_path: &Utf8Path) -> Result<(), TransferError> {
        if !self.exists(remote_path) {
            return Err(TransferError::MissingSource {
                path: remote_path.to_path_buf(),
            });
        }
        self.run_scp(&self.scp_target(remote_path), local_path.as_str())
            .map_err(|err| TransferError::Copy {
                from: remote_path.to_path_buf(),
                to: local_path.to_path_buf(),
                message: err.to_string(),
            })
    }

    fn put(&self, local_path: &Utf8Path, remote_path: &Utf8Path) -> Result<(), TransferError> {
        if !local_path.is_file() {
            return Err(TransferError::MissingSource {
                path: local_path.to_path_buf(),
            });
        }
        self.run_scp(local_path.as_str(), &self.scp_target(remote_path))
            .map_err(|err| TransferError::Copy {
                from: local_path.to_path_buf(),
                to: remote_path.to_path_buf(),
                message: err.to_string(),
            })
    }

    fn read(&self, path: &Utf8Path) -> Result<String, SessionError> {
        let command = format!("cat {}", escape(path.as_str().into()));
        self.execute_remote(&command)
            .map(|output| output.stdout)
            .map_err(SessionError::from)
    }

    fn query_envvars(&self) -> Result<BTreeMap<String, String>, SessionError> {
        let output = self
            .execute_remote("env")
            .map_err(|err| SessionError::Environment {
                message: err.to_string(),
            })?;
        Ok(parse_env_output(&output.stdout))
    }
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;
    use rstest::{fixture, rstest};

    use super::*;
    use crate::test_support::ScriptedRunner;

    #[fixture]
    fn config() -> SshSessionConfig {
        SshSessionConfig {
            port: 2222,
            ..SshSessionConfig::for_host("ubuntu", "10.0.0.5")
        }
    }

    fn scripted_session(config: SshSessionConfig, runner: &ScriptedRunner) -> SshSession<ScriptedRunner> {
        SshSession::with_runner(config, runner.clone()).expect("config should validate")
    }

    #[rstest]
    fn validation_rejects_blank_host(config: SshSessionConfig) {
        let blank = SshSessionConfig {
            host: String::from("  "),
            ..config
        };
        let Err(SessionError::InvalidConfig { field }) = blank.validate() else {
            panic!("blank host should fail validation");
        };
        assert_eq!(field, "host");
    }

    #[rstest]
    fn execute_command_builds_ssh_invocation(config: SshSessionConfig) {
        let runner = ScriptedRunner::new();
        runner.push_success();
        let session = scripted_session(config, &runner);

        let options = ExecuteOptions {
            cwd: Some(Utf8PathBuf::from("/work dir")),
            ..ExecuteOptions::default()
        };
        session
            .execute_command(&[String::from("ls"), String::from("-l")], &options)
            .expect("scripted success");

        let invocations = runner.invocations();
        let first = invocations.first().expect("one invocation");
        assert_eq!(first.program, "ssh");
        let rendered = first.command_string();
        assert!(rendered.contains("-p 2222"), "port flag missing: {rendered}");
        assert!(
            rendered.contains("ubuntu@10.0.0.5"),
            "destination missing: {rendered}"
        );
        assert!(
            rendered.contains("cd '/work dir' && ls -l"),
            "remote command missing: {rendered}"
        );
    }

    #[rstest]
    fn execute_command_propagates_remote_failure(config: SshSessionConfig) {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(3), "", "boom");
        let session = scripted_session(config, &runner);

        let err = session
            .execute_command(&[String::from("false")], &ExecuteOptions::new())
            .expect_err("non-zero exit should error");
        let CommandError::Failed { status, stderr, .. } = err else {
            panic!("expected Failed, got {err:?}");
        };
        assert_eq!(status, Some(3));
        assert_eq!(stderr, "boom");
    }

    #[test]
    fn build_remote_command_injects_environment() {
        let options = ExecuteOptions {
            cwd: None,
            env: [(String::from("LANG"), String::from("C"))].into(),
        };
        let rendered = build_remote_command(&[String::from("env")], &options);
        assert_eq!(rendered, "env LANG=C env");
    }

    #[test]
    fn split_batch_stream_preserves_order_and_status() {
        let marker = "__m__";
        let stream = "alpha\n\n__m__ 0\nbeta line one\nbeta line two\n\n__m__ 2\n";
        let chunks = split_batch_stream(stream, marker);
        assert_eq!(
            chunks,
            vec![
                (String::from("alpha\n"), Some(0)),
                (String::from("beta line one\nbeta line two\n"), Some(2)),
            ]
        );
    }

    #[rstest]
    fn batch_returns_one_result_per_item(config: SshSessionConfig) {
        let runner = ScriptedRunner::new();
        let session = scripted_session(config, &runner);

        // The marker is generated per call, so the scripted response has
        // to discover it from the script it receives and echo it back.
        runner.push_with(|args| {
            let script = args
                .last()
                .map(|arg| arg.to_string_lossy().into_owned())
                .unwrap_or_default();
            let marker_start = script.find("__drover_batch_").expect("marker in script");
            let marker = script
                .get(marker_start..)
                .and_then(|tail| tail.split_whitespace().next())
                .expect("marker token")
                .to_owned();
            crate::session::CommandOutput {
                code: Some(0),
                stdout: format!("one\n\n{marker} 0\n\n{marker} 1\nthree\n\n{marker} 0\n"),
                stderr: format!("\n{marker}\nwarn\n\n{marker}\n\n{marker}\n"),
            }
        });

        let results = session
            .execute_command_batch(
                &[String::from("cat")],
                &[String::from("a"), String::from("b"), String::from("c")],
            )
            .expect("batch should parse");

        assert_eq!(results.len(), 3);
        let statuses: Vec<Option<i32>> = results.iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec![Some(0), Some(1), Some(0)]);
        let first = results.first().expect("first result");
        assert_eq!(first.stdout, "one\n");
        let second = results.get(1).expect("second result");
        assert_eq!(second.stderr, "warn\n");
    }

    #[rstest]
    fn mkdir_is_noop_for_existing_directory(config: SshSessionConfig) {
        let runner = ScriptedRunner::new();
        // `test -d` succeeds, so no mkdir command should run.
        runner.push_success();
        let session = scripted_session(config, &runner);

        session
            .mkdir(Utf8Path::new("/already/there"), false)
            .expect("existing directory is a no-op");
        assert_eq!(runner.invocations().len(), 1);
    }

    #[rstest]
    fn get_checks_remote_source_first(config: SshSessionConfig) {
        let runner = ScriptedRunner::new();
        // `test -e` fails: the remote source is absent.
        runner.push_failure(1);
        let session = scripted_session(config, &runner);

        let err = session
            .get(Utf8Path::new("/remote/missing"), Utf8Path::new("/tmp/out"))
            .expect_err("missing source should error");
        assert!(matches!(err, TransferError::MissingSource { .. }));
    }
}
