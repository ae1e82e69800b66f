//! Session variant for commands inside a running container.
//!
//! All operations shell out to the container engine CLI (`docker` by
//! default): `exec` for commands and probes, `cp` for transfers. The
//! engine binary is invoked through the [`CommandRunner`] seam.

use std::collections::BTreeMap;
use std::ffi::OsString;

use camino::Utf8Path;

use super::runner::{CommandRunner, ProcessCommandRunner, RunOptions};
use super::{
    CommandError, ExecOutput, ExecuteOptions, Session, SessionError, TransferError,
    parse_env_output,
};

/// Container engine settings for one running container.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ContainerSessionConfig {
    /// Path to the container engine CLI.
    pub engine_bin: String,
    /// Name or identifier of the target container.
    pub container: String,
}

impl ContainerSessionConfig {
    /// Returns settings for `container` using the stock `docker` CLI.
    #[must_use]
    pub fn for_container(container: impl Into<String>) -> Self {
        Self {
            engine_bin: String::from("docker"),
            container: container.into(),
        }
    }

    /// Ensures configuration values are present after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfig`] when any required field is
    /// empty.
    pub fn validate(&self) -> Result<(), SessionError> {
        for (value, field) in [
            (&self.engine_bin, "engine_bin"),
            (&self.container, "container"),
        ] {
            if value.trim().is_empty() {
                return Err(SessionError::InvalidConfig {
                    field: field.to_owned(),
                });
            }
        }
        Ok(())
    }
}

/// Session bound to a running container.
#[derive(Clone, Debug)]
pub struct ContainerSession<R: CommandRunner = ProcessCommandRunner> {
    config: ContainerSessionConfig,
    runner: R,
}

impl ContainerSession<ProcessCommandRunner> {
    /// Creates a session that drives the real engine CLI.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfig`] when validation fails.
    pub fn connect(config: ContainerSessionConfig) -> Result<Self, SessionError> {
        Self::with_runner(config, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> ContainerSession<R> {
    /// Creates a session using the provided runner and configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfig`] when validation fails.
    pub fn with_runner(config: ContainerSessionConfig, runner: R) -> Result<Self, SessionError> {
        config.validate()?;
        Ok(Self { config, runner })
    }

    /// Returns a reference to the engine settings.
    #[must_use]
    pub const fn config(&self) -> &ContainerSessionConfig {
        &self.config
    }

    fn run_engine(&self, args: Vec<OsString>) -> Result<ExecOutput, CommandError> {
        let output = self
            .runner
            .run(&self.config.engine_bin, &args, &RunOptions::new())
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

    fn exec_args(&self, argv: &[String], options: &ExecuteOptions) -> Vec<OsString> {
        let mut args = vec![OsString::from("exec")];
        if let Some(ref cwd) = options.cwd {
            args.push(OsString::from("-w"));
            args.push(OsString::from(cwd.as_str()));
        }
        for (key, value) in &options.env {
            args.push(OsString::from("-e"));
            args.push(OsString::from(format!("{key}={value}")));
        }
        args.push(OsString::from(self.config.container.as_str()));
        args.extend(argv.iter().map(OsString::from));
        args
    }

    fn exec(&self, argv: &[String], options: &ExecuteOptions) -> Result<ExecOutput, CommandError> {
        self.run_engine(self.exec_args(argv, options))
    }

    fn probe(&self, test_flag: &str, path: &Utf8Path) -> bool {
        let argv = vec![
            String::from("test"),
            test_flag.to_owned(),
            path.as_str().to_owned(),
        ];
        self.exec(&argv, &ExecuteOptions::new()).is_ok()
    }

    fn cp(&self, from: String, to: String) -> Result<(), CommandError> {
        self.run_engine(vec![
            OsString::from("cp"),
            OsString::from(from),
            OsString::from(to),
        ])
        .map(|_| ())
    }

    fn container_path(&self, path: &Utf8Path) -> String {
        format!("{}:{}", self.config.container, path)
    }
}

impl<R: CommandRunner> Session for ContainerSession<R> {
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
        self.exec(argv, options)
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
        let mut argv = vec![String::from("mkdir")];
        if parents {
            argv.push(String::from("-p"));
        }
        argv.push(path.as_str().to_owned());
        self.exec(&argv, &ExecuteOptions::new())
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
        self.cp(
            self.container_path(remote_path),
            local_path.as_str().to_owned(),
        )
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
        self.cp(
            local_path.as_str().to_owned(),
            self.container_path(remote_path),
        )
        .map_err(|err| TransferError::Copy {
            from: local_path.to_path_buf(),
            to: remote_path.to_path_buf(),
            message: err.to_string(),
        })
    }

    fn read(&self, path: &Utf8Path) -> Result<String, SessionError> {
        let argv = vec![String::from("cat"), path.as_str().to_owned()];
        self.exec(&argv, &ExecuteOptions::new())
            .map(|output| output.stdout)
            .map_err(SessionError::from)
    }

    fn query_envvars(&self) -> Result<BTreeMap<String, String>, SessionError> {
        let argv = vec![String::from("env")];
        let output = self
            .exec(&argv, &ExecuteOptions::new())
            .map_err(|err| SessionError::Environment {
                message: err.to_string(),
            })?;
        Ok(parse_env_output(&output.stdout))
    }
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;
    use crate::test_support::ScriptedRunner;

    fn session(runner: &ScriptedRunner) -> ContainerSession<ScriptedRunner> {
        ContainerSession::with_runner(
            ContainerSessionConfig::for_container("worker-1"),
            runner.clone(),
        )
        .expect("config should validate")
    }

    #[test]
    fn execute_command_targets_the_container() {
        let runner = ScriptedRunner::new();
        runner.push_success();
        let container = session(&runner);

        let options = ExecuteOptions {
            cwd: Some(Utf8PathBuf::from("/job")),
            ..ExecuteOptions::default()
        };
        container
            .execute_command(&[String::from("ls")], &options)
            .expect("scripted success");

        let invocation = runner.invocations().first().cloned().expect("invocation");
        assert_eq!(invocation.program, "docker");
        assert_eq!(
            invocation.command_string(),
            "docker exec -w /job worker-1 ls"
        );
    }

    #[test]
    fn get_uses_engine_cp_after_probe() {
        let runner = ScriptedRunner::new();
        runner.push_success();
        runner.push_success();
        let container = session(&runner);

        container
            .get(Utf8Path::new("/job/out"), Utf8Path::new("/tmp/out"))
            .expect("scripted transfer");

        let invocations = runner.invocations();
        let cp = invocations.last().expect("cp invocation");
        assert_eq!(cp.command_string(), "docker cp worker-1:/job/out /tmp/out");
    }

    #[test]
    fn exists_is_false_when_probe_fails() {
        let runner = ScriptedRunner::new();
        runner.push_failure(1);
        let container = session(&runner);
        assert!(!container.exists(Utf8Path::new("/nope")));
    }
}
