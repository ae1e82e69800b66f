//! Resource variant for a container managed through the engine CLI.

use std::ffi::OsString;

use crate::session::{
    CommandOutput, CommandRunner, ContainerSession, ContainerSessionConfig, ProcessCommandRunner,
    RunOptions, Session,
};

use super::{
    ConfigFragment, ConfigurationError, Resource, ResourceConfig, ResourceError, ResourceStatus,
};

/// A container addressed as a resource.
///
/// `create()` launches a long-lived container from the configured image;
/// `start()`/`stop()` drive the engine's pause lifecycle and `delete()`
/// removes the container.
#[derive(Clone, Debug)]
pub struct ContainerResource<R: CommandRunner = ProcessCommandRunner> {
    name: String,
    id: String,
    status: ResourceStatus,
    image: String,
    engine_bin: String,
    session: Option<ContainerSession<R>>,
    runner: R,
}

impl<R: CommandRunner + Clone> ContainerResource<R> {
    /// Reconstructs a container resource from a persisted record.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] when `image` is missing.
    pub fn from_config(config: &ResourceConfig, runner: R) -> Result<Self, ConfigurationError> {
        let name = config.require("name")?.to_owned();
        let image = config.require("image")?.to_owned();
        Ok(Self {
            name,
            id: config.id().unwrap_or_default().to_owned(),
            status: config
                .get("status")
                .map_or(ResourceStatus::NotCreated, ResourceStatus::parse),
            image,
            engine_bin: config.get("engine_bin").unwrap_or("docker").to_owned(),
            session: None,
            runner,
        })
    }

    fn engine(
        &self,
        operation: &'static str,
        args: &[&str],
    ) -> Result<CommandOutput, ResourceError> {
        let rendered: Vec<OsString> = args.iter().map(OsString::from).collect();
        let output = self
            .runner
            .run(&self.engine_bin, &rendered, &RunOptions::new())
            .map_err(|err| ResourceError::Lifecycle {
                operation,
                name: self.name.clone(),
                message: err.to_string(),
            })?;
        if output.is_success() {
            Ok(output)
        } else {
            Err(ResourceError::Lifecycle {
                operation,
                name: self.name.clone(),
                message: output.stderr.trim().to_owned(),
            })
        }
    }
}

impl<R: CommandRunner + Clone> Resource for ContainerResource<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn type_tag(&self) -> &'static str {
        "container"
    }

    fn status(&self) -> ResourceStatus {
        self.status
    }

    fn create(&mut self) -> Result<ConfigFragment, ResourceError> {
        if self.id.is_empty() {
            let output = self.engine(
                "create",
                &[
                    "run",
                    "-d",
                    "--name",
                    &self.name,
                    &self.image,
                    "sleep",
                    "infinity",
                ],
            )?;
            self.id = output.stdout.trim().to_owned();
            if self.id.is_empty() {
                return Err(ResourceError::Create {
                    name: self.name.clone(),
                    message: String::from("engine did not report a container id"),
                });
            }
        }
        self.status = ResourceStatus::Running;
        Ok(ConfigFragment::from([
            (String::from("id"), self.id.clone()),
            (String::from("status"), self.status.to_string()),
        ]))
    }

    fn connect(&mut self) -> Result<(), ResourceError> {
        if self.status == ResourceStatus::Deleted {
            return Err(ResourceError::Deleted {
                name: self.name.clone(),
            });
        }
        if self.session.is_none() {
            self.session = Some(ContainerSession::with_runner(
                ContainerSessionConfig {
                    engine_bin: self.engine_bin.clone(),
                    container: self.name.clone(),
                },
                self.runner.clone(),
            )?);
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), ResourceError> {
        self.engine("start", &["start", &self.name])?;
        self.status = ResourceStatus::Running;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ResourceError> {
        self.engine("stop", &["stop", &self.name])?;
        self.status = ResourceStatus::Stopped;
        Ok(())
    }

    fn delete(&mut self) -> Result<(), ResourceError> {
        self.engine("delete", &["rm", "-f", &self.name])?;
        self.session = None;
        self.id.clear();
        self.status = ResourceStatus::Deleted;
        Ok(())
    }

    fn session(&self) -> Result<&dyn Session, ResourceError> {
        if self.status == ResourceStatus::Deleted {
            return Err(ResourceError::Deleted {
                name: self.name.clone(),
            });
        }
        self.session
            .as_ref()
            .map(|session| session as &dyn Session)
            .ok_or_else(|| ResourceError::NotConnected {
                name: self.name.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::test_support::ScriptedRunner;

    use super::*;

    fn resource(runner: &ScriptedRunner) -> ContainerResource<ScriptedRunner> {
        let config = ResourceConfig::from_map(BTreeMap::from([
            (String::from("name"), String::from("worker-1")),
            (String::from("type"), String::from("container")),
            (String::from("image"), String::from("debian:stable")),
        ]));
        ContainerResource::from_config(&config, runner.clone()).expect("valid config")
    }

    #[test]
    fn create_launches_container_and_records_id() {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(0), "0123456789abcdef\n", "");
        let mut container = resource(&runner);

        let fragment = container.create().expect("create");
        assert_eq!(container.id(), "0123456789abcdef");
        assert_eq!(container.status(), ResourceStatus::Running);
        assert_eq!(fragment.get("status").map(String::as_str), Some("running"));

        let invocation = runner.invocations().first().cloned().expect("invocation");
        assert_eq!(
            invocation.command_string(),
            "docker run -d --name worker-1 debian:stable sleep infinity"
        );
    }

    #[test]
    fn stop_and_start_drive_the_engine_lifecycle() {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(0), "abc\n", "");
        runner.push_success();
        runner.push_success();
        let mut container = resource(&runner);
        container.create().expect("create");

        container.stop().expect("stop");
        assert_eq!(container.status(), ResourceStatus::Stopped);
        container.start().expect("start");
        assert_eq!(container.status(), ResourceStatus::Running);
    }

    #[test]
    fn delete_removes_container_and_clears_identity() {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(0), "abc\n", "");
        runner.push_success();
        let mut container = resource(&runner);
        container.create().expect("create");

        container.delete().expect("delete");
        assert!(container.id().is_empty());
        let err = container
            .session()
            .err()
            .expect("deleted resources have no session");
        assert!(matches!(err, ResourceError::Deleted { .. }));
    }

    #[test]
    fn engine_failure_surfaces_stderr() {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(1), "", "no such image\n");
        let mut container = resource(&runner);
        let err = container.create().expect_err("engine failure should error");
        assert!(matches!(
            err,
            ResourceError::Lifecycle { operation: "create", ref message, .. }
                if message == "no such image"
        ));
    }
}
