//! Resource variant for a remote host reached over SSH.

use uuid::Uuid;

use crate::session::{
    CommandRunner, ProcessCommandRunner, Session, SshSession, SshSessionConfig,
};

use super::{
    ConfigFragment, ConfigurationError, Resource, ResourceConfig, ResourceError, ResourceStatus,
};

/// An existing remote host addressed as a resource.
///
/// The host itself is not provisioned by drover, so `create()` only
/// assigns an identity and `start()`/`stop()` are documented no-ops; a
/// plain host has no paused state.
#[derive(Clone, Debug)]
pub struct SshResource<R: CommandRunner = ProcessCommandRunner> {
    name: String,
    id: String,
    status: ResourceStatus,
    connection: SshSessionConfig,
    session: Option<SshSession<R>>,
    runner: R,
}

impl<R: CommandRunner + Clone> SshResource<R> {
    /// Reconstructs an SSH resource from a persisted record.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] when `host` is missing or `port` is
    /// not a valid TCP port.
    pub fn from_config(config: &ResourceConfig, runner: R) -> Result<Self, ConfigurationError> {
        let name = config.require("name")?.to_owned();
        let host = config.require("host")?.to_owned();
        let user = config.get("user").unwrap_or("root").to_owned();

        let mut connection = SshSessionConfig::for_host(user, host);
        if let Some(port) = config.get("port") {
            connection.port =
                port.parse()
                    .map_err(|_| ConfigurationError::InvalidField {
                        name: name.clone(),
                        field: String::from("port"),
                        message: format!("{port} is not a valid TCP port"),
                    })?;
        }
        if let Some(identity_file) = config.get("identity_file") {
            connection.identity_file = Some(identity_file.to_owned());
        }

        Ok(Self {
            name,
            id: config.id().unwrap_or_default().to_owned(),
            status: config
                .get("status")
                .map_or(ResourceStatus::NotCreated, ResourceStatus::parse),
            connection,
            session: None,
            runner,
        })
    }

    /// Returns the connection settings this resource will bind with.
    #[must_use]
    pub const fn connection(&self) -> &SshSessionConfig {
        &self.connection
    }
}

impl<R: CommandRunner + Clone> Resource for SshResource<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn type_tag(&self) -> &'static str {
        "ssh"
    }

    fn status(&self) -> ResourceStatus {
        self.status
    }

    fn create(&mut self) -> Result<ConfigFragment, ResourceError> {
        if self.id.is_empty() {
            self.id = Uuid::new_v4().to_string();
        }
        self.status = ResourceStatus::NotApplicable;
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
            self.session = Some(SshSession::with_runner(
                self.connection.clone(),
                self.runner.clone(),
            )?);
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), ResourceError> {
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ResourceError> {
        Ok(())
    }

    fn delete(&mut self) -> Result<(), ResourceError> {
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

    fn config_with(fields: &[(&str, &str)]) -> ResourceConfig {
        ResourceConfig::from_map(
            fields
                .iter()
                .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    #[test]
    fn from_config_requires_a_host() {
        let config = config_with(&[("name", "box"), ("type", "ssh")]);
        let err = SshResource::from_config(&config, ScriptedRunner::new())
            .expect_err("missing host should fail");
        assert!(matches!(
            err,
            ConfigurationError::MissingField { ref field, .. } if field == "host"
        ));
    }

    #[test]
    fn from_config_rejects_invalid_port() {
        let config = config_with(&[("name", "box"), ("host", "203.0.113.7"), ("port", "nope")]);
        let err = SshResource::from_config(&config, ScriptedRunner::new())
            .expect_err("bad port should fail");
        assert!(matches!(
            err,
            ConfigurationError::InvalidField { ref field, .. } if field == "port"
        ));
    }

    #[test]
    fn connect_binds_a_session_with_configured_settings() {
        let config = config_with(&[
            ("name", "box"),
            ("host", "203.0.113.7"),
            ("user", "ubuntu"),
            ("port", "2222"),
        ]);
        let mut resource =
            SshResource::from_config(&config, ScriptedRunner::new()).expect("valid config");
        resource.create().expect("create");
        resource.connect().expect("connect");

        assert_eq!(resource.connection().port, 2222);
        assert_eq!(resource.connection().user, "ubuntu");
        assert!(resource.session().is_ok());
    }
}
