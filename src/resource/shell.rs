//! Resource variant for the local machine.

use uuid::Uuid;

use crate::session::{CommandRunner, ProcessCommandRunner, Session, ShellSession};

use super::{ConfigFragment, Resource, ResourceConfig, ResourceError, ResourceStatus};

/// The machine this process runs on, addressed as a resource.
///
/// There is nothing to provision or tear down, so `create()` only assigns
/// an identity and `start()`/`stop()` are documented no-ops.
#[derive(Clone, Debug)]
pub struct ShellResource<R: CommandRunner = ProcessCommandRunner> {
    name: String,
    id: String,
    status: ResourceStatus,
    session: Option<ShellSession<R>>,
    runner: R,
}

impl ShellResource<ProcessCommandRunner> {
    /// Creates a local-shell resource with the given name.
    #[must_use]
    pub const fn new(name: String) -> Self {
        Self {
            name,
            id: String::new(),
            status: ResourceStatus::NotCreated,
            session: None,
            runner: ProcessCommandRunner,
        }
    }
}

impl<R: CommandRunner + Clone> ShellResource<R> {
    /// Reconstructs a local-shell resource from a persisted record.
    #[must_use]
    pub fn from_config(config: &ResourceConfig, runner: R) -> Self {
        Self {
            name: config.name().unwrap_or("localhost").to_owned(),
            id: config.id().unwrap_or_default().to_owned(),
            status: config
                .get("status")
                .map_or(ResourceStatus::NotCreated, ResourceStatus::parse),
            session: None,
            runner,
        }
    }
}

impl<R: CommandRunner + Clone> Resource for ShellResource<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn type_tag(&self) -> &'static str {
        "shell"
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
            self.session = Some(ShellSession::with_runner(self.runner.clone()));
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
    use super::*;

    #[test]
    fn create_assigns_a_stable_identity() {
        let mut resource = ShellResource::new(String::from("localhost"));
        assert!(resource.id().is_empty());

        let fragment = resource.create().expect("create");
        assert!(!resource.id().is_empty());
        assert_eq!(fragment.get("id"), Some(&resource.id().to_owned()));

        let first_id = resource.id().to_owned();
        resource.create().expect("create again");
        assert_eq!(resource.id(), first_id);
    }

    #[test]
    fn session_errors_distinguish_deleted_from_never_connected() {
        let mut resource = ShellResource::new(String::from("localhost"));
        resource.create().expect("create");

        let not_connected = resource
            .session()
            .err()
            .expect("no session before connect");
        assert!(matches!(not_connected, ResourceError::NotConnected { .. }));

        resource.connect().expect("connect");
        assert!(resource.session().is_ok());

        resource.delete().expect("delete");
        let deleted = resource.session().err().expect("no session after delete");
        assert!(matches!(deleted, ResourceError::Deleted { .. }));
    }

    #[test]
    fn connect_is_idempotent() {
        let mut resource = ShellResource::new(String::from("localhost"));
        resource.create().expect("create");
        resource.connect().expect("first connect");
        resource.connect().expect("second connect");
        assert!(resource.session().is_ok());
    }
}
