//! Addressable execution targets and their lifecycle.
//!
//! A [`Resource`] is something a job can run on: this machine, a remote
//! host, or a container. Each resource owns create/connect/start/stop/
//! delete transitions and lazily binds a [`Session`] once connected. The
//! [`ResourceManager`] reconstructs resources from persisted configuration
//! records.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::session::{Session, SessionError};

mod container;
mod manager;
mod shell;
mod ssh;

pub use container::ContainerResource;
pub use manager::{DeleteRequest, ManagerError, ResourceManager};
pub use shell::ShellResource;
pub use ssh::SshResource;

/// Configuration fragment returned by [`Resource::create`], to be merged
/// back into the persisted record by the caller.
pub type ConfigFragment = BTreeMap<String, String>;

/// Lifecycle state of a resource.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResourceStatus {
    /// The underlying target has not been provisioned yet.
    NotCreated,
    /// The target is up and accepting work.
    Running,
    /// The target exists but is paused.
    Stopped,
    /// The target has no running/paused notion.
    NotApplicable,
    /// The target has been torn down.
    Deleted,
}

impl ResourceStatus {
    /// Parses the persisted status string, defaulting to `NotCreated` for
    /// anything unrecognised.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "running" => Self::Running,
            "stopped" => Self::Stopped,
            "N/A" => Self::NotApplicable,
            "deleted" => Self::Deleted,
            _ => Self::NotCreated,
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = match self {
            Self::NotCreated => "not-created",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::NotApplicable => "N/A",
            Self::Deleted => "deleted",
        };
        formatter.write_str(rendered)
    }
}

/// Immutable configuration record for one resource, as loaded from the
/// inventory. The core treats it as a plain string mapping with typed
/// accessors over the declared fields.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ResourceConfig {
    fields: BTreeMap<String, String>,
}

impl ResourceConfig {
    /// Wraps a raw field mapping.
    #[must_use]
    pub const fn from_map(fields: BTreeMap<String, String>) -> Self {
        Self { fields }
    }

    /// Returns the raw field mapping.
    #[must_use]
    pub const fn as_map(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    /// Returns a field value, when present and non-empty.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .get(field)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    /// Returns the user-chosen resource name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.get("name")
    }

    /// Returns the variant tag selecting the session implementation.
    #[must_use]
    pub fn type_tag(&self) -> Option<&str> {
        self.get("type")
    }

    /// Returns the assigned resource identifier, when created.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.get("id")
    }

    /// Returns a required field or a descriptive configuration error.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::MissingField`] when the field is
    /// absent or empty.
    pub fn require(&self, field: &str) -> Result<&str, ConfigurationError> {
        self.get(field).ok_or_else(|| ConfigurationError::MissingField {
            name: self.name().unwrap_or("<unnamed>").to_owned(),
            field: field.to_owned(),
        })
    }

    /// Merges a configuration fragment returned by [`Resource::create`]
    /// into this record.
    pub fn merge(&mut self, fragment: &ConfigFragment) {
        for (key, value) in fragment {
            self.fields.insert(key.clone(), value.clone());
        }
    }
}

/// Errors raised when a resource configuration record is unusable.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigurationError {
    /// A required field is absent or empty.
    #[error("resource {name} is missing required field {field}")]
    MissingField {
        /// Resource the record describes.
        name: String,
        /// Field that is absent or empty.
        field: String,
    },
    /// A field is present but cannot be interpreted.
    #[error("resource {name} has invalid {field}: {message}")]
    InvalidField {
        /// Resource the record describes.
        name: String,
        /// Field that failed to parse.
        field: String,
        /// Why the value was rejected.
        message: String,
    },
    /// The `type` tag does not select a known resource variant.
    #[error("unknown resource type: {type_tag}")]
    UnknownType {
        /// The unrecognised tag.
        type_tag: String,
    },
    /// Neither the given name nor id matches an inventory entry.
    #[error("no resource found for {query}")]
    UnknownResource {
        /// The name or id that failed to resolve.
        query: String,
    },
}

/// Errors raised by resource lifecycle operations.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// The configuration record is unusable.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// Binding or validating the session failed.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// Provisioning the underlying target failed.
    #[error("failed to create resource {name}: {message}")]
    Create {
        /// Resource being provisioned.
        name: String,
        /// Underlying error message.
        message: String,
    },
    /// A start/stop/delete operation failed.
    #[error("failed to {operation} resource {name}: {message}")]
    Lifecycle {
        /// Operation that failed.
        operation: &'static str,
        /// Resource the operation targeted.
        name: String,
        /// Underlying error message.
        message: String,
    },
    /// A session was requested before `connect()` was called.
    #[error("resource {name} has no session: connect() has not been called")]
    NotConnected {
        /// Resource the session was requested from.
        name: String,
    },
    /// A session was requested after the resource was deleted.
    #[error("resource {name} has been deleted")]
    Deleted {
        /// Resource the session was requested from.
        name: String,
    },
}

/// One addressable execution target bound to exactly one session variant.
///
/// Identity (`id`) is assigned on creation and stays stable for the
/// resource's lifetime; the session is bound only once [`Resource::connect`]
/// runs and is never reconstructed implicitly.
pub trait Resource {
    /// Returns the user-chosen name, unique within the inventory.
    fn name(&self) -> &str;

    /// Returns the assigned identifier; empty until created.
    fn id(&self) -> &str;

    /// Returns the variant tag this resource was built from.
    fn type_tag(&self) -> &'static str;

    /// Returns the current lifecycle status.
    fn status(&self) -> ResourceStatus;

    /// Provisions the underlying target and returns the configuration
    /// fragment the caller must merge back into persisted configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::Create`] when provisioning fails.
    fn create(&mut self) -> Result<ConfigFragment, ResourceError>;

    /// Binds a session to an already-created resource. Idempotent: calling
    /// it on an already-connected resource is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError`] when the resource was deleted or the
    /// session cannot be configured.
    fn connect(&mut self) -> Result<(), ResourceError>;

    /// Starts the target where the backend supports it; otherwise a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::Lifecycle`] when the backend refuses.
    fn start(&mut self) -> Result<(), ResourceError>;

    /// Stops the target where the backend supports it; otherwise a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::Lifecycle`] when the backend refuses.
    fn stop(&mut self) -> Result<(), ResourceError>;

    /// Tears down the underlying target and clears the resource identity.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::Lifecycle`] when teardown fails.
    fn delete(&mut self) -> Result<(), ResourceError>;

    /// Returns the bound session.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::Deleted`] after deletion and
    /// [`ResourceError::NotConnected`] before the first `connect()`; the
    /// two are reported distinctly.
    fn session(&self) -> Result<&dyn Session, ResourceError>;
}
