//! Registry and factory for resources.
//!
//! The manager resolves a user-given name or id against the persisted
//! inventory and turns a configuration record into a live resource of the
//! right variant.

use thiserror::Error;

use crate::inventory::{Inventory, InventoryError, InventoryStore};
use crate::session::ProcessCommandRunner;

use super::{
    ConfigurationError, ContainerResource, Resource, ResourceConfig, ResourceError, ShellResource,
    SshResource,
};

/// Errors raised while resolving, constructing, or deleting resources.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// The inventory could not be read or written.
    #[error(transparent)]
    Inventory(#[from] InventoryError),
    /// The configuration record is unusable.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// A lifecycle operation on the resolved resource failed.
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

/// Details handed to the deletion confirmation callback.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeleteRequest {
    /// Name of the resource about to be deleted.
    pub name: String,
    /// Assigned identifier of the resource.
    pub id: String,
}

/// Maps stored configuration records to live resources and persists the
/// inventory of known resources.
#[derive(Clone, Debug)]
pub struct ResourceManager<S: InventoryStore> {
    store: S,
}

impl<S: InventoryStore> ResourceManager<S> {
    /// Creates a manager over the given inventory store.
    #[must_use]
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Constructs the resource variant selected by the record's `type` tag.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnknownType`] for an unrecognised tag
    /// and field-level errors from the selected variant.
    pub fn factory(config: &ResourceConfig) -> Result<Box<dyn Resource>, ConfigurationError> {
        let type_tag = config.require("type")?;
        match type_tag {
            "shell" => Ok(Box::new(ShellResource::from_config(
                config,
                ProcessCommandRunner,
            ))),
            "ssh" => Ok(Box::new(SshResource::from_config(
                config,
                ProcessCommandRunner,
            )?)),
            "container" => Ok(Box::new(ContainerResource::from_config(
                config,
                ProcessCommandRunner,
            )?)),
            other => Err(ConfigurationError::UnknownType {
                type_tag: other.to_owned(),
            }),
        }
    }

    /// Resolves a user-given name or id against the persisted inventory,
    /// returning the matching record together with the full inventory.
    ///
    /// Names match exactly; ids match exactly or by unique prefix.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnknownResource`] when neither is
    /// found, and [`InventoryError`] when the inventory cannot be read.
    pub fn get_resource_info(
        &self,
        name: Option<&str>,
        resource_id: Option<&str>,
    ) -> Result<(ResourceConfig, Inventory), ManagerError> {
        let inventory = self.store.get_inventory()?;

        if let Some(wanted) = name
            && let Some(config) = inventory.get(wanted)
        {
            return Ok((config.clone(), inventory));
        }

        if let Some(wanted) = resource_id {
            let mut matches = inventory
                .values()
                .filter(|config| {
                    config
                        .id()
                        .is_some_and(|id| id == wanted || id.starts_with(wanted))
                })
                .cloned();
            if let Some(config) = matches.next()
                && matches.next().is_none()
            {
                return Ok((config, inventory));
            }
        }

        let query = name
            .or(resource_id)
            .unwrap_or("<no name or id given>")
            .to_owned();
        Err(ManagerError::Configuration(
            ConfigurationError::UnknownResource { query },
        ))
    }

    /// Reads the persisted inventory.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError`] when the backing store cannot be read.
    pub fn get_inventory(&self) -> Result<Inventory, ManagerError> {
        Ok(self.store.get_inventory()?)
    }

    /// Replaces the persisted inventory.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError`] when the backing store cannot be
    /// written.
    pub fn set_inventory(&self, inventory: &Inventory) -> Result<(), ManagerError> {
        Ok(self.store.set_inventory(inventory)?)
    }

    /// Creates a resource from `config`, merges the returned fragment back
    /// into the record, and persists it under the resource's name.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError`] when construction, provisioning, or
    /// persistence fails.
    pub fn create_resource(&self, config: &ResourceConfig) -> Result<ResourceConfig, ManagerError> {
        let name = config.require("name")?.to_owned();
        let mut resource = Self::factory(config)?;
        let fragment = resource.create()?;

        let mut updated = config.clone();
        updated.merge(&fragment);

        let mut inventory = self.store.get_inventory()?;
        inventory.insert(name, updated.clone());
        self.store.set_inventory(&inventory)?;
        Ok(updated)
    }

    /// Deletes the resource resolved from `name`/`resource_id` after the
    /// caller-supplied confirmation returns `true`, then drops it from the
    /// persisted inventory. Returns whether deletion happened.
    ///
    /// Confirmation is a callback so interactive prompting stays out of
    /// the core.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError`] when resolution, teardown, or persistence
    /// fails.
    pub fn delete_resource(
        &self,
        name: Option<&str>,
        resource_id: Option<&str>,
        confirm: impl FnOnce(&DeleteRequest) -> bool,
    ) -> Result<bool, ManagerError> {
        let (config, mut inventory) = self.get_resource_info(name, resource_id)?;
        let mut resource = Self::factory(&config)?;
        resource.connect()?;

        let request = DeleteRequest {
            name: resource.name().to_owned(),
            id: resource.id().to_owned(),
        };
        if !confirm(&request) {
            return Ok(false);
        }

        resource.delete()?;
        tracing::info!(name = %request.name, "deleted resource");

        inventory.remove(&request.name);
        self.store.set_inventory(&inventory)?;
        Ok(true)
    }
}
