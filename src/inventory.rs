//! Persistent inventory of known resources.
//!
//! The inventory is a mapping of resource name to its configuration
//! record. The core treats it as an opaque key-value store behind the
//! [`InventoryStore`] trait; the provided [`TomlInventoryStore`] persists
//! it as a TOML document located through `OrthoConfig`'s discovery search
//! order.

use std::collections::BTreeMap;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use ortho_config::{ConfigDiscovery, toml};
use thiserror::Error;

use crate::resource::ResourceConfig;

const APP_NAME: &str = "drover";
const INVENTORY_ENV_VAR: &str = "DROVER_INVENTORY_PATH";
const INVENTORY_FILE_NAME: &str = "drover-inventory.toml";
const INVENTORY_DOTFILE_NAME: &str = ".drover-inventory.toml";

/// Mapping of resource name to its configuration record.
pub type Inventory = BTreeMap<String, ResourceConfig>;

/// Errors raised while reading or writing the inventory.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// Raised when no inventory file candidates are available.
    #[error("no inventory file candidates were discovered")]
    NoCandidates,
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when parsing existing TOML content fails.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when existing TOML has an unexpected structure.
    #[error("invalid inventory in {path}: {message}")]
    InvalidStructure {
        /// Path that had invalid content.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
}

/// Abstraction over inventory persistence for dependency injection.
pub trait InventoryStore {
    /// Reads the full inventory, returning an empty mapping when nothing
    /// has been persisted yet.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError`] when the backing store cannot be read or
    /// parsed.
    fn get_inventory(&self) -> Result<Inventory, InventoryError>;

    /// Replaces the persisted inventory with `inventory`.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError`] when the backing store cannot be
    /// written.
    fn set_inventory(&self, inventory: &Inventory) -> Result<(), InventoryError>;
}

/// Persists the inventory as TOML using `OrthoConfig`'s discovery search
/// order.
#[derive(Clone, Debug)]
pub struct TomlInventoryStore {
    discovery: ConfigDiscovery,
}

impl TomlInventoryStore {
    /// Builds a store using the standard discovery settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            discovery: ConfigDiscovery::builder(APP_NAME)
                .env_var(INVENTORY_ENV_VAR)
                .config_file_name(INVENTORY_FILE_NAME)
                .dotfile_name(INVENTORY_DOTFILE_NAME)
                .project_file_name(INVENTORY_FILE_NAME)
                .build(),
        }
    }

    /// Builds a store using an explicit discovery configuration.
    #[must_use]
    pub const fn with_discovery(discovery: ConfigDiscovery) -> Self {
        Self { discovery }
    }

    fn resolve_target(&self) -> Result<InventoryTarget, InventoryError> {
        let candidates = self.discovery.utf8_candidates();
        if candidates.is_empty() {
            return Err(InventoryError::NoCandidates);
        }

        for candidate in &candidates {
            if path_exists(candidate)? {
                return Ok(InventoryTarget {
                    path: candidate.clone(),
                    exists: true,
                });
            }
        }

        let fallback = candidates
            .last()
            .cloned()
            .ok_or(InventoryError::NoCandidates)?;
        Ok(InventoryTarget {
            path: fallback,
            exists: false,
        })
    }
}

impl Default for TomlInventoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InventoryStore for TomlInventoryStore {
    fn get_inventory(&self) -> Result<Inventory, InventoryError> {
        let target = self.resolve_target()?;
        if !target.exists {
            return Ok(Inventory::new());
        }

        let contents = read_document(&target.path)?;
        let value = parse_toml(&target.path, &contents)?;
        inventory_from_value(&target.path, &value)
    }

    fn set_inventory(&self, inventory: &Inventory) -> Result<(), InventoryError> {
        let target = self.resolve_target()?;
        let value = inventory_to_value(inventory);
        write_document(&target.path, &value)
    }
}

#[derive(Clone, Debug)]
struct InventoryTarget {
    path: Utf8PathBuf,
    exists: bool,
}

fn split_dir_and_file(path: &Utf8Path) -> Result<(&Utf8Path, &str), InventoryError> {
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| InventoryError::InvalidStructure {
            path: path.to_path_buf(),
            message: String::from("inventory file path is missing a filename"),
        })?;
    Ok((parent, file_name))
}

fn path_exists(path: &Utf8Path) -> Result<bool, InventoryError> {
    let (parent, file_name) = split_dir_and_file(path)?;
    match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir.try_exists(file_name).map_err(|err| InventoryError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(InventoryError::Io {
            path: parent.to_path_buf(),
            message: err.to_string(),
        }),
    }
}

fn read_document(path: &Utf8Path) -> Result<String, InventoryError> {
    let (parent, file_name) = split_dir_and_file(path)?;
    let dir =
        Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| InventoryError::Io {
            path: parent.to_path_buf(),
            message: err.to_string(),
        })?;

    dir.read_to_string(file_name).map_err(|err| InventoryError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

fn write_document(path: &Utf8Path, value: &toml::Value) -> Result<(), InventoryError> {
    let (parent, file_name) = split_dir_and_file(path)?;
    Dir::create_ambient_dir_all(parent, ambient_authority()).map_err(|err| InventoryError::Io {
        path: parent.to_path_buf(),
        message: err.to_string(),
    })?;

    let dir =
        Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| InventoryError::Io {
            path: parent.to_path_buf(),
            message: err.to_string(),
        })?;

    let rendered = toml::to_string_pretty(value).map_err(|err| InventoryError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;

    dir.write(file_name, rendered).map_err(|err| InventoryError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

fn parse_toml(path: &Utf8Path, contents: &str) -> Result<toml::Value, InventoryError> {
    if contents.trim().is_empty() {
        return Ok(toml::Value::Table(toml::value::Table::new()));
    }

    toml::from_str(contents).map_err(|err| InventoryError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

fn inventory_from_value(
    path: &Utf8Path,
    value: &toml::Value,
) -> Result<Inventory, InventoryError> {
    let table = value
        .as_table()
        .ok_or_else(|| InventoryError::InvalidStructure {
            path: path.to_path_buf(),
            message: String::from("inventory root is not a table"),
        })?;

    let mut inventory = Inventory::new();
    for (name, entry) in table {
        let entry_table = entry
            .as_table()
            .ok_or_else(|| InventoryError::InvalidStructure {
                path: path.to_path_buf(),
                message: format!("[{name}] must be a table"),
            })?;

        let mut fields = BTreeMap::new();
        for (key, raw) in entry_table {
            let field = raw
                .as_str()
                .ok_or_else(|| InventoryError::InvalidStructure {
                    path: path.to_path_buf(),
                    message: format!("{name}.{key} must be a string"),
                })?;
            fields.insert(key.clone(), field.to_owned());
        }
        inventory.insert(name.clone(), ResourceConfig::from_map(fields));
    }
    Ok(inventory)
}

fn inventory_to_value(inventory: &Inventory) -> toml::Value {
    let mut root = toml::value::Table::new();
    for (name, config) in inventory {
        let mut entry = toml::value::Table::new();
        for (key, value) in config.as_map() {
            entry.insert(key.clone(), toml::Value::String(value.clone()));
        }
        root.insert(name.clone(), toml::Value::Table(entry));
    }
    toml::Value::Table(root)
}
