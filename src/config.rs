//! Configuration loading via `ortho-config`.
//!
//! One [`DroverConfig`] is loaded at process start and passed into
//! constructors; there is no ambient global configuration state.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Process-wide settings derived from configuration files, environment
/// variables, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "DROVER",
    discovery(
        app_name = "drover",
        env_var = "DROVER_CONFIG_PATH",
        config_file_name = "drover.toml",
        dotfile_name = ".drover.toml",
        project_file_name = "drover.toml"
    )
)]
pub struct DroverConfig {
    /// Seconds between submission-status polls while following a job.
    #[ortho_config(default = 2)]
    pub poll_interval_secs: u64,
    /// Upper bound in seconds for the poll backoff applied after
    /// transient scheduler failures.
    #[ortho_config(default = 60)]
    pub poll_backoff_cap_secs: u64,
    /// Batch scheduler submission command.
    #[ortho_config(default = "sbatch".to_owned())]
    pub batch_submit_bin: String,
    /// Batch scheduler queue-status command.
    #[ortho_config(default = "squeue".to_owned())]
    pub batch_queue_bin: String,
    /// Batch scheduler cancellation command.
    #[ortho_config(default = "scancel".to_owned())]
    pub batch_cancel_bin: String,
    /// Dataset-versioning CLI used by the pair staging strategy.
    #[ortho_config(default = "datalad".to_owned())]
    pub tracker_bin: String,
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or zero.
    #[error("invalid configuration field: {0}")]
    InvalidField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl DroverConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    /// Values still merge defaults, configuration files, and environment
    /// variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("drover")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] when a field is empty or
    /// zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidField(String::from(
                "poll_interval_secs must be non-zero",
            )));
        }
        for (value, field) in [
            (&self.batch_submit_bin, "batch_submit_bin"),
            (&self.batch_queue_bin, "batch_queue_bin"),
            (&self.batch_cancel_bin, "batch_cancel_bin"),
            (&self.tracker_bin, "tracker_bin"),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidField(format!("{field} must be set")));
            }
        }
        Ok(())
    }

    /// Returns the poll interval as a duration.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Returns the poll backoff cap as a duration.
    #[must_use]
    pub const fn poll_backoff_cap(&self) -> Duration {
        Duration::from_secs(self.poll_backoff_cap_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> DroverConfig {
        DroverConfig {
            poll_interval_secs: 2,
            poll_backoff_cap_secs: 60,
            batch_submit_bin: String::from("sbatch"),
            batch_queue_bin: String::from("squeue"),
            batch_cancel_bin: String::from("scancel"),
            tracker_bin: String::from("datalad"),
        }
    }

    #[test]
    fn validate_accepts_defaults() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_poll_interval() {
        let config = DroverConfig {
            poll_interval_secs: 0,
            ..base_config()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidField(_))
        ));
    }

    #[test]
    fn validate_rejects_blank_scheduler_binaries() {
        let config = DroverConfig {
            batch_queue_bin: String::from("  "),
            ..base_config()
        };
        let Err(ConfigError::InvalidField(message)) = config.validate() else {
            panic!("blank queue binary should fail validation");
        };
        assert!(message.contains("batch_queue_bin"));
    }
}
