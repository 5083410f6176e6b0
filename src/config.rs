//! Provider configuration loading via `ortho-config`.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::lock::{DEFAULT_LEASE_STALE_AFTER, LeaseOptions};
use crate::state::StateStore;

/// Provider and environment settings derived from environment variables,
/// configuration files, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "ZHURAVEL")]
pub struct ProviderConfig {
    /// Path to the provider CLI binary driven for resource operations.
    #[ortho_config(default = "cloudctl".to_owned())]
    pub provider_bin: String,
    /// Project identifier used for billing and resource scoping. Required.
    pub project_id: String,
    /// Target availability zone.
    #[ortho_config(default = "eu-central-1".to_owned())]
    pub zone: String,
    /// Environment name keying the state record and lease.
    #[ortho_config(default = "default".to_owned())]
    pub environment: String,
    /// Directory holding state and lease files.
    #[ortho_config(default = ".zhuravel".to_owned())]
    pub state_dir: String,
    /// Opaque credential identifier resolved through the credential store
    /// and handed to the provider CLI. Optional when the CLI authenticates
    /// by other means.
    pub credential_id: Option<String>,
    /// Environment variable name the provider CLI reads its token from.
    #[ortho_config(default = "CLOUD_TOKEN".to_owned())]
    pub credential_env: String,
    /// Seconds after which an abandoned lease may be broken. Defaults to
    /// one hour when unset.
    pub lease_stale_secs: Option<u64>,
}

/// Metadata for a configuration field, used to generate actionable error
/// messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }
}

impl ProviderConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to [{}] in zhuravel.toml",
                metadata.description, metadata.env_var, metadata.toml_key, metadata.section
            )));
        }
        Ok(())
    }

    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags
    /// in that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge
    /// sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("zhuravel")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is
    /// empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.provider_bin,
            &FieldMetadata::new(
                "provider CLI binary",
                "ZHURAVEL_PROVIDER_BIN",
                "provider_bin",
                "provider",
            ),
        )?;
        Self::require_field(
            &self.project_id,
            &FieldMetadata::new(
                "project ID",
                "ZHURAVEL_PROJECT_ID",
                "project_id",
                "provider",
            ),
        )?;
        Self::require_field(
            &self.zone,
            &FieldMetadata::new("availability zone", "ZHURAVEL_ZONE", "zone", "provider"),
        )?;
        Self::require_field(
            &self.environment,
            &FieldMetadata::new(
                "environment name",
                "ZHURAVEL_ENVIRONMENT",
                "environment",
                "provider",
            ),
        )?;
        Self::require_field(
            &self.state_dir,
            &FieldMetadata::new(
                "state directory",
                "ZHURAVEL_STATE_DIR",
                "state_dir",
                "provider",
            ),
        )?;
        Ok(())
    }

    /// Builds the state store for this configuration's environment.
    #[must_use]
    pub fn state_store(&self) -> StateStore {
        StateStore::new(self.state_dir.clone(), self.environment.clone())
    }

    /// Builds lease options, honouring the configured staleness bound.
    #[must_use]
    pub fn lease_options(&self, force: bool) -> LeaseOptions {
        LeaseOptions {
            force,
            stale_after: self
                .lease_stale_secs
                .map_or(DEFAULT_LEASE_STALE_AFTER, Duration::from_secs),
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> ProviderConfig {
        ProviderConfig {
            provider_bin: String::from("cloudctl"),
            project_id: String::from("11111111-2222-3333-4444-555555555555"),
            zone: String::from("eu-central-1"),
            environment: String::from("staging"),
            state_dir: String::from(".zhuravel"),
            credential_id: None,
            credential_env: String::from("CLOUD_TOKEN"),
            lease_stale_secs: None,
        }
    }

    #[test]
    fn valid_config_passes_validation() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn missing_project_id_is_rejected_with_guidance() {
        let config = ProviderConfig {
            project_id: String::from("  "),
            ..valid_config()
        };

        let err = config.validate().expect_err("blank project id should fail");
        let ConfigError::MissingField(message) = err else {
            panic!("expected MissingField");
        };
        assert!(message.contains("ZHURAVEL_PROJECT_ID"), "message: {message}");
    }

    #[test]
    fn lease_options_honour_configured_staleness() {
        let config = ProviderConfig {
            lease_stale_secs: Some(120),
            ..valid_config()
        };

        let options = config.lease_options(true);
        assert!(options.force);
        assert_eq!(options.stale_after, Duration::from_secs(120));
    }

    #[test]
    fn lease_options_default_to_one_hour() {
        let options = valid_config().lease_options(false);
        assert_eq!(options.stale_after, DEFAULT_LEASE_STALE_AFTER);
    }
}
