//! Deployment configuration structures and validation.
//!
//! This module defines [`DeployConfig`] for SSH and artifact transfer
//! settings, along with associated error types. Configuration is loaded via
//! `ortho-config` which merges defaults, configuration files, and
//! environment variables.

use std::net::IpAddr;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::exec::ExecError;

use super::types::RemoteTarget;

/// Default remote directory receiving deployment artifacts.
pub const DEFAULT_REMOTE_PATH: &str = "/home/deploy/app";

/// Default remote command template; placeholders are filled from
/// [`super::DeployInputs`] with shell escaping.
pub const DEFAULT_COMMAND_TEMPLATE: &str =
    "./deploy.sh {image} {registry_username} {registry_password}";

const DEFAULT_SSH_PORT: u16 = 22;

/// Deployment and SSH settings loaded via `ortho-config`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "ZHURAVEL_DEPLOY",
    discovery(
        app_name = "zhuravel",
        env_var = "ZHURAVEL_CONFIG_PATH",
        config_file_name = "zhuravel.toml",
        dotfile_name = ".zhuravel.toml",
        project_file_name = "zhuravel.toml"
    )
)]
pub struct DeployConfig {
    /// Path to the `scp` executable.
    #[ortho_config(default = "scp".to_owned())]
    pub scp_bin: String,
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Remote login account on the target host.
    #[ortho_config(default = "deploy".to_owned())]
    pub ssh_user: String,
    /// SSH port on the target host. Defaults to 22 when unset.
    pub ssh_port: Option<u16>,
    /// Fixed remote directory receiving artifacts and hosting the remote
    /// command.
    #[ortho_config(default = DEFAULT_REMOTE_PATH.to_owned())]
    pub remote_path: String,
    /// Whether to force batch mode for SSH to avoid password prompts.
    #[ortho_config(default = true)]
    pub ssh_batch_mode: bool,
    /// Whether to enforce host key checking; defaults to disabling to
    /// smooth freshly provisioned hosts.
    #[ortho_config(default = false)]
    pub ssh_strict_host_key_checking: bool,
    /// Known hosts file override; defaults to `/dev/null` for fresh hosts.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub ssh_known_hosts_file: String,
    /// Path to the SSH private key for remote authentication. Supports
    /// tilde expansion (`~/.ssh/id_ed25519`). Optional; when not provided,
    /// SSH falls back to default key locations.
    pub ssh_identity_file: Option<String>,
    /// Remote command template run after artifact transfer.
    #[ortho_config(default = DEFAULT_COMMAND_TEMPLATE.to_owned())]
    pub command_template: String,
}

/// Errors raised when loading the deploy configuration from layered
/// sources.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum DeployConfigLoadError {
    /// Indicates that parsing or merging configuration layers failed.
    #[error("deploy configuration parsing failed: {0}")]
    Parse(String),
}

impl DeployConfig {
    /// Ensures configuration values are present after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::InvalidConfig`] when any required field is
    /// empty.
    pub fn validate(&self) -> Result<(), DeployError> {
        Self::require_value(&self.scp_bin, "scp_bin")?;
        Self::require_value(&self.ssh_bin, "ssh_bin")?;
        Self::require_value(&self.ssh_user, "ssh_user")?;
        Self::require_value(&self.remote_path, "remote_path")?;
        Self::require_value(&self.command_template, "command_template")?;
        Self::require_optional_value(self.ssh_identity_file.as_deref(), "ssh_identity_file")?;
        Ok(())
    }

    /// Loads configuration using defaults, configuration files, and
    /// environment variables, without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`DeployConfigLoadError::Parse`] when merging sources
    /// fails.
    pub fn load_without_cli_args() -> Result<Self, DeployConfigLoadError> {
        Self::load_from_iter([std::ffi::OsString::from("zhuravel")])
            .map_err(|err| DeployConfigLoadError::Parse(err.to_string()))
    }

    /// Loads configuration using the default argument iterator.
    ///
    /// # Errors
    ///
    /// Returns [`DeployConfigLoadError::Parse`] when merging sources
    /// fails.
    pub fn load_from_sources() -> Result<Self, DeployConfigLoadError> {
        Self::load().map_err(|err| DeployConfigLoadError::Parse(err.to_string()))
    }

    /// SSH port to connect to, applying the default.
    #[must_use]
    pub fn effective_ssh_port(&self) -> u16 {
        self.ssh_port.unwrap_or(DEFAULT_SSH_PORT)
    }

    /// Builds the remote target for an extracted host address.
    #[must_use]
    pub fn remote_target(&self, address: IpAddr) -> RemoteTarget {
        RemoteTarget {
            address,
            ssh_port: self.effective_ssh_port(),
        }
    }

    fn require_value(value: &str, field: &str) -> Result<(), DeployError> {
        Self::require_optional_value(Some(value), field)
    }

    fn require_optional_value(value: Option<&str>, field: &str) -> Result<(), DeployError> {
        match value {
            // Not configured; SSH uses defaults.
            None => Ok(()),
            Some(v) if !v.trim().is_empty() => Ok(()),
            Some(_) => Err(DeployError::InvalidConfig {
                field: field.to_owned(),
            }),
        }
    }
}

/// Errors surfaced while transferring artifacts or executing remotely.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DeployError {
    /// Raised when configuration is missing required values.
    #[error("missing {field}: set ZHURAVEL_DEPLOY_{env_suffix} or add {field} to [deploy] in zhuravel.toml", env_suffix = field.to_uppercase())]
    InvalidConfig {
        /// Configuration field that failed validation.
        field: String,
    },
    /// Raised when a local artifact path does not exist or is not a file.
    #[error("artifact {path} does not exist")]
    MissingArtifact {
        /// Path that was not found locally.
        path: String,
    },
    /// Raised when copying an artifact to the target fails. Transfer
    /// failures abort the deployment before any remote execution.
    #[error("failed to transfer {artifact}: scp exited with {status_text}: {stderr}")]
    Transfer {
        /// Artifact whose transfer failed.
        artifact: String,
        /// Exit status reported by scp.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from scp.
        stderr: String,
    },
    /// Raised when a storage mount command cannot be executed.
    #[error("failed to mount {target}: ssh exited with {status_text}: {stderr}")]
    Mount {
        /// Mount point whose command failed.
        target: String,
        /// Exit status reported by ssh.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from ssh.
        stderr: String,
    },
    /// Raised when the remote command exits non-zero.
    #[error("remote command exited with {status_text}: {stderr}")]
    RemoteCommand {
        /// Exit status reported by the remote command.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the remote command.
        stderr: String,
    },
    /// Raised when the command template references an unknown placeholder.
    #[error("invalid command template: {message}")]
    Template {
        /// Description of the template problem.
        message: String,
    },
    /// Raised when spawning scp or ssh fails.
    #[error(transparent)]
    Exec(#[from] ExecError),
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;

    fn valid_config() -> DeployConfig {
        DeployConfig {
            scp_bin: String::from("scp"),
            ssh_bin: String::from("ssh"),
            ssh_user: String::from("deploy"),
            ssh_port: None,
            remote_path: String::from("/home/deploy/app"),
            ssh_batch_mode: true,
            ssh_strict_host_key_checking: false,
            ssh_known_hosts_file: String::from("/dev/null"),
            ssh_identity_file: None,
            command_template: String::from(DEFAULT_COMMAND_TEMPLATE),
        }
    }

    #[test]
    fn valid_config_passes_validation() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn blank_identity_file_is_rejected() {
        let config = DeployConfig {
            ssh_identity_file: Some(String::from("  ")),
            ..valid_config()
        };

        let err = config.validate().expect_err("blank identity file should fail");
        assert_eq!(
            err,
            DeployError::InvalidConfig {
                field: String::from("ssh_identity_file"),
            }
        );
    }

    #[test]
    fn remote_target_applies_default_port() {
        let target = valid_config().remote_target(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7)));
        assert_eq!(target.ssh_port, 22);
    }

    #[test]
    fn remote_target_honours_configured_port() {
        let config = DeployConfig {
            ssh_port: Some(2222),
            ..valid_config()
        };
        let target = config.remote_target(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7)));
        assert_eq!(target.ssh_port, 2222);
    }
}
