//! Artifact transfer and remote execution against a provisioned host.
//!
//! The deployer copies a small set of local artifacts to a fixed remote
//! path over `scp`, optionally applies storage mounts, and executes one
//! templated remote command over `ssh`, preserving the remote exit code.

use std::env;
use std::ffi::OsString;

use camino::Utf8PathBuf;
use shell_escape::unix::escape;

use crate::exec::{CommandOutput, CommandRunner, EnvBinding, ProcessCommandRunner};

mod command;
mod config;
mod types;

pub use command::RemoteCommandTemplate;
pub use config::{
    DEFAULT_COMMAND_TEMPLATE, DEFAULT_REMOTE_PATH, DeployConfig, DeployConfigLoadError,
    DeployError,
};
pub use types::{DeployInputs, RemoteCommandOutput, RemoteTarget, StorageMount};

/// Orchestrates artifact transfer plus remote execution.
#[derive(Clone, Debug)]
pub struct Deployer<R: CommandRunner> {
    config: DeployConfig,
    runner: R,
    stage_env: Vec<EnvBinding>,
}

impl Deployer<ProcessCommandRunner> {
    /// Convenience constructor that wires the real process runner.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::InvalidConfig`] when validation fails.
    pub fn with_process_runner(config: DeployConfig) -> Result<Self, DeployError> {
        Self::new(config, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> Deployer<R> {
    /// Creates a new deployer using the provided runner and configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::InvalidConfig`] when configuration validation
    /// fails.
    pub fn new(config: DeployConfig, runner: R) -> Result<Self, DeployError> {
        config.validate()?;
        Ok(Self {
            config,
            runner,
            stage_env: Vec::new(),
        })
    }

    /// Sets stage-scoped environment bindings applied to every spawned
    /// command.
    #[must_use]
    pub fn with_env(mut self, env: Vec<EnvBinding>) -> Self {
        self.stage_env = env;
        self
    }

    /// Returns a reference to the underlying configuration.
    #[must_use]
    pub const fn config(&self) -> &DeployConfig {
        &self.config
    }

    /// Copies each artifact to the fixed remote path.
    ///
    /// All artifact paths are checked locally before the first transfer;
    /// a missing artifact or a failed transfer aborts before any remote
    /// execution of the deployment command.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::MissingArtifact`] for a non-file path and
    /// [`DeployError::Transfer`] when `scp` exits non-zero.
    pub fn push_artifacts(
        &self,
        target: &RemoteTarget,
        artifacts: &[Utf8PathBuf],
    ) -> Result<(), DeployError> {
        for artifact in artifacts {
            if !artifact.is_file() {
                return Err(DeployError::MissingArtifact {
                    path: artifact.to_string(),
                });
            }
        }

        self.ensure_remote_path(target)?;

        for artifact in artifacts {
            let args = self.build_scp_args(target, artifact);
            let output = self.run(&self.config.scp_bin, &args)?;
            if !output.is_success() {
                return Err(DeployError::Transfer {
                    artifact: artifact.to_string(),
                    status: output.code,
                    status_text: status_text(output.code),
                    stderr: output.stderr,
                });
            }
            tracing::debug!(artifact = %artifact, "artifact transferred");
        }
        Ok(())
    }

    /// Applies storage mounts sequentially, in the given order.
    ///
    /// Each mount command is idempotent: it creates the mount point and
    /// attempts the mount, tolerating an already-mounted target. Only SSH
    /// execution failures are surfaced as errors.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::Mount`] when the SSH invocation itself
    /// fails.
    pub fn mount_storage(
        &self,
        target: &RemoteTarget,
        mounts: &[StorageMount],
    ) -> Result<(), DeployError> {
        for mount in mounts {
            let escaped_target = escape(mount.target.as_str().into());
            let escaped_source = escape(mount.source.as_str().into());
            let mount_command = format!(
                concat!(
                    "sudo mkdir -p {target} && ",
                    "sudo mount {source} {target} 2>/dev/null || true"
                ),
                source = escaped_source,
                target = escaped_target
            );

            let output = self.execute_ssh(target, &mount_command)?;
            if !matches!(output.exit_code, Some(0)) {
                return Err(DeployError::Mount {
                    target: mount.target.clone(),
                    status: output.exit_code,
                    status_text: status_text(output.exit_code),
                    stderr: output.stderr,
                });
            }
            tracing::info!(source = %mount.source, target = %mount.target, "storage mounted");
        }
        Ok(())
    }

    /// Executes `remote_command` in the remote path and returns the remote
    /// exit code.
    ///
    /// # Errors
    ///
    /// Propagates any failure to spawn the SSH command from the configured
    /// [`CommandRunner`].
    ///
    /// # Security
    ///
    /// `remote_command` is passed verbatim after the working directory
    /// prefix; callers must ensure any untrusted input is escaped before
    /// invoking this method.
    pub fn run_remote(
        &self,
        target: &RemoteTarget,
        remote_command: &str,
    ) -> Result<RemoteCommandOutput, DeployError> {
        let prefixed = format!(
            "cd {} && {remote_command}",
            escape(self.config.remote_path.as_str().into())
        );
        self.execute_ssh(target, &prefixed)
    }

    /// Full deployment: push artifacts, render the command template, and
    /// execute it remotely.
    ///
    /// # Errors
    ///
    /// Returns any transfer or template error, and
    /// [`DeployError::RemoteCommand`] when the remote command exits
    /// non-zero.
    pub fn deploy(
        &self,
        target: &RemoteTarget,
        artifacts: &[Utf8PathBuf],
        template: &RemoteCommandTemplate,
        inputs: &DeployInputs,
    ) -> Result<RemoteCommandOutput, DeployError> {
        self.push_artifacts(target, artifacts)?;
        let rendered = template.render(inputs)?;
        let output = self.run_remote(target, &rendered)?;
        if !matches!(output.exit_code, Some(0)) {
            return Err(DeployError::RemoteCommand {
                status: output.exit_code,
                status_text: status_text(output.exit_code),
                stderr: output.stderr,
            });
        }
        tracing::info!(image = %inputs.image, "deployment command succeeded");
        Ok(output)
    }

    fn ensure_remote_path(&self, target: &RemoteTarget) -> Result<(), DeployError> {
        let command = format!(
            "mkdir -p {}",
            escape(self.config.remote_path.as_str().into())
        );
        let output = self.execute_ssh(target, &command)?;
        if matches!(output.exit_code, Some(0)) {
            Ok(())
        } else {
            Err(DeployError::Transfer {
                artifact: self.config.remote_path.clone(),
                status: output.exit_code,
                status_text: status_text(output.exit_code),
                stderr: output.stderr,
            })
        }
    }

    fn execute_ssh(
        &self,
        target: &RemoteTarget,
        command: &str,
    ) -> Result<RemoteCommandOutput, DeployError> {
        let args = self.build_ssh_args(target, command);
        let output = self.run(&self.config.ssh_bin, &args)?;

        Ok(RemoteCommandOutput {
            exit_code: output.code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, DeployError> {
        Ok(self.runner.run(program, args, &self.stage_env)?)
    }

    fn build_ssh_args(&self, target: &RemoteTarget, remote_command: &str) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("-p"),
            OsString::from(target.ssh_port.to_string()),
        ];
        args.extend(self.common_ssh_options());
        args.push(OsString::from(format!(
            "{}@{}",
            self.config.ssh_user, target.address
        )));
        args.push(OsString::from(remote_command));
        args
    }

    fn build_scp_args(&self, target: &RemoteTarget, artifact: &Utf8PathBuf) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("-P"),
            OsString::from(target.ssh_port.to_string()),
        ];
        args.extend(self.common_ssh_options());
        args.push(OsString::from(artifact.as_str()));
        args.push(OsString::from(format!(
            "{}@{}:{}/",
            self.config.ssh_user, target.address, self.config.remote_path
        )));
        args
    }

    fn common_ssh_options(&self) -> Vec<OsString> {
        let mut args = Vec::new();

        if let Some(ref identity_file) = self.config.ssh_identity_file {
            let expanded = expand_tilde(identity_file);
            args.push(OsString::from("-i"));
            args.push(OsString::from(expanded));
        }

        if self.config.ssh_batch_mode {
            args.push(OsString::from("-o"));
            args.push(OsString::from("BatchMode=yes"));
        }

        if !self.config.ssh_strict_host_key_checking {
            args.push(OsString::from("-o"));
            args.push(OsString::from("StrictHostKeyChecking=no"));
        }

        if !self.config.ssh_known_hosts_file.trim().is_empty() {
            args.push(OsString::from("-o"));
            args.push(OsString::from(format!(
                "UserKnownHostsFile={}",
                self.config.ssh_known_hosts_file
            )));
        }

        args
    }
}

/// Expands a leading `~/` to the current home directory.
fn expand_tilde(path: &str) -> String {
    path.strip_prefix("~/").map_or_else(
        || path.to_owned(),
        |rest| {
            env::var("HOME").map_or_else(|_| path.to_owned(), |home| format!("{home}/{rest}"))
        },
    )
}

fn status_text(code: Option<i32>) -> String {
    code.map_or_else(|| String::from("unknown"), |value| value.to_string())
}

#[cfg(test)]
mod tests;
