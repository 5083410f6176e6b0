//! Core deployment types.

use std::net::IpAddr;

use crate::credentials::Secret;

/// Connection details for the deployment target host.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RemoteTarget {
    /// Public address of the host.
    pub address: IpAddr,
    /// TCP port for SSH.
    pub ssh_port: u16,
}

/// Captured result of one remote command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteCommandOutput {
    /// Exit code reported by the remote command, if available.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

/// One storage mount applied on the target before artifacts land.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StorageMount {
    /// Mount source (device path or network share specification).
    pub source: String,
    /// Mount point on the target host.
    pub target: String,
}

impl StorageMount {
    /// Parses a `SOURCE:TARGET` argument.
    ///
    /// The split is on the last `:` so network share sources such as
    /// `fileserver:/export` keep their own separator.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let (source, target) = raw.rsplit_once(':')?;
        if source.trim().is_empty() || target.trim().is_empty() {
            return None;
        }
        Some(Self {
            source: source.trim().to_owned(),
            target: target.trim().to_owned(),
        })
    }
}

/// Runtime values substituted into the remote command template.
#[derive(Clone, Debug)]
pub struct DeployInputs {
    /// Container image reference to roll out.
    pub image: String,
    /// Registry login account.
    pub registry_username: String,
    /// Registry password, redacted everywhere but the rendered command.
    pub registry_password: Secret,
}
