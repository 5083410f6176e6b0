//! Command-line interface definitions for the `zhuravel` binary.
//!
//! This module centralises the clap parser structures so both the main
//! binary and the build script can reuse them when generating the manual
//! page.

use clap::Parser;

/// Top-level CLI for the `zhuravel` binary.
#[derive(Debug, Parser)]
#[command(
    name = "zhuravel",
    about = "Converge declared infrastructure and deploy containers onto it over SSH",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Compute the action set without touching the provider.
    #[command(name = "plan", about = "Dry run: show the planned action set")]
    Plan(PlanCommand),
    /// Converge the manifest against the provider.
    #[command(name = "apply", about = "Converge declared resources")]
    Apply(ApplyCommand),
    /// Read one output value from the converged state.
    #[command(name = "output", about = "Print an output value")]
    Output(OutputCommand),
    /// Deploy artifacts to an explicit host address.
    #[command(name = "deploy", about = "Push artifacts and run the remote command")]
    Deploy(DeployCommand),
    /// Provision, await readiness, and deploy in one pipeline run.
    #[command(name = "run", about = "Full provision-then-deploy pipeline")]
    Run(RunCommand),
    /// Delete every converged resource in reverse order.
    #[command(name = "destroy", about = "Tear down converged resources")]
    Destroy(DestroyCommand),
}

/// Arguments shared by manifest-reading subcommands.
#[derive(Debug, Parser)]
pub(crate) struct ManifestArgs {
    /// Path to the resource manifest.
    #[arg(long, value_name = "PATH", default_value = "infra.toml")]
    pub(crate) manifest: String,
    /// Variable binding overriding a manifest default (repeatable).
    #[arg(long = "var", value_name = "NAME=VALUE")]
    pub(crate) vars: Vec<String>,
}

/// Arguments for the `zhuravel plan` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct PlanCommand {
    #[command(flatten)]
    pub(crate) manifest: ManifestArgs,
}

/// Arguments for the `zhuravel apply` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ApplyCommand {
    #[command(flatten)]
    pub(crate) manifest: ManifestArgs,
    /// Break a live environment lease held by another run.
    #[arg(long)]
    pub(crate) force: bool,
}

/// Arguments for the `zhuravel output` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct OutputCommand {
    #[command(flatten)]
    pub(crate) manifest: ManifestArgs,
    /// Output name to read.
    #[arg(value_name = "NAME")]
    pub(crate) name: String,
}

/// Deployment inputs shared by `deploy` and `run`.
#[derive(Debug, Parser)]
pub(crate) struct DeployArgs {
    /// Container image reference to roll out.
    #[arg(long, value_name = "IMAGE")]
    pub(crate) image: String,
    /// Registry login account.
    #[arg(long, value_name = "USER", default_value = "deploy")]
    pub(crate) registry_username: String,
    /// Opaque credential identifier for the registry password.
    #[arg(long, value_name = "ID", default_value = "registry-password")]
    pub(crate) registry_credential: String,
    /// Local artifact copied to the remote path (repeatable).
    #[arg(long = "artifact", value_name = "PATH")]
    pub(crate) artifacts: Vec<String>,
    /// Storage mount applied before artifacts land, as SOURCE:TARGET
    /// (repeatable, applied in order).
    #[arg(long = "mount", value_name = "SOURCE:TARGET")]
    pub(crate) mounts: Vec<String>,
    /// Environment binding scoped to the deploy stage (repeatable).
    #[arg(long = "env", value_name = "NAME=VALUE")]
    pub(crate) env: Vec<String>,
}

/// Arguments for the `zhuravel deploy` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct DeployCommand {
    /// Target host address.
    #[arg(long, value_name = "ADDR")]
    pub(crate) host: String,
    #[command(flatten)]
    pub(crate) deploy: DeployArgs,
}

/// Arguments for the `zhuravel run` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct RunCommand {
    #[command(flatten)]
    pub(crate) manifest: ManifestArgs,
    /// Output name resolving to the deployment target address.
    #[arg(long, value_name = "NAME", default_value = "host_address")]
    pub(crate) address_output: String,
    /// Break a live environment lease held by another run.
    #[arg(long)]
    pub(crate) force: bool,
    #[command(flatten)]
    pub(crate) deploy: DeployArgs,
}

/// Arguments for the `zhuravel destroy` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct DestroyCommand {
    #[command(flatten)]
    pub(crate) manifest: ManifestArgs,
    /// Break a live environment lease held by another run.
    #[arg(long)]
    pub(crate) force: bool,
}
