//! Binary entry point for the zhuravel CLI.

use std::env;
use std::io::{self, Write};
use std::net::IpAddr;
use std::process;
use std::str::FromStr;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use zhuravel::{
    Bindings, CliProvider, CliProviderError, ConfigError, ConvergeError, CredentialError,
    CredentialId, CredentialStore, DeployConfig, DeployError, DeployInputs, Deployer,
    EnvCredentialStore, GraphError, Manifest, OutputError, ProcessCommandRunner, ProviderConfig,
    Provisioner, StorageMount, VarError, WorkflowError, WorkflowOrchestrator, WorkflowRequest,
    deploy::DeployConfigLoadError, exec::EnvBinding, outputs,
};

mod cli;

use cli::{
    ApplyCommand, Cli, DeployArgs, DeployCommand, DestroyCommand, ManifestArgs, OutputCommand,
    PlanCommand, RunCommand,
};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Manifest(#[from] GraphError),
    #[error(transparent)]
    Vars(#[from] VarError),
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Converge(#[from] ConvergeError<CliProviderError>),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error(transparent)]
    Deploy(#[from] DeployError),
    #[error(transparent)]
    Workflow(#[from] WorkflowError<CliProviderError>),
    #[error("invalid host address: {0}")]
    InvalidHost(String),
    #[error("invalid mount specification: {0}")]
    InvalidMount(String),
    #[error("remote command terminated without an exit status")]
    MissingExitCode,
}

impl From<ConfigError> for CliError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}

impl From<DeployConfigLoadError> for CliError {
    fn from(value: DeployConfigLoadError) -> Self {
        Self::Config(value.to_string())
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            exit_code_for_error(&err)
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::Plan(command) => plan_command(&command),
        Cli::Apply(command) => apply_command(&command).await,
        Cli::Output(command) => output_command(&command),
        Cli::Deploy(command) => deploy_command(&command),
        Cli::Run(command) => run_command(&command).await,
        Cli::Destroy(command) => destroy_command(&command).await,
    }
}

fn load_manifest(args: &ManifestArgs) -> Result<(Manifest, Bindings), CliError> {
    let manifest = Manifest::load(&Utf8PathBuf::from(&args.manifest))?;
    let bindings = Bindings::from_args(&args.vars)?;
    Ok((manifest, bindings))
}

fn build_provisioner(
    force: bool,
) -> Result<Provisioner<CliProvider<ProcessCommandRunner>>, CliError> {
    let config = ProviderConfig::load_without_cli_args()?;
    config.validate()?;

    let mut env: Vec<EnvBinding> = Vec::new();
    if let Some(raw_id) = &config.credential_id {
        let id = CredentialId::new(raw_id.clone())?;
        let secret = EnvCredentialStore::new().resolve(&id)?;
        env.push((config.credential_env.clone(), secret.expose().to_owned()));
    }

    let store = config.state_store();
    let lease_options = config.lease_options(force);
    let provider = CliProvider::with_process_runner(config).with_env(env);
    Ok(Provisioner::new(provider, store).with_lease_options(lease_options))
}

fn build_deployer(args: &DeployArgs) -> Result<Deployer<ProcessCommandRunner>, CliError> {
    let config = DeployConfig::load_without_cli_args()?;
    let env = parse_env_bindings(&args.env)?;
    Ok(Deployer::with_process_runner(config)?.with_env(env))
}

fn deploy_inputs(args: &DeployArgs) -> Result<DeployInputs, CliError> {
    let id = CredentialId::new(args.registry_credential.clone())?;
    let registry_password = EnvCredentialStore::new().resolve(&id)?;
    Ok(DeployInputs {
        image: args.image.clone(),
        registry_username: args.registry_username.clone(),
        registry_password,
    })
}

fn parse_env_bindings(raw: &[String]) -> Result<Vec<EnvBinding>, CliError> {
    raw.iter()
        .map(|binding| {
            binding
                .split_once('=')
                .map(|(name, value)| (name.to_owned(), value.to_owned()))
                .ok_or_else(|| CliError::Config(format!("invalid env binding '{binding}'")))
        })
        .collect()
}

fn parse_mounts(raw: &[String]) -> Result<Vec<StorageMount>, CliError> {
    raw.iter()
        .map(|mount| {
            StorageMount::parse(mount).ok_or_else(|| CliError::InvalidMount(mount.clone()))
        })
        .collect()
}

fn parse_artifacts(raw: &[String]) -> Vec<Utf8PathBuf> {
    raw.iter().map(Utf8PathBuf::from).collect()
}

fn plan_command(command: &PlanCommand) -> Result<i32, CliError> {
    let (manifest, bindings) = load_manifest(&command.manifest)?;
    let provisioner = build_provisioner(false)?;

    let plan = provisioner.plan(&manifest, &bindings)?;
    let mut stdout = io::stdout();
    for action in &plan.actions {
        writeln!(stdout, "{action}").ok();
    }
    writeln!(stdout, "{} change(s) pending", plan.pending_changes()).ok();
    Ok(0)
}

async fn apply_command(command: &ApplyCommand) -> Result<i32, CliError> {
    let (manifest, bindings) = load_manifest(&command.manifest)?;
    let provisioner = build_provisioner(command.force)?;

    let summary = provisioner.apply(&manifest, &bindings).await?;
    let mut stdout = io::stdout();
    writeln!(
        stdout,
        "applied: {} created, {} updated, {} deleted, {} unchanged (serial {})",
        summary.created, summary.updated, summary.deleted, summary.unchanged, summary.serial
    )
    .ok();
    Ok(0)
}

fn output_command(command: &OutputCommand) -> Result<i32, CliError> {
    let (manifest, _) = load_manifest(&command.manifest)?;
    let config = ProviderConfig::load_without_cli_args()?;
    let record = config
        .state_store()
        .load()
        .map_err(|err| CliError::Config(err.to_string()))?;

    let value = outputs::extract(&record, manifest.outputs(), &command.name)?;
    writeln!(io::stdout(), "{value}").ok();
    Ok(0)
}

fn deploy_command(command: &DeployCommand) -> Result<i32, CliError> {
    let deployer = build_deployer(&command.deploy)?;
    let address = IpAddr::from_str(&command.host)
        .map_err(|_| CliError::InvalidHost(command.host.clone()))?;
    let target = deployer.config().remote_target(address);

    let mounts = parse_mounts(&command.deploy.mounts)?;
    deployer.mount_storage(&target, &mounts)?;

    let inputs = deploy_inputs(&command.deploy)?;
    let template =
        zhuravel::RemoteCommandTemplate::new(deployer.config().command_template.as_str());
    let artifacts = parse_artifacts(&command.deploy.artifacts);
    let output = deployer.deploy(&target, &artifacts, &template, &inputs)?;
    output.exit_code.ok_or(CliError::MissingExitCode)
}

async fn run_command(command: &RunCommand) -> Result<i32, CliError> {
    if let Some(result) = fake_run_from_env() {
        return result;
    }

    let (manifest, bindings) = load_manifest(&command.manifest)?;
    let provisioner = build_provisioner(command.force)?;
    let deployer = build_deployer(&command.deploy)?;

    let request = WorkflowRequest {
        address_output: command.address_output.clone(),
        artifacts: parse_artifacts(&command.deploy.artifacts),
        mounts: parse_mounts(&command.deploy.mounts)?,
        inputs: deploy_inputs(&command.deploy)?,
        deploy_env: parse_env_bindings(&command.deploy.env)?,
    };

    let orchestrator = WorkflowOrchestrator::new(provisioner, deployer);
    let outcome = orchestrator.execute(&manifest, &bindings, &request).await?;
    outcome.remote.exit_code.ok_or(CliError::MissingExitCode)
}

async fn destroy_command(command: &DestroyCommand) -> Result<i32, CliError> {
    let (manifest, _) = load_manifest(&command.manifest)?;
    let provisioner = build_provisioner(command.force)?;

    let summary = provisioner.destroy(&manifest).await?;
    writeln!(io::stdout(), "destroyed {} resource(s)", summary.deleted).ok();
    Ok(0)
}

/// Maps an error to the process exit code, preserving the remote command's
/// exit status when the deployment stage reported one.
fn exit_code_for_error(err: &CliError) -> i32 {
    let remote_status = match err {
        CliError::Deploy(DeployError::RemoteCommand { status, .. })
        | CliError::Workflow(WorkflowError::Deploy(DeployError::RemoteCommand {
            status, ..
        })) => *status,
        _ => None,
    };
    remote_status.unwrap_or(1)
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

fn fake_run_from_env() -> Option<Result<i32, CliError>> {
    let mode = env::var("ZHURAVEL_FAKE_RUN_MODE").ok()?;
    match mode.as_str() {
        "exit-0" => {
            writeln!(io::stdout(), "fake-stdout").ok();
            writeln!(io::stderr(), "fake-stderr").ok();
            Some(Ok(0))
        }
        "exit-7" => {
            writeln!(io::stdout(), "fake-stdout").ok();
            writeln!(io::stderr(), "fake-stderr").ok();
            Some(Ok(7))
        }
        "missing-exit" => Some(Err(CliError::MissingExitCode)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_exit_status_becomes_process_exit_code() {
        let err = CliError::Deploy(DeployError::RemoteCommand {
            status: Some(7),
            status_text: String::from("7"),
            stderr: String::new(),
        });
        assert_eq!(exit_code_for_error(&err), 7);
    }

    #[test]
    fn other_errors_exit_with_one() {
        assert_eq!(exit_code_for_error(&CliError::MissingExitCode), 1);
    }

    #[test]
    fn env_bindings_parse() {
        let bindings = parse_env_bindings(&[String::from("A=1"), String::from("B=two")])
            .unwrap_or_else(|err| panic!("bindings: {err}"));
        assert_eq!(
            bindings,
            vec![
                (String::from("A"), String::from("1")),
                (String::from("B"), String::from("two")),
            ]
        );
    }

    #[test]
    fn invalid_env_binding_is_rejected() {
        let err = parse_env_bindings(&[String::from("nope")]).expect_err("missing '='");
        assert!(matches!(err, CliError::Config(_)), "got {err}");
    }

    #[test]
    fn invalid_mount_is_rejected() {
        let err = parse_mounts(&[String::from("no-separator")]).expect_err("bad mount");
        assert!(matches!(err, CliError::InvalidMount(_)), "got {err}");
    }

    #[test]
    fn write_error_writes_cli_error() {
        let mut buf = Vec::new();
        let err = CliError::MissingExitCode;
        write_error(&mut buf, &err);
        let rendered = String::from_utf8(buf).unwrap_or_else(|err| panic!("utf8: {err}"));
        assert!(
            rendered.contains("remote command terminated without an exit status"),
            "rendered: {rendered}"
        );
    }
}
