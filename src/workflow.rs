//! End-to-end provision-then-deploy orchestration.
//!
//! The workflow wires the ordered stages provision → extract-output →
//! await-ready → deploy over a [`PipelineRun`], converging the manifest,
//! reading the host address output, polling for SSH readiness, and
//! driving the deployer. The first failing stage aborts the run; nothing
//! already applied is rolled back.

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::converge::{ConvergeError, ConvergeSummary, Provisioner};
use crate::deploy::{
    DeployError, DeployInputs, Deployer, RemoteCommandOutput, RemoteCommandTemplate, StorageMount,
};
use crate::exec::{CommandRunner, EnvBinding};
use crate::graph::Manifest;
use crate::outputs::{OutputError, extract_host_address};
use crate::pipeline::{PipelineError, PipelineRun, StageReport, StageSpec};
use crate::provider::Provider;
use crate::readiness::{ReadinessError, ReadinessProbe};
use crate::state::StateError;
use crate::vars::Bindings;

/// Name of the convergence stage.
pub const STAGE_PROVISION: &str = "provision";
/// Name of the output extraction stage.
pub const STAGE_EXTRACT: &str = "extract-output";
/// Name of the readiness polling stage.
pub const STAGE_AWAIT_READY: &str = "await-ready";
/// Name of the deployment stage.
pub const STAGE_DEPLOY: &str = "deploy";

/// Inputs for one workflow run.
#[derive(Clone, Debug)]
pub struct WorkflowRequest {
    /// Output name resolving to the deployment target address.
    pub address_output: String,
    /// Local artifacts pushed to the target before the remote command.
    pub artifacts: Vec<Utf8PathBuf>,
    /// Storage mounts applied sequentially after readiness.
    pub mounts: Vec<StorageMount>,
    /// Runtime values substituted into the remote command template.
    pub inputs: DeployInputs,
    /// Environment bindings scoped to the deploy stage.
    pub deploy_env: Vec<EnvBinding>,
}

/// Result of a successful workflow run.
#[derive(Clone, Debug)]
pub struct WorkflowOutcome {
    /// Convergence counters from the provision stage.
    pub converge: ConvergeSummary,
    /// Output of the remote deployment command.
    pub remote: RemoteCommandOutput,
    /// Per-stage reports in execution order.
    pub reports: Vec<StageReport>,
}

/// Errors surfaced while performing a workflow run, named per stage.
#[derive(Debug, Error)]
pub enum WorkflowError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when the provision stage fails.
    #[error("provisioning failed: {0}")]
    Provision(#[source] ConvergeError<E>),
    /// Raised when the converged state record cannot be read back.
    #[error(transparent)]
    State(#[from] StateError),
    /// Raised when the host address output cannot be extracted.
    #[error("output extraction failed: {0}")]
    Output(#[source] OutputError),
    /// Raised when the target never became reachable.
    #[error("target not ready: {0}")]
    Ready(#[source] ReadinessError),
    /// Raised when mounts, transfer, or the remote command fail.
    #[error("deployment failed: {0}")]
    Deploy(#[source] DeployError),
    /// Raised on illegal pipeline state machine use.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Executes the provision-then-deploy workflow using the provided
/// provisioner and deployer.
#[derive(Debug)]
pub struct WorkflowOrchestrator<P, R>
where
    P: Provider,
    R: CommandRunner + Clone,
{
    provisioner: Provisioner<P>,
    deployer: Deployer<R>,
    probe: ReadinessProbe,
}

impl<P, R> WorkflowOrchestrator<P, R>
where
    P: Provider,
    R: CommandRunner + Clone,
{
    /// Creates a new orchestrator with the default readiness cadence.
    #[must_use]
    pub fn new(provisioner: Provisioner<P>, deployer: Deployer<R>) -> Self {
        Self {
            provisioner,
            deployer,
            probe: ReadinessProbe::new(),
        }
    }

    /// Overrides the readiness probe.
    ///
    /// This is primarily used by tests to keep timeout scenarios fast.
    #[must_use]
    pub const fn with_probe(mut self, probe: ReadinessProbe) -> Self {
        self.probe = probe;
        self
    }

    /// Runs the full workflow and returns the remote command output.
    ///
    /// The deployment stage only ever observes the host address after the
    /// provision stage has reported convergence success.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError`] naming the failing stage when
    /// provisioning, extraction, readiness, or deployment fail.
    pub async fn execute(
        &self,
        manifest: &Manifest,
        bindings: &Bindings,
        request: &WorkflowRequest,
    ) -> Result<WorkflowOutcome, WorkflowError<P::Error>> {
        let stages = vec![
            StageSpec::new(STAGE_PROVISION),
            StageSpec::new(STAGE_EXTRACT),
            StageSpec::new(STAGE_AWAIT_READY),
            StageSpec::new(STAGE_DEPLOY).with_env(request.deploy_env.clone()),
        ];
        let mut run = PipelineRun::new(stages)?;
        run.begin()?;

        let converge = match self.provisioner.apply(manifest, bindings).await {
            Ok(summary) => {
                run.complete_stage()?;
                summary
            }
            Err(err) => {
                run.fail_stage(err.to_string())?;
                return Err(WorkflowError::Provision(err));
            }
        };

        let address = match self.extract_address(manifest, &request.address_output) {
            Ok(address) => {
                run.complete_stage()?;
                address
            }
            Err(err) => {
                run.fail_stage(err.to_string())?;
                return Err(err);
            }
        };
        let target = self.deployer.config().remote_target(address);

        if let Err(err) = self.probe.wait_for_ssh(&target).await {
            run.fail_stage(err.to_string())?;
            return Err(WorkflowError::Ready(err));
        }
        run.complete_stage()?;

        let deployer = self.deployer.clone().with_env(request.deploy_env.clone());
        let template = RemoteCommandTemplate::new(self.deployer.config().command_template.as_str());
        let remote = match deploy_stage(&deployer, &target, request, &template) {
            Ok(output) => {
                run.complete_stage()?;
                output
            }
            Err(err) => {
                run.fail_stage(err.to_string())?;
                return Err(WorkflowError::Deploy(err));
            }
        };

        Ok(WorkflowOutcome {
            converge,
            remote,
            reports: run.into_reports(),
        })
    }

    fn extract_address(
        &self,
        manifest: &Manifest,
        output_name: &str,
    ) -> Result<std::net::IpAddr, WorkflowError<P::Error>> {
        let record = self.provisioner.store().load()?;
        extract_host_address(&record, manifest.outputs(), output_name)
            .map_err(WorkflowError::Output)
    }
}

fn deploy_stage<R: CommandRunner>(
    deployer: &Deployer<R>,
    target: &crate::deploy::RemoteTarget,
    request: &WorkflowRequest,
    template: &RemoteCommandTemplate,
) -> Result<RemoteCommandOutput, DeployError> {
    deployer.mount_storage(target, &request.mounts)?;
    deployer.deploy(target, &request.artifacts, template, &request.inputs)
}
