//! Core library for the zhuravel provisioning and deployment tool.
//!
//! The crate converges a declarative resource manifest against a cloud
//! provider (plan → apply with persisted state), exposes named outputs
//! from the converged state, and deploys container artifacts onto the
//! provisioned host over SSH as an ordered pipeline
//! (provision → extract-output → await-ready → deploy).

pub mod config;
pub mod converge;
pub mod credentials;
pub mod deploy;
pub mod exec;
pub mod graph;
pub mod lock;
pub mod outputs;
pub mod pipeline;
pub mod provider;
pub mod readiness;
pub mod state;
pub mod test_support;
pub mod vars;
pub mod workflow;

pub use config::{ConfigError, ProviderConfig};
pub use converge::{ConvergeError, ConvergePlan, ConvergeSummary, PlannedAction, Provisioner};
pub use credentials::{CredentialError, CredentialId, CredentialStore, EnvCredentialStore, Secret};
pub use deploy::{
    DeployConfig, DeployError, DeployInputs, Deployer, RemoteCommandOutput, RemoteCommandTemplate,
    RemoteTarget, StorageMount,
};
pub use exec::{CommandOutput, CommandRunner, ExecError, ProcessCommandRunner};
pub use graph::{AttrValue, GraphError, Manifest, OutputSpec, ResourceDecl};
pub use lock::{Lease, LeaseError, LeaseOptions};
pub use outputs::{OutputError, extract, extract_host_address};
pub use pipeline::{PipelineError, PipelineRun, RunState, StageOutcome, StageReport, StageSpec};
pub use provider::{CliProvider, CliProviderError, Provider, ResourceSnapshot};
pub use readiness::{ReadinessError, ReadinessProbe};
pub use state::{ResourceState, ResourceStatus, StateError, StateRecord, StateStore};
pub use vars::{Bindings, VarDecl, VarError};
pub use workflow::{WorkflowError, WorkflowOrchestrator, WorkflowOutcome, WorkflowRequest};
