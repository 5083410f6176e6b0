//! Behavioural scenarios for the provision-then-deploy workflow.

use std::net::TcpListener;
use std::sync::Arc;

use camino::Utf8PathBuf;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tempfile::TempDir;
use tokio::runtime::Runtime;

use zhuravel::credentials::Secret;
use zhuravel::test_support::{ScriptedProvider, ScriptedRunner};
use zhuravel::{
    AttrValue, Bindings, DeployConfig, DeployInputs, Deployer, Manifest, Provisioner,
    ReadinessProbe, StateStore, WorkflowOrchestrator, WorkflowRequest,
};

const WORKFLOW_MANIFEST: &str = r#"
[resource.network]
kind = "network"

[resource.network.attrs]
cidr = "10.0.0.0/16"

[resource.subnet]
kind = "subnet"

[resource.subnet.attrs]
network_id = "${ref.network.id}"
cidr = "10.0.1.0/24"

[resource.host]
kind = "instance"

[resource.host.attrs]
subnet_id = "${ref.subnet.id}"
type = "${var.instance_type}"

[output.host_address]
resource = "host"
attribute = "public_ip"

[var.instance_type]
"#;

#[derive(Clone, Debug)]
struct WorkflowContext {
    provider: ScriptedProvider,
    runner: ScriptedRunner,
    manifest: Manifest,
    bindings: Bindings,
    ssh_port: u16,
    artifact: Utf8PathBuf,
    state_dir: Utf8PathBuf,
    _listener: Arc<TcpListener>,
    _tmp: Arc<TempDir>,
}

#[derive(Clone, Debug)]
enum WorkflowResult {
    NotRun,
    Success {
        exit_code: Option<i32>,
        stages: usize,
    },
    Failure(String),
}

fn build_context(bind_instance_type: bool) -> WorkflowContext {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));

    let artifact = root.join("deploy.sh");
    std::fs::write(&artifact, "#!/bin/sh\n")
        .unwrap_or_else(|err| panic!("write artifact: {err}"));

    let listener =
        TcpListener::bind("127.0.0.1:0").unwrap_or_else(|err| panic!("bind listener: {err}"));
    let ssh_port = listener
        .local_addr()
        .unwrap_or_else(|err| panic!("listener addr: {err}"))
        .port();

    let provider = ScriptedProvider::new();
    provider.push_computed(
        "instance",
        "public_ip",
        AttrValue::String(String::from("127.0.0.1")),
    );

    let manifest =
        Manifest::from_toml_str(WORKFLOW_MANIFEST).unwrap_or_else(|err| panic!("manifest: {err}"));
    let mut bindings = Bindings::new();
    if bind_instance_type {
        bindings.set("instance_type", AttrValue::String(String::from("small")));
    }

    WorkflowContext {
        provider,
        runner: ScriptedRunner::new(),
        manifest,
        bindings,
        ssh_port,
        artifact,
        state_dir: root,
        _listener: Arc::new(listener),
        _tmp: Arc::new(tmp),
    }
}

fn deploy_config(ssh_port: u16) -> DeployConfig {
    DeployConfig {
        scp_bin: String::from("scp"),
        ssh_bin: String::from("ssh"),
        ssh_user: String::from("deploy"),
        ssh_port: Some(ssh_port),
        remote_path: String::from("/home/deploy/app"),
        ssh_batch_mode: true,
        ssh_strict_host_key_checking: false,
        ssh_known_hosts_file: String::from("/dev/null"),
        ssh_identity_file: None,
        command_template: String::from(
            "./deploy.sh {image} {registry_username} {registry_password}",
        ),
    }
}

#[fixture]
fn workflow_context() -> WorkflowContext {
    build_context(true)
}

#[fixture]
fn workflow_result() -> WorkflowResult {
    WorkflowResult::NotRun
}

#[given("a converged workflow context")]
fn converged_context() -> WorkflowContext {
    let context = build_context(true);
    context.runner.push_success(); // mkdir -p remote path
    context.runner.push_success(); // scp artifact
    context.runner.push_exit_code(0); // remote deployment command
    context
}

#[given("a workflow context whose provider rejects the instance")]
fn rejecting_provider_context() -> WorkflowContext {
    let context = build_context(true);
    context.provider.fail_create("host");
    context
}

#[given("a workflow context with an unbound variable")]
fn unbound_variable_context() -> WorkflowContext {
    build_context(false)
}

#[when("I execute the workflow")]
fn execute_workflow(workflow_context: &WorkflowContext) -> WorkflowResult {
    let runtime = Runtime::new().unwrap_or_else(|err| panic!("runtime: {err}"));

    let store = StateStore::new(workflow_context.state_dir.clone(), "bdd");
    let provisioner = Provisioner::new(workflow_context.provider.clone(), store);
    let deployer = Deployer::new(
        deploy_config(workflow_context.ssh_port),
        workflow_context.runner.clone(),
    )
    .unwrap_or_else(|err| panic!("deployer: {err}"));

    let orchestrator = WorkflowOrchestrator::new(provisioner, deployer).with_probe(
        ReadinessProbe::new()
            .with_poll_interval(std::time::Duration::from_millis(10))
            .with_wait_timeout(std::time::Duration::from_secs(5)),
    );

    let request = WorkflowRequest {
        address_output: String::from("host_address"),
        artifacts: vec![workflow_context.artifact.clone()],
        mounts: Vec::new(),
        inputs: DeployInputs {
            image: String::from("registry.example.net/app:1.4.2"),
            registry_username: String::from("ci-robot"),
            registry_password: Secret::new("s3cret"),
        },
        deploy_env: Vec::new(),
    };

    let outcome = runtime.block_on(async {
        orchestrator
            .execute(
                &workflow_context.manifest,
                &workflow_context.bindings,
                &request,
            )
            .await
    });

    match outcome {
        Ok(outcome) => WorkflowResult::Success {
            exit_code: outcome.remote.exit_code,
            stages: outcome.reports.len(),
        },
        Err(err) => WorkflowResult::Failure(err.to_string()),
    }
}

#[then("every stage succeeds and the remote exit code is \"{code}\"")]
fn stages_succeed(workflow_result: &WorkflowResult, code: i32) {
    let WorkflowResult::Success { exit_code, stages } = workflow_result else {
        panic!("expected success, got {workflow_result:?}");
    };
    assert_eq!(*exit_code, Some(code));
    assert_eq!(*stages, 4);
}

#[then("the failure names the provisioning stage")]
fn failure_names_provisioning(workflow_result: &WorkflowResult) {
    let WorkflowResult::Failure(message) = workflow_result else {
        panic!("expected failure, got {workflow_result:?}");
    };
    assert!(message.contains("provisioning failed"), "message: {message}");
}

#[then("no remote command was attempted")]
fn no_remote_command(workflow_context: &WorkflowContext) {
    assert!(
        workflow_context.runner.invocations().is_empty(),
        "no ssh or scp invocation should be recorded"
    );
}

#[then("the failure lists the unbound variable")]
fn failure_lists_unbound(workflow_result: &WorkflowResult) {
    let WorkflowResult::Failure(message) = workflow_result else {
        panic!("expected failure, got {workflow_result:?}");
    };
    assert!(
        message.contains("unbound variables: instance_type"),
        "message: {message}"
    );
}

#[then("no provider call was made")]
fn no_provider_call(workflow_context: &WorkflowContext) {
    assert_eq!(workflow_context.provider.call_count(), 0);
}

#[scenario(
    path = "tests/features/workflow.feature",
    name = "Deploy after convergence succeeds"
)]
fn scenario_deploy_after_convergence(workflow_context: WorkflowContext, workflow_result: WorkflowResult) {
    let _ = (workflow_context, workflow_result);
}

#[scenario(
    path = "tests/features/workflow.feature",
    name = "Provisioning failure stops the pipeline before deployment"
)]
fn scenario_provision_failure_stops_pipeline(
    workflow_context: WorkflowContext,
    workflow_result: WorkflowResult,
) {
    let _ = (workflow_context, workflow_result);
}

#[scenario(
    path = "tests/features/workflow.feature",
    name = "Unbound variables abort before any cloud mutation"
)]
fn scenario_unbound_variables_abort(
    workflow_context: WorkflowContext,
    workflow_result: WorkflowResult,
) {
    let _ = (workflow_context, workflow_result);
}
