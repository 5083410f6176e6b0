//! End-to-end pipeline scenarios: readiness timeouts and stage-scoped
//! environment bindings.

use std::net::TcpListener;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use rstest::*;
use tempfile::TempDir;

use zhuravel::credentials::Secret;
use zhuravel::test_support::{ScriptedProvider, ScriptedRunner};
use zhuravel::{
    AttrValue, Bindings, DeployConfig, DeployInputs, Deployer, Manifest, Provisioner,
    ReadinessProbe, StateStore, StorageMount, WorkflowError, WorkflowOrchestrator,
    WorkflowRequest,
};

const MANIFEST: &str = r#"
[resource.host]
kind = "instance"

[resource.host.attrs]
type = "small"

[output.host_address]
resource = "host"
attribute = "public_ip"
"#;

struct PipelineHarness {
    provider: ScriptedProvider,
    runner: ScriptedRunner,
    manifest: Manifest,
    artifact: Utf8PathBuf,
    state_dir: Utf8PathBuf,
    _tmp: TempDir,
}

fn harness_with_address(address: &str) -> PipelineHarness {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let state_dir = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
    let artifact = state_dir.join("deploy.sh");
    std::fs::write(&artifact, "#!/bin/sh\n").unwrap_or_else(|err| panic!("artifact: {err}"));

    let provider = ScriptedProvider::new();
    provider.push_computed(
        "instance",
        "public_ip",
        AttrValue::String(address.to_owned()),
    );

    PipelineHarness {
        provider,
        runner: ScriptedRunner::new(),
        manifest: Manifest::from_toml_str(MANIFEST)
            .unwrap_or_else(|err| panic!("manifest: {err}")),
        artifact,
        state_dir,
        _tmp: tmp,
    }
}

#[fixture]
fn harness() -> PipelineHarness {
    harness_with_address("127.0.0.1")
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

fn request_for(harness: &PipelineHarness) -> WorkflowRequest {
    WorkflowRequest {
        address_output: String::from("host_address"),
        artifacts: vec![harness.artifact.clone()],
        mounts: Vec::new(),
        inputs: DeployInputs {
            image: String::from("registry.example.net/app:1.4.2"),
            registry_username: String::from("ci-robot"),
            registry_password: Secret::new("s3cret"),
        },
        deploy_env: Vec::new(),
    }
}

fn orchestrator_for(
    harness: &PipelineHarness,
    ssh_port: u16,
) -> WorkflowOrchestrator<ScriptedProvider, ScriptedRunner> {
    let provisioner = Provisioner::new(
        harness.provider.clone(),
        StateStore::new(harness.state_dir.clone(), "pipeline"),
    );
    let deployer = Deployer::new(deploy_config(ssh_port), harness.runner.clone())
        .unwrap_or_else(|err| panic!("deployer: {err}"));
    WorkflowOrchestrator::new(provisioner, deployer).with_probe(
        ReadinessProbe::new()
            .with_poll_interval(Duration::from_millis(10))
            .with_wait_timeout(Duration::from_millis(150))
            .with_connect_timeout(Duration::from_millis(50)),
    )
}

#[rstest]
#[tokio::test]
async fn unreachable_target_fails_within_the_bounded_timeout(harness: PipelineHarness) {
    // Bind then drop to obtain a port that refuses connections.
    let listener =
        TcpListener::bind("127.0.0.1:0").unwrap_or_else(|err| panic!("bind: {err}"));
    let port = listener
        .local_addr()
        .unwrap_or_else(|err| panic!("addr: {err}"))
        .port();
    drop(listener);

    let orchestrator = orchestrator_for(&harness, port);
    let request = request_for(&harness);

    let started = Instant::now();
    let err = orchestrator
        .execute(&harness.manifest, &Bindings::new(), &request)
        .await
        .expect_err("unreachable target should fail the run");

    assert!(matches!(err, WorkflowError::Ready(_)), "got {err}");
    assert!(
        started.elapsed() < Duration::from_secs(10),
        "readiness wait must be bounded"
    );
    // Provisioning ran; deployment never did.
    assert!(harness.provider.call_count() > 0);
    assert!(harness.runner.invocations().is_empty());
}

#[rstest]
#[tokio::test]
async fn deploy_stage_env_reaches_every_spawned_command(harness: PipelineHarness) {
    let listener =
        TcpListener::bind("127.0.0.1:0").unwrap_or_else(|err| panic!("bind: {err}"));
    let port = listener
        .local_addr()
        .unwrap_or_else(|err| panic!("addr: {err}"))
        .port();

    harness.runner.push_success(); // mount
    harness.runner.push_success(); // mkdir -p
    harness.runner.push_success(); // scp
    harness.runner.push_exit_code(0); // remote command

    let orchestrator = orchestrator_for(&harness, port);
    let mut request = request_for(&harness);
    request.mounts = vec![StorageMount {
        source: String::from("fileserver:/export"),
        target: String::from("/mnt/shared"),
    }];
    request.deploy_env = vec![(String::from("STAGE"), String::from("deploy"))];

    let outcome = orchestrator
        .execute(&harness.manifest, &Bindings::new(), &request)
        .await
        .unwrap_or_else(|err| panic!("workflow: {err}"));

    assert_eq!(outcome.remote.exit_code, Some(0));
    let invocations = harness.runner.invocations();
    assert_eq!(invocations.len(), 4);
    assert!(
        invocations.iter().all(|invocation| {
            invocation
                .env
                .contains(&(String::from("STAGE"), String::from("deploy")))
        }),
        "every deploy-stage command should carry the scoped binding"
    );

    // The mount runs before any artifact lands.
    let first = invocations
        .first()
        .unwrap_or_else(|| panic!("mount invocation expected"));
    assert!(
        first.command_string().contains("mount fileserver:/export /mnt/shared"),
        "first invocation: {}",
        first.command_string()
    );
}
