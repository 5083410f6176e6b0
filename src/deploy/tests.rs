//! Unit tests for artifact transfer, mounts, and remote execution.

use std::net::{IpAddr, Ipv4Addr};

use camino::Utf8PathBuf;
use tempfile::TempDir;

use super::*;
use crate::credentials::Secret;
use crate::test_support::ScriptedRunner;

fn test_config() -> DeployConfig {
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

fn target() -> RemoteTarget {
    RemoteTarget {
        address: IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7)),
        ssh_port: 22,
    }
}

fn deployer(runner: ScriptedRunner) -> Deployer<ScriptedRunner> {
    Deployer::new(test_config(), runner).unwrap_or_else(|err| panic!("deployer: {err}"))
}

fn artifact_in(tmp: &TempDir, name: &str) -> Utf8PathBuf {
    let path = tmp.path().join(name);
    std::fs::write(&path, "#!/bin/sh\n").unwrap_or_else(|err| panic!("write artifact: {err}"));
    Utf8PathBuf::from_path_buf(path)
        .unwrap_or_else(|p| panic!("temp path should be utf8: {}", p.display()))
}

fn inputs() -> DeployInputs {
    DeployInputs {
        image: String::from("registry.example.net/app:1.4.2"),
        registry_username: String::from("ci-robot"),
        registry_password: Secret::new("s3cret"),
    }
}

#[test]
fn missing_artifact_aborts_before_any_command() {
    let runner = ScriptedRunner::new();
    let deployer = deployer(runner.clone());
    let missing = Utf8PathBuf::from("/nonexistent/deploy.sh");

    let err = deployer
        .push_artifacts(&target(), &[missing])
        .expect_err("missing artifact should fail");

    assert!(matches!(err, DeployError::MissingArtifact { .. }), "got {err}");
    assert!(runner.invocations().is_empty(), "no command should run");
}

#[test]
fn push_artifacts_prepares_path_then_copies() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let artifact = artifact_in(&tmp, "deploy.sh");
    let runner = ScriptedRunner::new();
    runner.push_success(); // mkdir -p
    runner.push_success(); // scp
    let deployer = deployer(runner.clone());

    deployer
        .push_artifacts(&target(), &[artifact.clone()])
        .unwrap_or_else(|err| panic!("push: {err}"));

    let invocations = runner.invocations();
    assert_eq!(invocations.len(), 2);
    let first = invocations
        .first()
        .unwrap_or_else(|| panic!("mkdir invocation expected"));
    assert_eq!(first.program, "ssh");
    assert!(
        first.command_string().contains("mkdir -p /home/deploy/app"),
        "args: {}",
        first.command_string()
    );
    let second = invocations
        .get(1)
        .unwrap_or_else(|| panic!("scp invocation expected"));
    assert_eq!(second.program, "scp");
    let rendered = second.command_string();
    assert!(rendered.contains(artifact.as_str()), "args: {rendered}");
    assert!(
        rendered.contains("deploy@192.0.2.7:/home/deploy/app/"),
        "args: {rendered}"
    );
}

#[test]
fn transfer_failure_aborts_before_remote_execution() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let artifact = artifact_in(&tmp, "deploy.sh");
    let runner = ScriptedRunner::new();
    runner.push_success(); // mkdir -p
    runner.push_failure(1); // scp fails
    let deployer = deployer(runner.clone());

    let err = deployer
        .deploy(
            &target(),
            &[artifact],
            &RemoteCommandTemplate::new(DEFAULT_COMMAND_TEMPLATE),
            &inputs(),
        )
        .expect_err("transfer failure should abort");

    assert!(matches!(err, DeployError::Transfer { .. }), "got {err}");
    // mkdir + scp only; the deployment command never ran.
    assert_eq!(runner.invocations().len(), 2);
}

#[test]
fn deploy_runs_rendered_command_in_remote_path() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let artifact = artifact_in(&tmp, "deploy.sh");
    let runner = ScriptedRunner::new();
    runner.push_success(); // mkdir -p
    runner.push_success(); // scp
    runner.push_exit_code(0); // remote command
    let deployer = deployer(runner.clone());

    let output = deployer
        .deploy(
            &target(),
            &[artifact],
            &RemoteCommandTemplate::new(DEFAULT_COMMAND_TEMPLATE),
            &inputs(),
        )
        .unwrap_or_else(|err| panic!("deploy: {err}"));

    assert_eq!(output.exit_code, Some(0));
    let last = runner
        .invocations()
        .into_iter()
        .next_back()
        .unwrap_or_else(|| panic!("remote invocation expected"));
    let remote = last
        .args
        .last()
        .map(|arg| arg.to_string_lossy().into_owned())
        .unwrap_or_default();
    assert!(remote.starts_with("cd /home/deploy/app && "), "remote: {remote}");
    assert!(
        remote.contains("./deploy.sh registry.example.net/app:1.4.2 ci-robot s3cret"),
        "remote: {remote}"
    );
}

#[test]
fn non_zero_remote_exit_is_surfaced() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let artifact = artifact_in(&tmp, "deploy.sh");
    let runner = ScriptedRunner::new();
    runner.push_success(); // mkdir -p
    runner.push_success(); // scp
    runner.push_exit_code(7); // remote command fails
    let deployer = deployer(runner);

    let err = deployer
        .deploy(
            &target(),
            &[artifact],
            &RemoteCommandTemplate::new(DEFAULT_COMMAND_TEMPLATE),
            &inputs(),
        )
        .expect_err("non-zero exit should fail");

    let DeployError::RemoteCommand { status, .. } = err else {
        panic!("expected RemoteCommand, got {err}");
    };
    assert_eq!(status, Some(7));
}

#[test]
fn mounts_apply_sequentially_in_order() {
    let runner = ScriptedRunner::new();
    runner.push_success();
    runner.push_success();
    let deployer = deployer(runner.clone());
    let mounts = vec![
        StorageMount {
            source: String::from("fileserver:/export"),
            target: String::from("/mnt/shared"),
        },
        StorageMount {
            source: String::from("/dev/vdb"),
            target: String::from("/mnt/objects"),
        },
    ];

    deployer
        .mount_storage(&target(), &mounts)
        .unwrap_or_else(|err| panic!("mount: {err}"));

    let commands: Vec<String> = runner
        .invocations()
        .into_iter()
        .map(|invocation| {
            invocation
                .args
                .last()
                .map(|arg| arg.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
        .collect();
    assert_eq!(commands.len(), 2);
    assert!(
        commands
            .first()
            .is_some_and(|cmd| cmd.contains("mount fileserver:/export /mnt/shared")),
        "commands: {commands:?}"
    );
    assert!(
        commands
            .get(1)
            .is_some_and(|cmd| cmd.contains("mount /dev/vdb /mnt/objects")),
        "commands: {commands:?}"
    );
}

#[test]
fn mount_ssh_failure_is_surfaced() {
    let runner = ScriptedRunner::new();
    runner.push_exit_code(255); // ssh connection failure
    let deployer = deployer(runner);
    let mounts = vec![StorageMount {
        source: String::from("/dev/vdb"),
        target: String::from("/mnt/objects"),
    }];

    let err = deployer
        .mount_storage(&target(), &mounts)
        .expect_err("ssh failure should surface");

    assert!(matches!(err, DeployError::Mount { .. }), "got {err}");
}

#[test]
fn stage_env_reaches_every_command() {
    let runner = ScriptedRunner::new();
    runner.push_success();
    let deployer = deployer(runner.clone())
        .with_env(vec![(String::from("STAGE"), String::from("deploy"))]);

    deployer
        .run_remote(&target(), "true")
        .unwrap_or_else(|err| panic!("run: {err}"));

    let invocation = runner
        .invocations()
        .into_iter()
        .next()
        .unwrap_or_else(|| panic!("invocation expected"));
    assert_eq!(
        invocation.env,
        vec![(String::from("STAGE"), String::from("deploy"))]
    );
}
