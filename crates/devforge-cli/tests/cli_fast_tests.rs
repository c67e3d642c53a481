//! Fast CLI tests using assert_cmd.
//! These test the binary directly without needing Docker or Redis.

#![allow(deprecated)] // assert_cmd::Command::cargo_bin is deprecated but works fine

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Command with config and state isolated in `tmp`
fn devforge(tmp: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("devforge").unwrap();
    cmd.env("DEVFORGE_CONFIG_DIR", tmp.path().join("config"))
        .env("DEVFORGE_STATE_DIR", tmp.path().join("state"))
        .env_remove("DOCKER_HOST")
        .env_remove("REDIS_URL");
    cmd
}

#[test]
fn test_help_flag() {
    Command::cargo_bin("devforge")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Web IDE project container manager"));
}

#[test]
fn test_version_flag() {
    Command::cargo_bin("devforge")
        .unwrap()
        .arg("--version")
        .assert()
        .success();
}

#[test]
fn test_subcommand_help() {
    for subcmd in &[
        "create", "shell", "exec", "destroy", "delete", "status", "health", "logs", "stats",
        "preview", "list",
    ] {
        Command::cargo_bin("devforge")
            .unwrap()
            .args([subcmd, "--help"])
            .assert()
            .success()
            .stdout(predicate::str::is_empty().not());
    }
}

#[test]
fn test_unknown_subcommand_fails() {
    Command::cargo_bin("devforge")
        .unwrap()
        .arg("nonexistent-subcommand")
        .assert()
        .failure();
}

#[test]
fn test_create_rejects_unknown_type() {
    let tmp = TempDir::new().unwrap();
    devforge(&tmp)
        .args(["create", "--user", "u1", "--type", "cobol", "demo"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown project type"));
}

#[test]
fn test_create_requires_user() {
    let tmp = TempDir::new().unwrap();
    devforge(&tmp)
        .args(["create", "demo"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--user"));
}

#[test]
fn test_exec_requires_command() {
    let tmp = TempDir::new().unwrap();
    devforge(&tmp)
        .args(["exec", "p1"])
        .assert()
        .failure();
}

#[test]
fn test_config_shows_defaults() {
    let tmp = TempDir::new().unwrap();
    devforge(&tmp)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("node:18-alpine"))
        .stdout(predicate::str::contains("not created yet"));
}

#[test]
fn test_config_applies_environment() {
    let tmp = TempDir::new().unwrap();
    devforge(&tmp)
        .arg("config")
        .env("DOCKER_BASE_IMAGE", "node:20-alpine")
        .env("CONTAINER_MEMORY_LIMIT", "1g")
        .assert()
        .success()
        .stdout(predicate::str::contains("node:20-alpine"))
        .stdout(predicate::str::contains("1g"));
}

#[test]
fn test_config_masks_store_password() {
    let tmp = TempDir::new().unwrap();
    devforge(&tmp)
        .arg("config")
        .env("REDIS_PASSWORD", "hunter2")
        .assert()
        .success()
        .stdout(predicate::str::contains("hunter2").not())
        .stdout(predicate::str::contains("password = \"********\""));
}

#[test]
fn test_invalid_port_env_fails() {
    let tmp = TempDir::new().unwrap();
    devforge(&tmp)
        .arg("config")
        .env("FRONTEND_PORT_START", "lots")
        .assert()
        .failure()
        .stderr(predicate::str::contains("FRONTEND_PORT_START"));
}

#[test]
fn test_engine_down_is_reported() {
    let tmp = TempDir::new().unwrap();
    let socket = tmp.path().join("missing.sock");
    devforge(&tmp)
        .args(["status", "p1"])
        .env("DOCKER_HOST", format!("unix://{}", socket.display()))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Docker is not running"))
        .stderr(predicate::str::contains("Hint:"));
}
