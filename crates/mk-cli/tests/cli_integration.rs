//! CLI integration tests
//!
//! Tests the mkube CLI using assert_cmd. Every test points the binary at a
//! config file inside a temporary directory so the user's registry is
//! never touched.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn mkube() -> Command {
    Command::cargo_bin("mkube")
        .expect("Failed to locate mkube binary - ensure it's built before running tests")
}

struct TestConfig {
    dir: TempDir,
    path: PathBuf,
}

impl TestConfig {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("config.toml");

        let config = format!(
            r#"
profile = "dev"
registry_path = '{}'
profiles_dir = '{}'
"#,
            dir.path().join("tunnels.json").display(),
            dir.path().join("profiles").display(),
        );
        std::fs::write(&path, config).expect("Failed to write config");

        Self { dir, path }
    }

    fn registry(&self) -> PathBuf {
        self.dir.path().join("tunnels.json")
    }

    fn write_registry(&self, json: &str) {
        std::fs::write(self.registry(), json).expect("Failed to write registry");
    }

    fn command(&self) -> Command {
        let mut cmd = mkube();
        cmd.arg("--config").arg(&self.path);
        cmd
    }
}

fn registry_entry(pid: u32) -> String {
    format!(
        r#"[{{"Route":{{"Gateway":"192.168.49.2","DestCIDR":"10.96.0.0/12"}},"MachineName":"dev","Pid":{}}}]"#,
        pid
    )
}

#[test]
fn test_cli_help() {
    mkube()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("mkube"))
        .stdout(predicate::str::contains("Service tunnel"));
}

#[test]
fn test_cli_version() {
    mkube()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("mkube"));
}

#[test]
fn test_cli_tunnel_help() {
    mkube()
        .args(["tunnel", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("LoadBalancer"))
        .stdout(predicate::str::contains("--cleanup"))
        .stdout(predicate::str::contains("--no-route"));
}

#[test]
fn test_cli_unknown_command() {
    mkube()
        .arg("unknown-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_config_path_uses_flag() {
    let config = TestConfig::new();
    config
        .command()
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_config_show_prints_effective_settings() {
    let config = TestConfig::new();
    config
        .command()
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("profile = \"dev\""))
        .stdout(predicate::str::contains("tick_interval = 1"));
}

#[test]
fn test_config_init_creates_file_once() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("nested").join("config.toml");

    mkube()
        .arg("--config")
        .arg(&path)
        .args(["config", "init"])
        .assert()
        .success();
    assert!(path.exists());

    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.contains("profile = \"mkube\""));

    mkube()
        .arg("--config")
        .arg(&path)
        .args(["config", "init"])
        .assert()
        .success()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_invalid_config_fails() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "tick_interval = \"soon\"").unwrap();

    mkube()
        .arg("--config")
        .arg(&path)
        .args(["tunnel", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
}

#[test]
fn test_tunnel_list_empty_registry() {
    let config = TestConfig::new();
    config
        .command()
        .args(["tunnel", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Registered Tunnels:"))
        .stdout(predicate::str::contains("No tunnels registered"));
}

#[test]
fn test_tunnel_list_shows_entries() {
    let config = TestConfig::new();
    config.write_registry(&registry_entry(std::process::id()));

    config
        .command()
        .args(["tunnel", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("10.96.0.0/12"))
        .stdout(predicate::str::contains("192.168.49.2"))
        .stdout(predicate::str::contains("running"));
}

#[test]
fn test_tunnel_list_malformed_registry_fails() {
    let config = TestConfig::new();
    config.write_registry("{not json");

    config
        .command()
        .args(["tunnel", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("tunnel registry"));
}

#[test]
fn test_tunnel_cleanup_keeps_live_entries() {
    let config = TestConfig::new();
    let entry = registry_entry(std::process::id());
    config.write_registry(&entry);

    config
        .command()
        .args(["tunnel", "--cleanup"])
        .assert()
        .success();

    assert_eq!(read(&config.registry()), entry);
}

#[test]
fn test_tunnel_cleanup_with_dead_owner_succeeds() {
    let config = TestConfig::new();
    config.write_registry(&registry_entry(u32::MAX));

    config
        .command()
        .args(["tunnel", "--cleanup"])
        .assert()
        .success();
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).expect("Failed to read registry")
}
