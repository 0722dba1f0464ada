use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn cmd() -> Command {
    Command::cargo_bin("alfred").expect("alfred binary should build")
}

#[test]
fn config_prints_library_defaults_when_no_file_exists() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("config.toml");

    cmd()
        .arg("--config")
        .arg(&config_path)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("users"));

    assert!(!config_path.exists());
}

#[test]
fn config_prints_the_config_written_by_init() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("config.toml");

    cmd()
        .arg("--config")
        .arg(&config_path)
        .arg("init")
        .arg("--user")
        .arg("dave")
        .assert()
        .success();

    cmd()
        .arg("--config")
        .arg(&config_path)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("dave"));
}

#[test]
fn serve_without_configured_users_fails_fast() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("config.toml");

    cmd()
        .arg("--config")
        .arg(&config_path)
        .arg("init")
        .assert()
        .success();

    cmd()
        .arg("--config")
        .arg(&config_path)
        .arg("serve")
        .arg("--addr")
        .arg("127.0.0.1:0")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no users configured"));
}
