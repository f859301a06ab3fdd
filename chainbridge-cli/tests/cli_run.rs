use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

const SPEC: &str = r#"{"name":"Westend","id":"westend2"}"#;

#[test]
fn run_prints_one_response_per_request() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let spec = dir.path().join("westend.json");
    fs::write(&spec, SPEC)?;

    #[allow(deprecated)]
    let assert = Command::cargo_bin("chainbridge")?
        .env_remove("RUST_LOG")
        .arg("run")
        .arg("--spec")
        .arg(&spec)
        .args([
            "--request",
            r#"{"jsonrpc":"2.0","id":1,"method":"system_name"}"#,
            "--request",
            r#"{"jsonrpc":"2.0","id":2,"method":"chain_getHeader"}"#,
        ])
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone())?;
    let lines: Vec<serde_json::Value> = stdout
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["id"], 1);
    assert_eq!(lines[0]["result"]["method"], "system_name");
    assert_eq!(lines[1]["id"], 2);
    assert_eq!(lines[1]["result"]["method"], "chain_getHeader");
    Ok(())
}

#[test]
fn run_with_database_snapshot() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let spec = dir.path().join("spec.json");
    let database = dir.path().join("db.json");
    fs::write(&spec, SPEC)?;
    fs::write(&database, "{}")?;

    #[allow(deprecated)]
    Command::cargo_bin("chainbridge")?
        .args(["run", "--spec"])
        .arg(&spec)
        .arg("--database")
        .arg(&database)
        .args(["-r", r#"{"id":9,"method":"system_health"}"#])
        .assert()
        .success()
        .stdout(predicate::str::contains("system_health"));
    Ok(())
}

#[test]
fn run_rejects_requests_when_json_rpc_disabled() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let spec = dir.path().join("spec.json");
    fs::write(&spec, SPEC)?;

    #[allow(deprecated)]
    Command::cargo_bin("chainbridge")?
        .args(["run", "--disable-json-rpc", "--spec"])
        .arg(&spec)
        .args(["--request", r#"{"id":1,"method":"system_name"}"#])
        .assert()
        .failure()
        .stderr(predicate::str::contains("JSON-RPC requests queue is full"));
    Ok(())
}

#[test]
fn check_reports_invalid_spec() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let spec = dir.path().join("broken.json");
    fs::write(&spec, "{ not json")?;

    #[allow(deprecated)]
    Command::cargo_bin("chainbridge")?
        .args(["check", "--spec"])
        .arg(&spec)
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid chain specification"));
    Ok(())
}

#[test]
fn check_accepts_valid_spec() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let spec = dir.path().join("westend.json");
    fs::write(&spec, SPEC)?;

    #[allow(deprecated)]
    Command::cargo_bin("chainbridge")?
        .args(["check", "--spec"])
        .arg(&spec)
        .assert()
        .success()
        .stdout(predicate::str::contains("ready"));
    Ok(())
}

#[test]
fn config_file_and_env_log_level() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let spec = dir.path().join("spec.json");
    let config = dir.path().join("chainbridge.yml");
    fs::write(&spec, SPEC)?;
    fs::write(&config, "log_level: warn\nchannel_capacity: 4\n")?;

    #[allow(deprecated)]
    Command::cargo_bin("chainbridge")?
        .env("CHAINBRIDGE_CONFIG", &config)
        .env("CHAINBRIDGE_LOG_LEVEL", "debug")
        .args(["check", "--spec"])
        .arg(&spec)
        .assert()
        .success();

    fs::write(&config, "channel_capacity: 0\n")?;
    #[allow(deprecated)]
    Command::cargo_bin("chainbridge")?
        .arg("--config")
        .arg(&config)
        .args(["check", "--spec"])
        .arg(&spec)
        .assert()
        .failure()
        .stderr(predicate::str::contains("channel_capacity"));
    Ok(())
}

#[test]
fn missing_spec_file_fails() -> Result<(), Box<dyn std::error::Error>> {
    #[allow(deprecated)]
    Command::cargo_bin("chainbridge")?
        .args(["check", "--spec", "/nonexistent/spec.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read chain specification"));
    Ok(())
}
