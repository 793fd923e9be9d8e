//! End-to-end tests for the `broker-client` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

fn broker_client() -> Command {
    let mut command = Command::cargo_bin("broker-client").unwrap();
    command.env_remove("RUST_LOG");
    command
}

#[test]
fn help_runs() {
    broker_client().arg("--help").assert().success();
}

#[test]
fn config_validate_accepts_yaml_file() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    writeln!(file, "host: broker.example.com").unwrap();
    writeln!(file, "reconnect_attempts: -1").unwrap();

    broker_client()
        .arg("--config")
        .arg(file.path())
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("valid"));
}

#[test]
fn config_validate_rejects_unknown_key() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    writeln!(file, "hostname: broker.example.com").unwrap();

    broker_client()
        .arg("--config")
        .arg(file.path())
        .args(["config", "validate"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("hostname"));
}

#[test]
fn config_show_applies_default_port() {
    broker_client()
        .args([
            "config",
            "show",
            "--format",
            "json",
            "-o",
            "host=broker.example.com",
            "-o",
            "reconnect_attempts=-1",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"port\": 5445"))
        .stdout(predicate::str::contains("\"max_attempts\": -1"))
        .stdout(predicate::str::contains("client_id").not());
}

#[test]
fn config_show_reads_environment() {
    broker_client()
        .env("BROKER_HOST", "env.example.com")
        .args(["config", "show", "--format", "yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("env.example.com"));
}

#[test]
fn config_show_keeps_numeric_client_id_as_text() {
    broker_client()
        .env("BROKER_CLIENT_ID", "12345")
        .args(["config", "show", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"client_id\": \"12345\""));
}

#[test]
fn malformed_override_exits_with_configuration_code() {
    broker_client()
        .args(["config", "validate", "-o", "nonsense"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("KEY=VALUE"));
}

#[test]
fn probe_queue_round_trips_a_message() {
    broker_client()
        .args(["probe", "--queue", "orders", "--mode", "client-ack"])
        .assert()
        .success()
        .stdout(predicate::str::contains("queue 'orders'"))
        .stdout(predicate::str::contains("closed"));
}

#[test]
fn probe_topic_reports_json() {
    broker_client()
        .args(["probe", "--topic", "prices", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"kind\": \"topic\""));
}

#[test]
fn completions_are_generated() {
    broker_client()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("broker-client"));
}
