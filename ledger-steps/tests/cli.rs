//! CLI tests: spawn the binary and check output and exit codes.

use std::fs;
use std::process::{Command, Output};

use ledger_steps::exit_codes;
use ledger_steps::test_support::config_dir;

const NETWORK: &str = r#"
[client]
command = ["sh", "-c", "case \"$1 $2\" in 'chaincode query') echo 100 ;; *) echo 'status: chaincode/500' >&2; exit 1 ;; esac", "ledger"]

[retry]
max_attempts = 0

[[peers]]
id = "peer0.org1"
url = "grpcs://peer0.org1:7051"
org = "org1"
msp_id = "Org1MSP"
channels = ["mychannel"]

[[peers]]
id = "peer0.org2"
url = "grpcs://peer0.org2:7051"
org = "org2"
msp_id = "Org2MSP"
channels = ["mychannel", "private"]
"#;

fn ledger_steps(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ledger-steps"))
        .args(args)
        .output()
        .expect("spawn ledger-steps")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn validate_summarizes_network() {
    let (_dir, config) = config_dir(NETWORK).expect("config");
    let output = ledger_steps(&["validate", "--config", config.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(
        stdout(&output).trim(),
        "ok: 2 peer(s) in 2 org(s) on 2 channel(s)"
    );
}

#[test]
fn invalid_config_exits_invalid() {
    let (_dir, config) = config_dir("[timeouts]\nquery_secs = 0\n").expect("config");
    let output = ledger_steps(&["validate", "--config", config.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("query_secs"));
}

#[test]
fn resolve_prints_json_args() {
    let output = ledger_steps(&[
        "resolve",
        "put,${keys[1]},X_${v}",
        "--var",
        "keys=a,b,c",
        "--var",
        "v=1",
    ]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(stdout(&output).trim(), r#"["put","b","X_1"]"#);

    let output = ledger_steps(&["resolve", "get,${missing}"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
}

#[test]
fn targets_apply_filters() {
    let (_dir, config) = config_dir(NETWORK).expect("config");
    let config = config.to_str().unwrap();

    let output = ledger_steps(&["targets", "--config", config, "--channel", "private"]);
    assert_eq!(stdout(&output).lines().count(), 1);
    assert!(stdout(&output).starts_with("peer0.org2\torg2\t"));

    let output = ledger_steps(&[
        "targets", "--config", config, "--local-org", "org1", "--exclude", "^peer0",
    ]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));

    let output = ledger_steps(&["targets", "--config", config, "--peers", "peer9.org1"]);
    assert!(String::from_utf8_lossy(&output.stderr).contains("peer9.org1"));
}

#[test]
fn steps_lists_patterns() {
    let output = ledger_steps(&["steps"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(stdout(&output).contains("is warmed up on all peers"));
}

#[test]
fn run_reports_scenario_results() {
    let (dir, config) = config_dir(NETWORK).expect("config");
    let feature = dir.path().join("query.feature");
    fs::write(
        &feature,
        r#"Feature: query
  Scenario: passes
    When client queries chaincode "examplecc" with args "get,a" on the "mychannel" channel
    Then response from "examplecc" to client equal value "100"

  Scenario: invoke fails
    When client invokes chaincode "examplecc" with args "put,a,1" on the "mychannel" channel
"#,
    )
    .expect("write feature");

    let output = ledger_steps(&[
        "run",
        feature.to_str().unwrap(),
        "--config",
        config.to_str().unwrap(),
        "--json",
    ]);

    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(summary["passed"], 1);
    assert_eq!(summary["failed"][0]["scenario"], "invoke fails");
    assert_eq!(summary["failed"][0]["line"], 7);
}

#[test]
fn run_rejects_undefined_steps_before_calling_the_network() {
    let (dir, config) = config_dir(NETWORK).expect("config");
    let feature = dir.path().join("typo.feature");
    fs::write(&feature, "Scenario: typo\n  Given client quries chaincode \"cc\"\n")
        .expect("write feature");

    let output = ledger_steps(&[
        "run",
        feature.to_str().unwrap(),
        "--config",
        config.to_str().unwrap(),
    ]);

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("line 2"));
}
