mod common;

use assert_cmd::Command;
use predicates::str::contains;
use serde_json::Value;

use common::fixture;

fn cmd() -> Command {
    let mut cmd = Command::cargo_bin("portguard").unwrap();
    cmd.env("PORTGUARD_QUIET", "1").env_remove("RUST_LOG");
    cmd
}

fn run_json(args: &[&str]) -> Value {
    let out = cmd()
        .arg("--json")
        .args(args)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&out).expect("valid json output")
}

#[test]
fn group_command_fans_out_from_snapshot() {
    let inventory = fixture("inventory.json");
    let out = run_json(&[
        "group",
        "sg-g2",
        "--port1",
        "22",
        "--port2",
        "3389-3390",
        "--snapshot",
        inventory.to_str().unwrap(),
    ]);

    assert_eq!(out["dry_run"], true);
    assert_eq!(out["total_instances"], 2);
    assert_eq!(out["non_compliant"], 2);
    assert_eq!(out["verdicts"][0]["instance_id"], "i-b");
    assert_eq!(out["verdicts"][1]["instance_id"], "i-c");
}

#[test]
fn event_command_reads_rule_parameters() {
    let inventory = fixture("inventory.json");
    let event = fixture("sg_changed_event.json");
    let out = run_json(&[
        "event",
        event.to_str().unwrap(),
        "--snapshot",
        inventory.to_str().unwrap(),
        "--dry-run",
    ]);

    assert_eq!(out["forbidden_ports"], "22, 3389-3390");
    assert_eq!(out["trigger"]["kind"], "SecurityGroupChanged");
    assert_eq!(out["submitted"], 2);
}

#[test]
fn event_for_other_resource_is_not_applicable() {
    let event = fixture("not_applicable_event.json");
    cmd()
        .args(["event", event.to_str().unwrap()])
        .assert()
        .success()
        .stdout(contains("NOT_APPLICABLE"))
        .stdout(contains("AWS::S3::Bucket"));
}

#[test]
fn deleted_instance_event_clears_its_result() {
    let inventory = fixture("inventory.json");
    let event = fixture("instance_deleted_event.json");
    let out = run_json(&[
        "event",
        event.to_str().unwrap(),
        "--snapshot",
        inventory.to_str().unwrap(),
        "--dry-run",
        "--strict",
    ]);

    assert_eq!(out["trigger"], serde_json::json!({"kind": "InstanceDeleted", "id": "i-b"}));
    assert_eq!(out["total_instances"], 1);
    assert_eq!(out["submitted"], 1);
    assert_eq!(out["non_compliant"], 0);
    assert_eq!(out["verdicts"][0]["instance_id"], "i-b");
    assert_eq!(out["verdicts"][0]["compliance"], "NOT_APPLICABLE");
}

#[test]
fn missing_ports_is_an_error() {
    let inventory = fixture("inventory.json");
    cmd()
        .args(["instance", "i-a", "--snapshot", inventory.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(contains("No port configured"));
}

#[test]
fn strict_exits_non_zero_on_violation() {
    let inventory = fixture("inventory.json");
    cmd()
        .args([
            "instance",
            "i-b",
            "--port1",
            "22",
            "--snapshot",
            inventory.to_str().unwrap(),
            "--strict",
        ])
        .assert()
        .code(1)
        .stdout(contains("NON_COMPLIANT"));

    cmd()
        .args([
            "instance",
            "i-a",
            "--port1",
            "22",
            "--snapshot",
            inventory.to_str().unwrap(),
            "--strict",
        ])
        .assert()
        .success()
        .stdout(contains("COMPLIANT"));
}

#[test]
fn fail_closed_flag_flags_unparsable_cidr() {
    let inventory = fixture("inventory.json");
    let args = |mode: &'static str| {
        vec![
            "instance".to_string(),
            "i-d".to_string(),
            "--port1".to_string(),
            "22".to_string(),
            "--snapshot".to_string(),
            inventory.to_str().unwrap().to_string(),
            "--unparsable-cidr".to_string(),
            mode.to_string(),
        ]
    };

    let open = cmd().arg("--json").args(args("fail-open")).output().unwrap();
    let open: Value = serde_json::from_slice(&open.stdout).unwrap();
    assert_eq!(open["verdicts"][0]["compliance"], "COMPLIANT");

    let closed = cmd().arg("--json").args(args("fail-closed")).output().unwrap();
    let closed: Value = serde_json::from_slice(&closed.stdout).unwrap();
    assert_eq!(closed["verdicts"][0]["compliance"], "NON_COMPLIANT");
}

#[test]
fn missing_snapshot_aborts_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.json");
    cmd()
        .args(["group", "sg-g1", "--port1", "22", "--snapshot", missing.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(contains("Snapshot unavailable"));
}
